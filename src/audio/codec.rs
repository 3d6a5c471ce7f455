//! Wire codecs between encoded media frames and L16 PCM.

use crate::audio::segment::samples_to_bytes;
use crate::error::{IvsError, Result};
use std::str::FromStr;

/// Decoder/encoder pair for one call leg.
pub trait Codec: Send {
    fn name(&self) -> &'static str;

    /// Decode `frame` into little-endian L16, appending to `out`.
    fn decode(&mut self, frame: &[u8], out: &mut Vec<u8>) -> Result<()>;

    /// Encode little-endian L16 `pcm`, appending to `out`.
    fn encode(&mut self, pcm: &[u8], out: &mut Vec<u8>) -> Result<()>;
}

/// Which codec a call negotiates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodecKind {
    #[default]
    L16,
    Pcmu,
}

impl CodecKind {
    pub fn build(self) -> Box<dyn Codec> {
        match self {
            CodecKind::L16 => Box::new(L16Codec),
            CodecKind::Pcmu => Box::new(PcmuCodec),
        }
    }
}

impl FromStr for CodecKind {
    type Err = IvsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "l16" | "slin" => Ok(CodecKind::L16),
            "pcmu" | "ulaw" | "g711u" => Ok(CodecKind::Pcmu),
            other => Err(IvsError::Codec {
                codec: other.to_string(),
                message: "unsupported codec".to_string(),
            }),
        }
    }
}

/// Signed 16-bit little-endian passthrough.
#[derive(Debug, Default, Clone, Copy)]
pub struct L16Codec;

impl Codec for L16Codec {
    fn name(&self) -> &'static str {
        "L16"
    }

    fn decode(&mut self, frame: &[u8], out: &mut Vec<u8>) -> Result<()> {
        if frame.len() % 2 != 0 {
            return Err(IvsError::Codec {
                codec: self.name().to_string(),
                message: format!("odd frame length {}", frame.len()),
            });
        }
        out.extend_from_slice(frame);
        Ok(())
    }

    fn encode(&mut self, pcm: &[u8], out: &mut Vec<u8>) -> Result<()> {
        self.decode(pcm, out)
    }
}

/// G.711 µ-law.
#[derive(Debug, Default, Clone, Copy)]
pub struct PcmuCodec;

impl Codec for PcmuCodec {
    fn name(&self) -> &'static str {
        "PCMU"
    }

    fn decode(&mut self, frame: &[u8], out: &mut Vec<u8>) -> Result<()> {
        let samples: Vec<i16> = frame.iter().map(|&b| mulaw_to_linear16(b)).collect();
        samples_to_bytes(&samples, out);
        Ok(())
    }

    fn encode(&mut self, pcm: &[u8], out: &mut Vec<u8>) -> Result<()> {
        if pcm.len() % 2 != 0 {
            return Err(IvsError::Codec {
                codec: self.name().to_string(),
                message: format!("odd PCM length {}", pcm.len()),
            });
        }
        out.extend(
            pcm.chunks_exact(2)
                .map(|pair| linear16_to_mulaw(i16::from_le_bytes([pair[0], pair[1]]))),
        );
        Ok(())
    }
}

const MULAW_BIAS: i32 = 0x84;
const MULAW_CLIP: i32 = 32635;

pub fn mulaw_to_linear16(mu: u8) -> i16 {
    let mu = !mu;
    let sign = mu & 0x80;
    let exponent = (mu >> 4) & 0x07;
    let mantissa = (mu & 0x0F) as i32;

    let magnitude = (((mantissa << 3) + MULAW_BIAS) << exponent) - MULAW_BIAS;
    if sign != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

pub fn linear16_to_mulaw(sample: i16) -> u8 {
    let mut pcm = sample as i32;
    let sign = if pcm < 0 {
        pcm = -pcm;
        0x80u8
    } else {
        0x00
    };
    pcm = pcm.min(MULAW_CLIP) + MULAW_BIAS;

    let mut exponent = 7u8;
    let mut mask = 0x4000;
    while exponent > 0 && (pcm & mask) == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = ((pcm >> (exponent + 3)) & 0x0F) as u8;
    !(sign | (exponent << 4) | mantissa)
}
