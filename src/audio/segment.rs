//! Decoded audio travelling between the media loop and the chunk loop.

/// One run of decoded L16 audio, owned by whichever queue or loop holds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSegment {
    pub data: Vec<u8>,
    pub samplerate: u32,
    pub channels: u16,
}

impl AudioSegment {
    pub fn new(data: Vec<u8>, samplerate: u32, channels: u16) -> Self {
        Self {
            data,
            samplerate,
            channels,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Samples per channel.
    pub fn frames(&self) -> usize {
        self.data.len() / (2 * self.channels.max(1) as usize)
    }
}

/// Little-endian L16 bytes to samples. A trailing odd byte is ignored.
pub fn bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Samples to little-endian L16 bytes, appended to `out`.
pub fn samples_to_bytes(samples: &[i16], out: &mut Vec<u8>) {
    out.reserve(samples.len() * 2);
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
}
