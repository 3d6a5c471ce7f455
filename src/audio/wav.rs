//! WAV input for simulated calls and chunk-to-file output.

use crate::audio::codec::{Codec, CodecKind};
use crate::audio::segment::{bytes_to_samples, samples_to_bytes};
use crate::error::{IvsError, Result};
use crate::pipeline::media::{MediaRead, MediaSource};
use crate::session::MediaParams;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Writes a flushed chunk somewhere the script layer can pick it up.
pub trait ChunkMaterializer: Send + Sync {
    /// Store L16 `pcm` and return the path it was written to.
    fn write(&self, pcm: &[u8], samplerate: u32, channels: u16, extension: &str)
    -> Result<PathBuf>;
}

/// Writes chunks as `<dir>/<uuid>.<ext>`.
#[derive(Debug, Clone)]
pub struct FileMaterializer {
    dir: PathBuf,
}

impl FileMaterializer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write_wav(path: &Path, pcm: &[u8], samplerate: u32, channels: u16) -> Result<()> {
        let spec = hound::WavSpec {
            channels: channels.max(1),
            sample_rate: samplerate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).map_err(|e| materialize(path, e))?;
        for sample in bytes_to_samples(pcm) {
            writer.write_sample(sample).map_err(|e| materialize(path, e))?;
        }
        writer.finalize().map_err(|e| materialize(path, e))
    }
}

fn materialize(path: &Path, e: impl std::fmt::Display) -> IvsError {
    IvsError::Materialize {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}

impl ChunkMaterializer for FileMaterializer {
    fn write(
        &self,
        pcm: &[u8],
        samplerate: u32,
        channels: u16,
        extension: &str,
    ) -> Result<PathBuf> {
        let path = self
            .dir
            .join(format!("{}.{}", uuid::Uuid::new_v4(), extension));

        let result = match extension.to_ascii_lowercase().as_str() {
            "wav" => Self::write_wav(&path, pcm, samplerate, channels),
            "raw" => fs::write(&path, pcm).map_err(|e| materialize(&path, e)),
            other => {
                return Err(materialize(
                    &path,
                    format!("unsupported chunk file extension '{other}'"),
                ));
            }
        };

        match result {
            Ok(()) => Ok(path),
            Err(e) => {
                if path.exists()
                    && let Err(remove_err) = fs::remove_file(&path)
                {
                    tracing::debug!(path = %path.display(), "Failed to remove partial chunk: {remove_err}");
                }
                Err(e)
            }
        }
    }
}

/// Read a WAV file as mono samples at `samplerate`.
pub fn read_pcm(path: &Path, samplerate: u32) -> Result<Vec<i16>> {
    let file = fs::File::open(path).map_err(|e| IvsError::Media {
        message: format!("Failed to open {}: {}", path.display(), e),
    })?;
    read_pcm_from(Box::new(std::io::BufReader::new(file)), samplerate)
}

/// Decode WAV data from any reader, downmixing to mono and resampling.
pub fn read_pcm_from(reader: Box<dyn Read + Send>, samplerate: u32) -> Result<Vec<i16>> {
    let mut wav_reader = hound::WavReader::new(reader).map_err(|e| IvsError::Media {
        message: format!("Failed to parse WAV file: {}", e),
    })?;

    let spec = wav_reader.spec();
    if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
        return Err(IvsError::Media {
            message: format!(
                "Unsupported WAV format: {} bit {:?}",
                spec.bits_per_sample, spec.sample_format
            ),
        });
    }

    let raw: Vec<i16> = wav_reader
        .samples::<i16>()
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| IvsError::Media {
            message: format!("Failed to read WAV samples: {}", e),
        })?;

    let channels = spec.channels.max(1) as usize;
    let mono: Vec<i16> = if channels > 1 {
        raw.chunks_exact(channels)
            .map(|frame| (frame.iter().map(|&s| s as i32).sum::<i32>() / channels as i32) as i16)
            .collect()
    } else {
        raw
    };

    Ok(resample(&mono, spec.sample_rate, samplerate))
}

/// Linear interpolation resampling.
fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = (pos.floor() as usize).min(samples.len() - 1);
            let fraction = pos - idx as f64;
            match samples.get(idx + 1) {
                Some(&next) => {
                    let left = samples[idx] as f64;
                    (left + (next as f64 - left) * fraction) as i16
                }
                None => samples[idx],
            }
        })
        .collect()
}

/// Simulated inbound call leg backed by a WAV file.
///
/// Yields one encoded packet per read, then optional trailing silence, then
/// hangup.
pub struct WavSource {
    samples: Vec<i16>,
    position: usize,
    samples_per_packet: usize,
    codec: Box<dyn Codec>,
    scratch: Vec<u8>,
}

impl WavSource {
    pub fn open(path: &Path, media: &MediaParams, codec: CodecKind) -> Result<Self> {
        let samples = read_pcm(path, media.samplerate)?;
        Ok(Self::from_samples(samples, media, codec))
    }

    pub fn from_samples(samples: Vec<i16>, media: &MediaParams, codec: CodecKind) -> Self {
        Self {
            samples,
            position: 0,
            samples_per_packet: MediaParams::samples_per_packet(media.samplerate, media.ptime_ms)
                .max(1),
            codec: codec.build(),
            scratch: Vec::new(),
        }
    }

    /// Append `ms` of digital silence so the classifier can see the end of speech.
    pub fn with_trailing_silence(mut self, ms: u32, samplerate: u32) -> Self {
        let extra = (samplerate as usize * ms as usize) / 1000;
        self.samples.extend(std::iter::repeat_n(0i16, extra));
        self
    }

    pub fn remaining_packets(&self) -> usize {
        (self.samples.len() - self.position).div_ceil(self.samples_per_packet)
    }
}

impl MediaSource for WavSource {
    fn read_frame(&mut self) -> MediaRead {
        if self.position >= self.samples.len() {
            return MediaRead::Hangup;
        }

        let end = (self.position + self.samples_per_packet).min(self.samples.len());
        let mut packet = self.samples[self.position..end].to_vec();
        packet.resize(self.samples_per_packet, 0);
        self.position = end;

        self.scratch.clear();
        samples_to_bytes(&packet, &mut self.scratch);
        let mut frame = Vec::with_capacity(self.scratch.len());
        match self.codec.encode(&self.scratch, &mut frame) {
            Ok(()) => MediaRead::Frame(frame),
            Err(e) => {
                tracing::trace!("WAV packet encode failed: {e}");
                MediaRead::Empty
            }
        }
    }
}
