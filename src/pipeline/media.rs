//! Per-packet media loop.
//!
//! Runs on the call thread at packet cadence: decodes one frame, classifies
//! it, keeps the pre-roll ring while the caller is silent, pushes voiced
//! audio to the outbound queue and writes comfort noise when configured.

use crate::audio::cng::ComfortNoise;
use crate::audio::codec::{Codec, CodecKind};
use crate::audio::recovery::RecoveryRing;
use crate::audio::segment::{AudioSegment, bytes_to_samples, samples_to_bytes};
use crate::audio::vad::{VadState, VoiceDetector};
use crate::defaults;
use crate::error::Result;
use crate::events::EventKind;
use crate::session::{MediaParams, Session};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Result of reading one packet from the line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaRead {
    /// An encoded frame.
    Frame(Vec<u8>),
    /// Comfort noise indication; carries no audio.
    Cng,
    /// Nothing arrived this tick.
    Empty,
    /// The call leg is gone.
    Hangup,
}

/// Inbound side of the call leg.
pub trait MediaSource: Send {
    fn read_frame(&mut self) -> MediaRead;
}

/// Outbound side of the call leg. Shared between the media loop and playback.
pub trait MediaSink: Send + Sync {
    fn write_frame(&self, frame: &[u8]) -> Result<()>;
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl MediaSink for NullSink {
    fn write_frame(&self, _frame: &[u8]) -> Result<()> {
        Ok(())
    }
}

/// How the loop spaces its ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// One tick per packet time.
    Realtime,
    /// Packet time divided by the factor.
    Accelerated(u32),
}

impl Pacing {
    fn tick(self, ptime_ms: u32) -> Duration {
        let ptime = Duration::from_millis(ptime_ms.max(1) as u64);
        match self {
            Pacing::Realtime => ptime,
            Pacing::Accelerated(factor) => ptime / factor.max(1),
        }
    }
}

/// Absolute-deadline ticker shared by the media loop and file playback.
pub(crate) struct Pacer {
    tick: Duration,
    deadline: Instant,
}

impl Pacer {
    pub(crate) fn new(pacing: Pacing, ptime_ms: u32) -> Self {
        Self {
            tick: pacing.tick(ptime_ms),
            deadline: Instant::now(),
        }
    }

    /// Sleep until the next tick is due.
    pub(crate) fn wait(&mut self) {
        self.deadline += self.tick;
        let now = Instant::now();
        if self.deadline > now {
            std::thread::sleep(self.deadline - now);
        } else if now - self.deadline > self.tick * 10 {
            // Far behind, typically after a stall. Start a fresh schedule.
            self.deadline = now;
        }
    }
}

/// A [`MediaSource`] shared by the media loop and a player.
///
/// The media loop stops reading while playback runs, so the player owns the
/// line for that time and forwards what it reads to the inbound queue.
#[derive(Clone)]
pub struct SharedLine {
    inner: Arc<Mutex<Box<dyn MediaSource>>>,
}

impl SharedLine {
    pub fn new(source: Box<dyn MediaSource>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(source)),
        }
    }

    pub fn read(&self) -> MediaRead {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .read_frame()
    }
}

impl MediaSource for SharedLine {
    fn read_frame(&mut self) -> MediaRead {
        self.read()
    }
}

/// What happened on one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Continue,
    Hangup,
}

/// Counters reported when the loop ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MediaStats {
    pub ticks: u64,
    pub frames: u64,
    pub segments: u64,
    pub segments_dropped: u64,
    pub events_dropped: u64,
    pub cng_frames: u64,
}

/// Media loop state owned by the call thread.
pub struct MediaLoop {
    source: Box<dyn MediaSource>,
    sink: Arc<dyn MediaSink>,
    decoder: Box<dyn Codec>,
    encoder: Box<dyn Codec>,
    vad: Box<dyn VoiceDetector>,
    ring: RecoveryRing,
    recovery_frames: usize,
    cng: ComfortNoise,
    pacing: Pacing,
    media: MediaParams,
    decoded: Vec<u8>,
    noise: Vec<i16>,
    scratch: Vec<u8>,
    stats: MediaStats,
}

impl MediaLoop {
    pub fn new(
        media: MediaParams,
        codec: CodecKind,
        source: Box<dyn MediaSource>,
        sink: Arc<dyn MediaSink>,
        vad: Box<dyn VoiceDetector>,
    ) -> Self {
        Self {
            source,
            sink,
            decoder: codec.build(),
            encoder: codec.build(),
            vad,
            ring: RecoveryRing::new(defaults::VAD_STORE_FRAMES, media.decoded_bytes_per_packet),
            recovery_frames: defaults::VAD_RECOVERY_FRAMES,
            cng: ComfortNoise::new(0),
            pacing: Pacing::Realtime,
            media,
            decoded: Vec::with_capacity(defaults::AUDIO_BUFFER_SIZE),
            noise: Vec::new(),
            scratch: Vec::with_capacity(defaults::AUDIO_BUFFER_SIZE),
            stats: MediaStats::default(),
        }
    }

    /// Upper bound on pre-roll frames prepended on start-talking.
    pub fn with_recovery_frames(mut self, frames: usize) -> Self {
        self.recovery_frames = frames;
        self
    }

    pub fn with_cng_level(mut self, level: u32) -> Self {
        self.cng = ComfortNoise::new(level);
        self
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn stats(&self) -> MediaStats {
        self.stats
    }

    pub fn recovery_len(&self) -> usize {
        self.ring.len()
    }

    /// Run until hangup or until the session stops being active.
    pub fn run(&mut self, session: &Session) -> MediaStats {
        let mut pacer = Pacer::new(self.pacing, self.media.ptime_ms);

        while session.is_active() {
            if self.process_tick(session) == Tick::Hangup {
                tracing::debug!(session = %session.id(), "Media source hung up");
                break;
            }
            pacer.wait();
        }

        self.stats
    }

    /// Process exactly one packet time.
    pub fn process_tick(&mut self, session: &Session) -> Tick {
        self.stats.ticks += 1;
        let mut has_audio = false;
        self.decoded.clear();

        if let Some(segment) = session.inbound().try_pop()
            && !segment.is_empty()
            && self.decode_into(&segment.data)
        {
            has_audio = true;
        }

        if !has_audio {
            if session.is_playing() {
                return Tick::Continue;
            }
            match self.source.read_frame() {
                MediaRead::Frame(frame) if !frame.is_empty() => {
                    has_audio = self.decode_into(&frame);
                }
                MediaRead::Frame(_) | MediaRead::Cng | MediaRead::Empty => {}
                MediaRead::Hangup => return Tick::Hangup,
            }
        }

        if has_audio {
            self.stats.frames += 1;
            self.produce(session);
        }

        // Noise only fills ticks without real audio.
        if !has_audio && self.cng.is_enabled() {
            self.write_comfort_noise();
        }

        Tick::Continue
    }

    fn decode_into(&mut self, frame: &[u8]) -> bool {
        self.decoded.clear();
        match self.decoder.decode(frame, &mut self.decoded) {
            Ok(()) => !self.decoded.is_empty(),
            Err(e) => {
                tracing::trace!("Decode failed, skipping frame: {e}");
                self.decoded.clear();
                false
            }
        }
    }

    fn produce(&mut self, session: &Session) {
        let mirror = session.vad_state().is_idle();
        let samples = bytes_to_samples(&self.decoded);
        let state = self.vad.process(&samples);

        let capture = match state {
            VadState::StartTalking => {
                if session.vad_state() != state && !session.emit(EventKind::SpeakingStart) {
                    self.stats.events_dropped += 1;
                }
                session.set_vad_state(state);
                true
            }
            VadState::StopTalking => {
                if session.vad_state() != state && !session.emit(EventKind::SpeakingStop) {
                    self.stats.events_dropped += 1;
                }
                session.set_vad_state(state);
                self.vad.reset();
                false
            }
            VadState::Talking => {
                session.set_vad_state(state);
                true
            }
            VadState::None => false,
        };

        if capture {
            let data = if state == VadState::StartTalking && !self.ring.is_empty() {
                self.ring.take_with(self.recovery_frames, &self.decoded)
            } else {
                self.decoded.clone()
            };
            let segment = AudioSegment::new(data, self.media.samplerate, self.media.channels);
            if session.outbound().push_or_drop(segment) {
                self.stats.segments += 1;
            } else {
                self.stats.segments_dropped += 1;
                tracing::trace!(session = %session.id(), "Outbound audio queue full, dropping segment");
            }
        } else if mirror {
            self.ring.record(&self.decoded);
        }
    }

    fn write_comfort_noise(&mut self) {
        let frames = MediaParams::samples_per_packet(self.media.samplerate, self.media.ptime_ms);
        self.cng.fill(&mut self.noise, frames, self.media.channels);

        self.scratch.clear();
        samples_to_bytes(&self.noise, &mut self.scratch);
        let mut encoded = Vec::with_capacity(self.media.encoded_bytes_per_packet);
        if let Err(e) = self.encoder.encode(&self.scratch, &mut encoded) {
            tracing::trace!("Comfort noise encode failed: {e}");
            return;
        }
        if encoded.is_empty() {
            return;
        }
        match self.sink.write_frame(&encoded) {
            Ok(()) => self.stats.cng_frames += 1,
            Err(e) => tracing::trace!("Comfort noise write failed: {e}"),
        }
    }
}
