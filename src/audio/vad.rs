//! Voice Activity Detection (VAD) module.
//!
//! Classifies decoded frames by RMS energy into the four telephony VAD
//! states. Durations are counted in samples, so the classifier behaves the
//! same whether the media loop runs paced or as fast as possible.

use crate::config::VadSettings;

/// Classifier output and the session-visible speaking state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum VadState {
    /// No speech detected.
    #[default]
    None = 0,
    /// Speech just started (reported once per utterance).
    StartTalking = 1,
    /// Speech is ongoing, including the silence hangover.
    Talking = 2,
    /// Speech just ended (reported once per utterance).
    StopTalking = 3,
}

impl VadState {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => VadState::StartTalking,
            2 => VadState::Talking,
            3 => VadState::StopTalking,
            _ => VadState::None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            VadState::None => "NONE",
            VadState::StartTalking => "START_TALKING",
            VadState::Talking => "TALKING",
            VadState::StopTalking => "STOP_TALKING",
        }
    }

    /// States during which uncaptured frames feed the recovery ring.
    pub fn is_idle(self) -> bool {
        matches!(self, VadState::None | VadState::StopTalking)
    }
}

/// Voice activity classifier used by the media loop.
pub trait VoiceDetector: Send {
    /// Classify one frame of interleaved samples.
    fn process(&mut self, samples: &[i16]) -> VadState;

    /// Forget adaptation state. Called after every stop-talking.
    fn reset(&mut self);
}

/// Energy classifier parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnergyVadConfig {
    pub samplerate: u32,
    pub channels: u16,
    pub voice_ms: u32,
    pub silence_ms: u32,
    /// RMS in 16-bit sample units.
    pub threshold: u32,
    pub debug: bool,
}

impl EnergyVadConfig {
    pub fn from_settings(settings: &VadSettings, samplerate: u32, channels: u16) -> Self {
        Self {
            samplerate,
            channels,
            voice_ms: settings.effective_voice_ms(),
            silence_ms: settings.effective_silence_ms(),
            threshold: settings.effective_threshold(),
            debug: settings.debug,
        }
    }
}

/// Four-state RMS energy classifier.
#[derive(Debug)]
pub struct EnergyVad {
    config: EnergyVadConfig,
    voice_samples_needed: u64,
    silence_samples_needed: u64,
    voice_run: u64,
    silence_run: u64,
    talking: bool,
    last: VadState,
}

impl EnergyVad {
    pub fn new(config: EnergyVadConfig) -> Self {
        let per_ms = config.samplerate as u64 / 1000;
        Self {
            voice_samples_needed: (config.voice_ms as u64 * per_ms).max(1),
            silence_samples_needed: (config.silence_ms as u64 * per_ms).max(1),
            voice_run: 0,
            silence_run: 0,
            talking: false,
            last: VadState::None,
            config,
        }
    }

    pub fn config(&self) -> &EnergyVadConfig {
        &self.config
    }

    pub fn is_talking(&self) -> bool {
        self.talking
    }
}

impl VoiceDetector for EnergyVad {
    fn process(&mut self, samples: &[i16]) -> VadState {
        let frames = (samples.len() / self.config.channels.max(1) as usize) as u64;
        let energy = calculate_rms(samples);
        let voiced = energy >= self.config.threshold as f64;

        let state = if !self.talking {
            if voiced {
                self.voice_run += frames;
                if self.voice_run >= self.voice_samples_needed {
                    self.talking = true;
                    self.voice_run = 0;
                    self.silence_run = 0;
                    VadState::StartTalking
                } else {
                    VadState::None
                }
            } else {
                self.voice_run = 0;
                VadState::None
            }
        } else if voiced {
            self.silence_run = 0;
            VadState::Talking
        } else {
            self.silence_run += frames;
            if self.silence_run >= self.silence_samples_needed {
                self.talking = false;
                self.silence_run = 0;
                VadState::StopTalking
            } else {
                VadState::Talking
            }
        };

        if self.config.debug && state != self.last {
            tracing::debug!(
                from = self.last.name(),
                to = state.name(),
                energy = energy as u32,
                "VAD state change"
            );
        }
        self.last = state;
        state
    }

    fn reset(&mut self) {
        self.voice_run = 0;
        self.silence_run = 0;
        self.talking = false;
        self.last = VadState::None;
    }
}

/// Root Mean Square of the samples, in 16-bit sample units.
pub fn calculate_rms(samples: &[i16]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&sample| {
            let s = sample as f64;
            s * s
        })
        .sum();

    (sum_squares / samples.len() as f64).sqrt()
}
