//! ivs - Voice session core for IVR scripts
//!
//! Leased call sessions, voice-activity segmentation into chunks, and
//! background jobs that report back through typed per-session events.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod console;
pub mod defaults;
pub mod engine;
pub mod error;
pub mod events;
pub mod jobs;
pub mod logging;
pub mod pipeline;
pub mod playback;
pub mod session;

// Session core
pub use session::{CallInfo, JID_NONE, JobId, Lease, MediaParams, Registry, RegistryHandle, Session};

// Events
pub use events::{ChunkData, ChunkReady, Event, EventKind};

// Segmentation
pub use audio::codec::CodecKind;
pub use audio::vad::{EnergyVad, VadState, VoiceDetector};
pub use pipeline::{ChunkWorker, MediaLoop, MediaSink, MediaSource, Pacing};

// Jobs and playback
pub use jobs::{HttpClient, JobRunner, NlpClient};
pub use playback::{PlaybackTarget, Player, WavPlayer};

// Composition root
pub use engine::{CallReport, CallSpec, Engine, EventPrinter, ScriptHost};

// Error handling
pub use error::{IvsError, Result};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_string_starts_with_cargo_version() {
        let ver = version_string();
        assert!(
            ver.starts_with(env!("CARGO_PKG_VERSION")),
            "version_string should start with CARGO_PKG_VERSION, got: {}",
            ver
        );
    }

    #[test]
    fn version_string_contains_plus_when_git_hash_present() {
        let ver = version_string();
        if option_env!("GIT_HASH").is_some_and(|h| !h.is_empty()) {
            assert!(
                ver.contains('+'),
                "With GIT_HASH set, version should contain '+', got: {}",
                ver
            );
        } else {
            assert_eq!(ver, env!("CARGO_PKG_VERSION"));
        }
    }
}
