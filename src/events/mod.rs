//! Typed session events and the bounded queues that carry them.
//!
//! Every asynchronous result or notification reaches the script layer as an
//! [`Event`]: a job id (or [`JID_NONE`]) plus one variant of the closed
//! [`EventKind`] set. Payloads own their data; dropping an event releases it.

pub mod queue;

use crate::session::job_id::{JID_NONE, JobId};
use serde::Serialize;
use serde::ser::SerializeStruct;
use std::path::PathBuf;

pub use queue::{AudioQueue, BoundedQueue, EventQueue, QueueFull};

/// One entry of the per-session event queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub jid: JobId,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    /// Event not tied to any job (VAD, chunk and playback notifications).
    pub fn new(kind: EventKind) -> Self {
        Self {
            jid: JID_NONE,
            kind,
        }
    }

    /// Event carrying the result of job `jid`.
    pub fn for_job(jid: JobId, kind: EventKind) -> Self {
        Self { jid, kind }
    }

    /// Stable wire name of the event type.
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// Serialize as a single JSON line.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Closed set of event payloads.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EventKind {
    Nop,
    SpeakingStart,
    SpeakingStop,
    ChunkReady(ChunkReady),
    PlaybackStarted { file: String },
    PlaybackFinished { file: String },
    TranscriptionDone { confidence: f64, text: String },
    NlpDone { role: String, text: String },
    JobFailed { http_code: u16, reason: String },
    HttpResult { http_code: u16, body: Option<String> },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Nop => "nop",
            EventKind::SpeakingStart => "speaking-start",
            EventKind::SpeakingStop => "speaking-stop",
            EventKind::ChunkReady(_) => "chunk-ready",
            EventKind::PlaybackStarted { .. } => "playback-started",
            EventKind::PlaybackFinished { .. } => "playback-finished",
            EventKind::TranscriptionDone { .. } => "transcription-done",
            EventKind::NlpDone { .. } => "nlp-done",
            EventKind::JobFailed { .. } => "job-failed",
            EventKind::HttpResult { .. } => "http-result",
        }
    }
}

/// A flushed chunk of voiced audio.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkReady {
    /// Duration as computed by the chunk loop: `length / samplerate`.
    pub time_secs: u32,
    /// Chunk size in bytes of L16 audio.
    pub length: usize,
    pub samplerate: u32,
    pub channels: u16,
    pub data: ChunkData,
}

/// Chunk payload: the bytes themselves or the file they were written to.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkData {
    Buffer(Vec<u8>),
    File(PathBuf),
}

impl ChunkData {
    pub fn as_path(&self) -> Option<&PathBuf> {
        match self {
            ChunkData::File(path) => Some(path),
            ChunkData::Buffer(_) => None,
        }
    }
}

// Buffers are summarized by length; JSON consumers never want raw PCM.
impl Serialize for ChunkData {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ChunkData", 2)?;
        match self {
            ChunkData::Buffer(bytes) => {
                state.serialize_field("kind", "buffer")?;
                state.serialize_field("bytes", &bytes.len())?;
            }
            ChunkData::File(path) => {
                state.serialize_field("kind", "file")?;
                state.serialize_field("path", &path.display().to_string())?;
            }
        }
        state.end()
    }
}
