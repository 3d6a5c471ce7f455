//! Audio segmentation pipeline for one session.
//!
//! The media loop runs on the call thread at packet cadence; the chunk loop
//! runs on its own leased worker thread. They share only the session's
//! outbound audio queue and its VAD state.

pub mod chunker;
pub mod error;
pub mod media;
pub mod worker;

pub use chunker::{ChunkStats, ChunkWorker};
pub use error::{ErrorReporter, LogReporter, StationError};
pub use media::{
    MediaLoop, MediaRead, MediaSink, MediaSource, MediaStats, NullSink, Pacing, SharedLine, Tick,
};
pub use worker::{Step, Worker, WorkerRunner};
