//! Error types and reporting for session worker loops.

use std::fmt;

/// Errors a worker step can end with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StationError {
    /// The worker reports and keeps running.
    Recoverable(String),
    /// The worker reports and stops.
    Fatal(String),
}

impl fmt::Display for StationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StationError::Recoverable(msg) => write!(f, "Recoverable error: {}", msg),
            StationError::Fatal(msg) => write!(f, "Fatal error: {}", msg),
        }
    }
}

impl std::error::Error for StationError {}

/// Trait for reporting worker errors.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, worker: &str, session: &str, error: &StationError);
}

/// Reporter that forwards to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, worker: &str, session: &str, error: &StationError) {
        match error {
            StationError::Recoverable(msg) => {
                tracing::warn!(worker, session, "{msg}");
            }
            StationError::Fatal(msg) => {
                tracing::error!(worker, session, "{msg}");
            }
        }
    }
}
