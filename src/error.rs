//! Error types for ivs.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IvsError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Session errors
    #[error("Session not found: {id}")]
    SessionNotFound { id: String },

    #[error("Session not ready: {id}")]
    SessionNotReady { id: String },

    #[error("Session already registered: {id}")]
    SessionExists { id: String },

    // Media errors
    #[error("Codec {codec} failed: {message}")]
    Codec { codec: String, message: String },

    #[error("Media I/O failed: {message}")]
    Media { message: String },

    #[error("Failed to write chunk file {path}: {message}")]
    Materialize { path: String, message: String },

    // Playback errors
    #[error("Playback failed: {message}")]
    Playback { message: String },

    #[error("Playback target not found: {path}")]
    PlaybackNotFound { path: String },

    // Job errors
    #[error("HTTP request failed: {message}")]
    Http { message: String },

    #[error("Service returned an unusable response (code {code}): {message}")]
    ServiceResponse { code: u16, message: String },

    // Console errors
    #[error("Console socket error: {message}")]
    ConsoleSocket { message: String },

    #[error("Console protocol error: {message}")]
    ConsoleProtocol { message: String },

    #[error("Console connection failed: {message}")]
    ConsoleConnection { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, IvsError>;
