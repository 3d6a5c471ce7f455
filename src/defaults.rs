//! Default configuration constants for ivs.
//!
//! Queue capacities, VAD frame counts and timing constants shared by the
//! session, pipeline and job modules.

/// Scratch buffer size for one encode/decode round, in bytes.
pub const AUDIO_BUFFER_SIZE: usize = 8 * 1024;

/// Capacity of the inbound and outbound audio segment queues.
pub const AUDIO_QUEUE_SIZE: usize = 64;

/// Capacity of the per-session event queue.
pub const EVENTS_QUEUE_SIZE: usize = 128;

/// Frames kept in the recovery ring while the caller is silent.
pub const VAD_STORE_FRAMES: usize = 64;

/// Upper bound on recovery frames prepended to the first voiced frame.
///
/// Covers the classifier's detection latency (voice-ms) at common packet times.
pub const VAD_RECOVERY_FRAMES: usize = 15;

/// Default chunk length in seconds. A configured value of 0 maps here.
pub const CHUNK_LEN_SEC: u32 = 15;

/// Default chunk file extension.
pub const CHUNK_FILE_EXT: &str = "wav";

/// Extensions the chunk materializer can produce.
pub const CHUNK_FILE_EXTS: &[&str] = &["wav", "raw"];

/// Voice duration before the classifier reports start-talking, in milliseconds.
pub const VAD_VOICE_MS: u32 = 200;

/// Silence duration before the classifier reports stop-talking, in milliseconds.
pub const VAD_SILENCE_MS: u32 = 500;

/// Energy threshold (RMS in 16-bit sample units) separating voice from silence.
pub const VAD_THRESHOLD: u32 = 100;

/// Default packet time in milliseconds.
pub const PTIME_MS: u32 = 20;

/// Chunk loop wait per round, in milliseconds.
pub const CHUNK_POLL_MS: u64 = 10;

/// Script host event poll interval, in milliseconds.
pub const EVENT_POLL_MS: u64 = 10;

/// Teardown waits this long per round while leases are outstanding.
pub const TEARDOWN_POLL_MS: u64 = 100;

/// Teardown repeats its warning at this interval.
pub const TEARDOWN_WARN_SECS: u64 = 5;

/// Playback stop polls this many times before giving up.
pub const PLAYBACK_STOP_ATTEMPTS: u32 = 500;

/// Playback stop poll interval, in milliseconds.
pub const PLAYBACK_STOP_POLL_MS: u64 = 10;

/// Frames read (and discarded) from the line before playback starts.
pub const PLAYBACK_FLUSH_FRAMES: usize = 10;

/// Default HTTP connect timeout, in seconds.
pub const HTTP_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Default overall HTTP request timeout, in seconds. A job holds its session
/// lease until the request ends, so this also bounds session teardown.
pub const HTTP_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default chat model for NLP jobs.
pub const CHAT_MODEL: &str = "gpt-3.5-turbo";

/// Default speech-to-text model for transcription jobs.
pub const WHISPER_MODEL: &str = "whisper-1";

/// Default message role for NLP jobs.
pub const NLP_ROLE: &str = "user";

/// Default service base URL for NLP and transcription jobs.
pub const NLP_BASE_URL: &str = "https://api.openai.com/v1";

/// User agent sent with every job request.
pub const USER_AGENT: &str = concat!("ivs/", env!("CARGO_PKG_VERSION"));
