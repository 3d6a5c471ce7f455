use crate::defaults;
use crate::error::{IvsError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub vad: VadSettings,
    pub engines: EnginesConfig,
    pub http: HttpConfig,
    pub nlp: NlpConfig,
    pub console: ConsoleConfig,
}

/// Media and chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct AudioConfig {
    pub cng_level: u32,
    pub chunk_len_sec: u32,
    pub chunk_type: ChunkType,
    pub chunk_file_ext: String,
    pub chunk_dir: Option<PathBuf>,
}

/// How flushed chunks are delivered to the script layer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChunkType {
    /// Raw L16 bytes inside the event
    #[default]
    Buffer,
    /// Path of a file written by the chunk materializer
    File,
}

impl FromStr for ChunkType {
    type Err = IvsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buffer" => Ok(ChunkType::Buffer),
            "file" => Ok(ChunkType::File),
            other => Err(IvsError::ConfigInvalidValue {
                key: "audio.chunk-type".to_string(),
                message: format!("unknown chunk type '{other}' (expected buffer or file)"),
            }),
        }
    }
}

/// Voice activity classifier configuration.
///
/// Zero keeps the classifier's built-in value, as the telephony core does.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default, rename_all = "kebab-case")]
pub struct VadSettings {
    pub voice_ms: u32,
    pub silence_ms: u32,
    pub threshold: u32,
    pub debug: bool,
}

/// Default engines and language seeded into every new session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default, rename_all = "kebab-case")]
pub struct EnginesConfig {
    pub default_asr_engine: Option<String>,
    pub default_tts_engine: Option<String>,
    pub default_language: Option<String>,
}

/// HTTP transport configuration for background jobs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct HttpConfig {
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub log_http_errors: bool,
}

/// Chat completion / transcription service configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct NlpConfig {
    pub base_url: String,
    pub api_key: String,
    pub chat_model: String,
    pub whisper_model: String,
    pub role: String,
}

/// Console socket configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default, rename_all = "kebab-case")]
pub struct ConsoleConfig {
    pub socket: Option<PathBuf>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            cng_level: 0,
            chunk_len_sec: defaults::CHUNK_LEN_SEC,
            chunk_type: ChunkType::Buffer,
            chunk_file_ext: defaults::CHUNK_FILE_EXT.to_string(),
            chunk_dir: None,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: defaults::HTTP_CONNECT_TIMEOUT_SECS,
            request_timeout_secs: defaults::HTTP_REQUEST_TIMEOUT_SECS,
            log_http_errors: true,
        }
    }
}

impl Default for NlpConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::NLP_BASE_URL.to_string(),
            api_key: String::new(),
            chat_model: defaults::CHAT_MODEL.to_string(),
            whisper_model: defaults::WHISPER_MODEL.to_string(),
            role: defaults::NLP_ROLE.to_string(),
        }
    }
}

impl AudioConfig {
    /// Chunk length with the "0 means default" rule applied.
    pub fn effective_chunk_len_sec(&self) -> u32 {
        if self.chunk_len_sec == 0 {
            defaults::CHUNK_LEN_SEC
        } else {
            self.chunk_len_sec
        }
    }

    /// Directory chunk files are written to.
    pub fn effective_chunk_dir(&self) -> PathBuf {
        self.chunk_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

impl VadSettings {
    pub fn effective_voice_ms(&self) -> u32 {
        if self.voice_ms > 0 {
            self.voice_ms
        } else {
            defaults::VAD_VOICE_MS
        }
    }

    pub fn effective_silence_ms(&self) -> u32 {
        if self.silence_ms > 0 {
            self.silence_ms
        } else {
            defaults::VAD_SILENCE_MS
        }
    }

    pub fn effective_threshold(&self) -> u32 {
        if self.threshold > 0 {
            self.threshold
        } else {
            defaults::VAD_THRESHOLD
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Invalid files are reported as errors.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e)
                if e.downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound) =>
            {
                Ok(Self::default())
            }
            Err(e) => Err(e.context(format!("Failed to load config from {}", path.display()))),
        }
    }

    /// Check values serde cannot reject on its own.
    pub fn validate(&self) -> Result<()> {
        if !defaults::CHUNK_FILE_EXTS.contains(&self.audio.chunk_file_ext.as_str()) {
            return Err(IvsError::ConfigInvalidValue {
                key: "audio.chunk-file-ext".to_string(),
                message: format!(
                    "unsupported extension '{}' (expected one of: {})",
                    self.audio.chunk_file_ext,
                    defaults::CHUNK_FILE_EXTS.join(", ")
                ),
            });
        }
        if self.vad.threshold > i16::MAX as u32 {
            return Err(IvsError::ConfigInvalidValue {
                key: "vad.threshold".to_string(),
                message: format!("{} exceeds the 16-bit sample range", self.vad.threshold),
            });
        }
        Ok(())
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - IVS_LANGUAGE → engines.default-language
    /// - IVS_ASR_ENGINE → engines.default-asr-engine
    /// - IVS_TTS_ENGINE → engines.default-tts-engine
    /// - IVS_CNG_LEVEL → audio.cng-level
    /// - IVS_CHUNK_LEN_SEC → audio.chunk-len-sec
    /// - IVS_NLP_API_KEY → nlp.api-key
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(language) = non_empty_env("IVS_LANGUAGE") {
            self.engines.default_language = Some(language);
        }

        if let Some(engine) = non_empty_env("IVS_ASR_ENGINE") {
            self.engines.default_asr_engine = Some(engine);
        }

        if let Some(engine) = non_empty_env("IVS_TTS_ENGINE") {
            self.engines.default_tts_engine = Some(engine);
        }

        if let Some(level) = non_empty_env("IVS_CNG_LEVEL")
            && let Ok(level) = level.parse()
        {
            self.audio.cng_level = level;
        }

        if let Some(secs) = non_empty_env("IVS_CHUNK_LEN_SEC")
            && let Ok(secs) = secs.parse()
        {
            self.audio.chunk_len_sec = secs;
        }

        if let Some(key) = non_empty_env("IVS_NLP_API_KEY") {
            self.nlp.api_key = key;
        }

        self
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/ivs/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ivs")
            .join("config.toml")
    }

    /// Serialize back to TOML (used by `ivs config show`).
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| IvsError::ConfigParse {
            message: e.to_string(),
        })
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}
