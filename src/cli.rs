//! Command-line interface for ivs
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Voice session core for IVR scripts
#[derive(Parser, Debug)]
#[command(name = "ivs", version, about = "Voice session core for IVR scripts")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress output (quiet mode)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: info, -vv: debug, -vvv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one simulated call from a WAV file, printing session events as JSON lines
    Run {
        /// WAV file played as the caller's audio
        #[arg(value_name = "WAV")]
        wav: PathBuf,

        /// Script name reported for the call
        #[arg(long, value_name = "NAME", default_value = "default")]
        script: String,

        /// Caller number
        #[arg(long, value_name = "NUMBER", default_value = "unknown")]
        caller: String,

        /// Called number
        #[arg(long, value_name = "NUMBER", default_value = "unknown")]
        called: String,

        /// Wire codec of the simulated leg (l16, pcmu)
        #[arg(long, value_name = "CODEC", default_value = "l16")]
        codec: String,

        /// Packet time in milliseconds
        #[arg(long, value_name = "MS", default_value_t = crate::defaults::PTIME_MS, value_parser = parse_ptime)]
        ptime: u32,

        /// Media sample rate; the WAV is resampled to it
        #[arg(long, value_name = "HZ", default_value = "8000")]
        samplerate: u32,

        /// Chunk delivery override (buffer, file)
        #[arg(long, value_name = "TYPE")]
        chunk_type: Option<String>,

        /// Trailing silence appended after the WAV, in milliseconds
        #[arg(long, value_name = "MS", default_value = "1000")]
        tail: u32,

        /// Run the media clock faster than real time by this factor
        #[arg(long, value_name = "FACTOR")]
        fast: Option<u32>,

        /// Serve the operator console on this socket while the call runs
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,

        /// Send file chunks to the transcription service
        #[arg(long)]
        transcribe: bool,
    },

    /// Send a command to a running engine's console (list | kill <sid> | playback <sid> <path>)
    Console {
        /// Path to Unix socket (default: $XDG_RUNTIME_DIR/ivs.sock)
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,

        /// Command words
        #[arg(required = true, num_args = 1.., value_name = "COMMAND")]
        words: Vec<String>,
    },

    /// Manage configuration
    Config {
        /// Action to perform
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file path
    Path,
}

fn parse_ptime(s: &str) -> Result<u32, String> {
    let ptime: u32 = s.trim().parse().map_err(|e| format!("{e}"))?;
    match ptime {
        10 | 20 | 30 | 40 | 60 => Ok(ptime),
        other => Err(format!("unsupported packet time {other} ms")),
    }
}
