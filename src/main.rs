use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser};
use ivs::audio::codec::CodecKind;
use ivs::audio::wav::WavSource;
use ivs::cli::{Cli, Commands, ConfigAction};
use ivs::config::{ChunkType, Config};
use ivs::console::{ConsoleServer, send_command};
use ivs::engine::{CallReport, CallSpec, Engine, EventPrinter};
use ivs::pipeline::{NullSink, Pacing};
use ivs::session::{CallInfo, MediaParams};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn main() -> Result<()> {
    let cli = Cli::parse();
    ivs::logging::init(cli.quiet, cli.verbose);

    match cli.command {
        Commands::Run {
            wav,
            script,
            caller,
            called,
            codec,
            ptime,
            samplerate,
            chunk_type,
            tail,
            fast,
            socket,
            transcribe,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(chunk_type) = chunk_type {
                config.audio.chunk_type = chunk_type.parse::<ChunkType>()?;
            }
            let codec: CodecKind = codec.parse()?;
            let media = match codec {
                CodecKind::L16 => MediaParams::l16(samplerate, 1, ptime),
                CodecKind::Pcmu => MediaParams::pcmu(samplerate, ptime),
            };
            let pacing = fast.map_or(Pacing::Realtime, Pacing::Accelerated);
            let spec = CallSpec::new(CallInfo::new(script, caller, called), media)
                .with_pacing(pacing);

            let report = run_call(
                config,
                spec,
                RunOptions {
                    wav,
                    codec,
                    tail,
                    socket,
                    transcribe,
                },
            )?;
            if !cli.quiet {
                print_report(&report);
            }
        }
        Commands::Console { socket, words } => {
            let socket_path = socket.unwrap_or_else(ConsoleServer::default_socket_path);
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            let reply = runtime.block_on(send_command(&socket_path, &words.join(" ")))?;
            if reply.starts_with('-') {
                eprint!("{}", reply.red());
                std::process::exit(1);
            }
            print!("{}", reply);
        }
        Commands::Config { action } => {
            handle_config_command(action, cli.config.as_deref())?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "ivs", &mut std::io::stdout());
        }
    }

    Ok(())
}

struct RunOptions {
    wav: PathBuf,
    codec: CodecKind,
    tail: u32,
    socket: Option<PathBuf>,
    transcribe: bool,
}

/// Run one call from a WAV file on this thread, with the runtime serving jobs
/// and the console in the background.
fn run_call(config: Config, spec: CallSpec, options: RunOptions) -> Result<CallReport> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("ivs-rt")
        .enable_all()
        .build()
        .context("Failed to start runtime")?;

    let socket_path = options
        .socket
        .or_else(|| config.console.socket.clone())
        .unwrap_or_else(ConsoleServer::default_socket_path);

    let engine = Arc::new(Engine::new(config, runtime.handle().clone())?);
    tracing::info!(version = %ivs::version_string(), session = %spec.id, "Starting call");

    let console = Arc::new(
        ConsoleServer::new(socket_path).with_shutdown_flag(engine.shutdown_flag()),
    );
    let console_task = {
        let console = Arc::clone(&console);
        let handler = engine.console();
        runtime.spawn(async move {
            if let Err(e) = console.start(handler).await {
                tracing::warn!("Console unavailable: {e}");
            }
        })
    };

    {
        let engine = Arc::clone(&engine);
        runtime.spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                engine.shutdown();
            }
        });
    }

    let mut printer = EventPrinter::new(std::io::stdout());
    if options.transcribe {
        let Some(nlp) = engine.nlp() else {
            bail!("Transcription needs the http feature");
        };
        printer = printer.with_transcription(engine.runner().clone(), Arc::clone(nlp));
    }

    let media = spec.media;
    let source = WavSource::open(&options.wav, &media, options.codec)
        .with_context(|| format!("Failed to open {}", options.wav.display()))?
        .with_trailing_silence(options.tail, media.samplerate);

    let result = engine.run_call(
        spec,
        Box::new(source),
        Arc::new(NullSink),
        options.codec,
        Box::new(printer),
    );

    console.stop();
    if let Err(e) = runtime.block_on(console_task) {
        tracing::warn!("Console task failed: {e}");
    }
    runtime.shutdown_timeout(std::time::Duration::from_secs(2));

    Ok(result?)
}

fn print_report(report: &CallReport) {
    eprintln!("{} {}", "Call finished:".green(), report.session_id);
    eprintln!(
        "  {}    {} ({} segments, {} dropped)",
        "Frames:".dimmed(),
        report.media.frames,
        report.media.segments,
        report.media.segments_dropped
    );
    eprintln!(
        "  {}    {} flushed, {} failed",
        "Chunks:".dimmed(),
        report.chunks.flushed,
        report.chunks.failed
    );
    let dropped = report.media.events_dropped + report.chunks.events_dropped;
    if dropped > 0 || report.events_discarded > 0 {
        eprintln!(
            "  {}    {} dropped, {} discarded at teardown",
            "Events:".dimmed(),
            dropped.yellow(),
            report.events_discarded
        );
    }
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config)
/// 2. Default config path (~/.config/ivs/config.toml)
/// 3. Built-in defaults with environment variable overrides
fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        Config::load(path)?
    } else {
        Config::load_or_default(&Config::default_path())?
    };

    Ok(config.with_env_overrides())
}

fn handle_config_command(action: ConfigAction, custom_path: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(custom_path)?;
            print!("{}", config.to_toml()?);
        }
        ConfigAction::Path => {
            let path = custom_path
                .map(PathBuf::from)
                .unwrap_or_else(Config::default_path);
            println!("{}", path.display());
        }
    }
    Ok(())
}
