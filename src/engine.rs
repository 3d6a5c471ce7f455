//! Process-wide owner of the session core.
//!
//! The engine holds what outlives a single call (configuration, registry,
//! shutdown flag, job runner, players) and drives each call through its
//! lifecycle on the calling thread.

use crate::audio::codec::CodecKind;
use crate::audio::vad::{EnergyVad, EnergyVadConfig};
use crate::audio::wav::{ChunkMaterializer, FileMaterializer};
use crate::config::Config;
use crate::console::RegistryConsole;
use crate::defaults;
use crate::error::{IvsError, Result};
use crate::events::{ChunkData, Event, EventKind};
use crate::jobs::{HttpClient, JobRunner, NlpClient};
use crate::pipeline::{
    ChunkStats, ChunkWorker, ErrorReporter, LogReporter, MediaLoop, MediaSink, MediaSource,
    MediaStats, Pacing, SharedLine, WorkerRunner,
};
use crate::playback::{PlayerTable, WavPlayer};
use crate::session::{CallInfo, Lease, MediaParams, Registry, RegistryHandle, Session};
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;

/// Longest wait for the chunk loop to consume the outbound tail after hangup.
const OUTBOUND_SETTLE: Duration = Duration::from_millis(500);

/// The script side of a call. Runs on its own thread with a session lease.
pub trait ScriptHost: Send + 'static {
    fn run(&mut self, lease: Lease);
}

/// One call to run.
#[derive(Debug, Clone)]
pub struct CallSpec {
    pub id: String,
    pub call: CallInfo,
    pub media: MediaParams,
    pub pacing: Pacing,
}

impl CallSpec {
    pub fn new(call: CallInfo, media: MediaParams) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            call,
            media,
            pacing: Pacing::Realtime,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }
}

/// Outcome of [`Engine::run_call`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallReport {
    pub session_id: String,
    pub media: MediaStats,
    pub chunks: ChunkStats,
    /// Events still queued when the session was torn down.
    pub events_discarded: usize,
}

pub struct Engine {
    config: Config,
    registry: RegistryHandle,
    runner: JobRunner,
    shutdown: Arc<AtomicBool>,
    players: PlayerTable,
    materializer: Arc<dyn ChunkMaterializer>,
    reporter: Arc<dyn ErrorReporter>,
    nlp: Option<Arc<NlpClient>>,
}

impl Engine {
    /// Build the engine on `runtime`.
    pub fn new(config: Config, runtime: Handle) -> Result<Self> {
        config.validate()?;
        let registry = Registry::spawn_on(&runtime);
        let materializer: Arc<dyn ChunkMaterializer> =
            Arc::new(FileMaterializer::new(config.audio.effective_chunk_dir()));

        let engine = Self {
            registry,
            runner: JobRunner::new(runtime),
            shutdown: Arc::new(AtomicBool::new(false)),
            players: PlayerTable::default(),
            materializer,
            reporter: Arc::new(LogReporter),
            nlp: None,
            config,
        };

        #[cfg(feature = "http")]
        let engine = {
            let client = crate::jobs::ReqwestClient::new(&engine.config.http)?;
            engine.with_http_client(Arc::new(client))
        };

        Ok(engine)
    }

    /// Route NLP and transcription jobs through `client`.
    pub fn with_http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.nlp = Some(Arc::new(NlpClient::new(
            client,
            self.config.nlp.clone(),
            self.config.http.log_http_errors,
        )));
        self
    }

    pub fn with_materializer(mut self, materializer: Arc<dyn ChunkMaterializer>) -> Self {
        self.materializer = materializer;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    pub fn runner(&self) -> &JobRunner {
        &self.runner
    }

    pub fn players(&self) -> &PlayerTable {
        &self.players
    }

    pub fn nlp(&self) -> Option<&Arc<NlpClient>> {
        self.nlp.as_ref()
    }

    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Console handler bound to this engine's sessions.
    pub fn console(&self) -> RegistryConsole {
        RegistryConsole::new(
            self.registry.clone(),
            self.runner.clone(),
            self.players.clone(),
        )
    }

    /// Stop every call: raise the shutdown flag and mark all sessions for
    /// destruction.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Shutting down");
        let registry = self.registry.clone();
        self.runner.runtime().spawn(async move {
            let sessions = registry.request_destroy_all().await;
            tracing::debug!(sessions, "Destroy requested for all sessions");
        });
    }

    /// Run one call to completion on the calling thread.
    ///
    /// Blocks until the source hangs up or the session is killed, then tears
    /// the session down. Must not be called from inside the runtime.
    pub fn run_call(
        &self,
        spec: CallSpec,
        source: Box<dyn MediaSource>,
        sink: Arc<dyn MediaSink>,
        codec: CodecKind,
        host: Box<dyn ScriptHost>,
    ) -> Result<CallReport> {
        let media = spec.media;
        let session = Session::builder(spec.id.clone(), media)
            .with_call(spec.call)
            .with_config(&self.config)
            .with_shutdown_flag(self.shutdown_flag())
            .build();
        session.open();

        if !self.registry.blocking_insert(Arc::clone(&session)) {
            return Err(IvsError::SessionExists { id: spec.id });
        }

        let line = SharedLine::new(source);
        let player = WavPlayer::new(media, codec, Arc::clone(&sink))
            .with_line(line.clone())
            .with_pacing(spec.pacing);
        self.players.insert(session.id(), Arc::new(player));

        let vad_config =
            EnergyVadConfig::from_settings(&self.config.vad, media.samplerate, media.channels);
        self.log_joined(&session, codec, &vad_config);

        let workers = self.spawn_workers(&session, host);
        let media_stats = match &workers {
            Ok(_) => {
                let mut media_loop = MediaLoop::new(
                    media,
                    codec,
                    Box::new(line),
                    sink,
                    Box::new(EnergyVad::new(vad_config)),
                )
                .with_cng_level(self.config.audio.cng_level)
                .with_pacing(spec.pacing);
                let stats = media_loop.run(&session);
                settle_outbound(&session);
                stats
            }
            Err(_) => MediaStats::default(),
        };

        let events_discarded = session.close();
        self.registry.blocking_remove(session.id());
        self.players.remove(session.id());

        let (chunker, script) = workers?;
        let chunks = match chunker.join() {
            Ok(worker) => worker.stats(),
            Err(e) => {
                tracing::error!(session = %session.id(), "{e}");
                ChunkStats::default()
            }
        };
        if script.join().is_err() {
            tracing::error!(session = %session.id(), "Script host thread panicked");
        }

        tracing::debug!(
            session = %session.id(),
            frames = media_stats.frames,
            chunks = chunks.flushed,
            events_discarded,
            "Call finished"
        );

        Ok(CallReport {
            session_id: session.id().to_string(),
            media: media_stats,
            chunks,
            events_discarded,
        })
    }

    fn spawn_workers(
        &self,
        session: &Arc<Session>,
        mut host: Box<dyn ScriptHost>,
    ) -> Result<(WorkerRunner<ChunkWorker>, thread::JoinHandle<()>)> {
        let not_ready = || IvsError::SessionNotReady {
            id: session.id().to_string(),
        };

        let lease = Session::take(session).ok_or_else(not_ready)?;
        let chunker = WorkerRunner::spawn(
            ChunkWorker::new(Arc::clone(&self.materializer)),
            lease,
            Arc::clone(&self.reporter),
        )?;

        let lease = Session::take(session).ok_or_else(not_ready)?;
        let script = thread::Builder::new()
            .name("ivs-script".to_string())
            .spawn(move || host.run(lease))?;

        Ok((chunker, script))
    }

    fn log_joined(&self, session: &Session, codec: CodecKind, vad: &EnergyVadConfig) {
        let call = session.call();
        let media = session.media();
        tracing::debug!(
            session = %session.id(),
            script = %call.script_name,
            caller = %call.caller_number,
            called = %call.called_number,
            codec = ?codec,
            samplerate = media.samplerate,
            channels = media.channels,
            ptime_ms = media.ptime_ms,
            encoded_bytes = media.encoded_bytes_per_packet,
            decoded_bytes = media.decoded_bytes_per_packet,
            vad_voice_ms = vad.voice_ms,
            vad_silence_ms = vad.silence_ms,
            vad_threshold = vad.threshold,
            chunk_bytes = session.chunk_buffer_size(),
            cng_level = self.config.audio.cng_level,
            "Session joined"
        );
    }
}

/// Give the chunk loop a bounded chance to consume what the media loop left.
fn settle_outbound(session: &Session) {
    let started = Instant::now();
    while !session.outbound().is_empty() && started.elapsed() < OUTBOUND_SETTLE {
        thread::sleep(Duration::from_millis(defaults::CHUNK_POLL_MS));
    }
    // One more round so a pending flush can run.
    thread::sleep(Duration::from_millis(defaults::CHUNK_POLL_MS * 2));
}

/// Script host that prints every event as a JSON line.
///
/// Optionally starts a transcription job for each chunk written to a file.
pub struct EventPrinter<W: Write + Send + 'static> {
    out: W,
    transcribe: Option<(JobRunner, Arc<NlpClient>)>,
    poll: Duration,
}

impl<W: Write + Send + 'static> EventPrinter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            transcribe: None,
            poll: Duration::from_millis(defaults::EVENT_POLL_MS),
        }
    }

    pub fn with_transcription(mut self, runner: JobRunner, nlp: Arc<NlpClient>) -> Self {
        self.transcribe = Some((runner, nlp));
        self
    }

    fn handle(&mut self, lease: &Lease, event: Event) {
        match event.to_json() {
            Ok(line) => {
                if let Err(e) = writeln!(self.out, "{line}") {
                    tracing::warn!("Failed to write event: {e}");
                }
            }
            Err(e) => tracing::warn!(event = event.name(), "Failed to serialize event: {e}"),
        }

        if let (Some((runner, nlp)), EventKind::ChunkReady(chunk)) = (&self.transcribe, &event.kind)
            && let ChunkData::File(path) = &chunk.data
        {
            let jid = nlp.transcribe_async(runner, lease.session(), path.clone(), false);
            tracing::debug!(session = %lease.id(), jid, path = %path.display(), "Transcription started");
        }
    }
}

impl<W: Write + Send + 'static> ScriptHost for EventPrinter<W> {
    fn run(&mut self, lease: Lease) {
        while !lease.is_interrupted() {
            while let Some(event) = lease.events().try_pop() {
                self.handle(&lease, event);
            }
            thread::sleep(self.poll);
        }
        // Teardown waits for this lease, so the queue is still intact.
        while let Some(event) = lease.events().try_pop() {
            self.handle(&lease, event);
        }
        if let Err(e) = self.out.flush() {
            tracing::warn!("Failed to flush event output: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::wav::WavSource;
    use crate::pipeline::NullSink;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap()
    }

    fn engine(runtime: &tokio::runtime::Runtime, dir: &TempDir) -> Engine {
        let mut config = Config::default();
        config.audio.chunk_dir = Some(dir.path().to_path_buf());
        Engine::new(config, runtime.handle().clone()).unwrap()
    }

    /// 8 kHz: `lead` ms silence, `voice` ms tone, `tail` ms silence.
    fn burst(lead: usize, voice: usize, tail: usize) -> Vec<i16> {
        let per_ms = 8;
        let mut samples = vec![0i16; lead * per_ms];
        samples.extend((0..voice * per_ms).map(|i| if i % 2 == 0 { 3000 } else { -3000 }));
        samples.extend(std::iter::repeat_n(0i16, tail * per_ms));
        samples
    }

    #[derive(Clone, Default)]
    struct SharedOut(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedOut {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn call_runs_to_hangup_and_reports() {
        let runtime = runtime();
        let dir = TempDir::new().unwrap();
        let engine = engine(&runtime, &dir);
        let media = MediaParams::l16(8000, 1, 20);
        let source = WavSource::from_samples(burst(400, 1000, 1500), &media, CodecKind::L16);
        let out = SharedOut::default();

        let report = engine
            .run_call(
                CallSpec::new(CallInfo::new("demo", "100", "200"), media)
                    .with_pacing(Pacing::Accelerated(20)),
                Box::new(source),
                Arc::new(NullSink),
                CodecKind::L16,
                Box::new(EventPrinter::new(out.clone())),
            )
            .unwrap();

        assert_eq!(report.media.frames, 145);
        assert!(report.media.segments > 0);
        assert!(report.chunks.flushed >= 1);

        let printed = String::from_utf8(out.0.lock().unwrap().clone()).unwrap();
        let types: Vec<String> = printed
            .lines()
            .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["type"].to_string())
            .collect();
        assert!(types.contains(&"\"speaking-start\"".to_string()));
        assert!(types.contains(&"\"speaking-stop\"".to_string()));
        assert!(types.contains(&"\"chunk-ready\"".to_string()));

        assert_eq!(runtime.block_on(engine.registry().len()), 0);
        assert!(engine.players().get(&report.session_id).is_none());
    }

    #[test]
    fn duplicate_session_id_is_rejected() {
        let runtime = runtime();
        let dir = TempDir::new().unwrap();
        let engine = engine(&runtime, &dir);
        let media = MediaParams::l16(8000, 1, 20);

        let existing = Session::builder("dup", media).build();
        existing.open();
        assert!(engine.registry().blocking_insert(existing));

        let result = engine.run_call(
            CallSpec::new(CallInfo::new("demo", "1", "2"), media).with_id("dup"),
            Box::new(WavSource::from_samples(vec![0; 160], &media, CodecKind::L16)),
            Arc::new(NullSink),
            CodecKind::L16,
            Box::new(EventPrinter::new(std::io::sink())),
        );
        assert!(matches!(result, Err(IvsError::SessionExists { .. })));
    }

    #[test]
    fn shutdown_stops_running_call() {
        let runtime = runtime();
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(engine(&runtime, &dir));
        let media = MediaParams::l16(8000, 1, 20);
        // One minute of silence at real time would outlast the test.
        let source = WavSource::from_samples(vec![0; 8000 * 60], &media, CodecKind::L16);

        let call = {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                engine.run_call(
                    CallSpec::new(CallInfo::new("demo", "1", "2"), media),
                    Box::new(source),
                    Arc::new(NullSink),
                    CodecKind::L16,
                    Box::new(EventPrinter::new(std::io::sink())),
                )
            })
        };

        thread::sleep(Duration::from_millis(100));
        engine.shutdown();
        assert!(engine.is_shutdown());

        let report = call.join().unwrap().unwrap();
        assert!(report.media.frames < 3000);
    }

    #[test]
    fn call_spec_defaults() {
        let spec = CallSpec::new(CallInfo::new("s", "1", "2"), MediaParams::pcmu(8000, 20));
        assert_eq!(spec.pacing, Pacing::Realtime);
        assert!(uuid::Uuid::parse_str(&spec.id).is_ok());
    }
}
