//! Voice sessions: identity, media parameters, shared flags and queues.
//!
//! A [`Session`] is created by the call-handling context, which owns it for
//! the lifetime of the call. Every other component works through a
//! [`Lease`] obtained with [`Session::take`].

pub mod guard;
pub mod job_id;
pub mod registry;

use crate::audio::vad::VadState;
use crate::config::{ChunkType, Config};
use crate::defaults;
use crate::events::{AudioQueue, Event, EventKind, EventQueue};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

pub use guard::{Lease, SessionGuard};
pub use job_id::{JID_NONE, JobId, JobIdGenerator};
pub use registry::{Registry, RegistryHandle, SessionSummary};

/// Who called whom, and which script handles the call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallInfo {
    pub script_name: String,
    pub caller_number: String,
    pub called_number: String,
    /// Unix seconds at session creation.
    pub start_ts: u64,
}

impl CallInfo {
    pub fn new(
        script_name: impl Into<String>,
        caller_number: impl Into<String>,
        called_number: impl Into<String>,
    ) -> Self {
        Self {
            script_name: script_name.into(),
            caller_number: caller_number.into(),
            called_number: called_number.into(),
            start_ts: unix_now(),
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Negotiated media parameters of the call leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MediaParams {
    pub samplerate: u32,
    pub channels: u16,
    pub ptime_ms: u32,
    pub encoded_bytes_per_packet: usize,
    pub decoded_bytes_per_packet: usize,
}

impl MediaParams {
    /// Samples per channel in one packet.
    pub fn samples_per_packet(samplerate: u32, ptime_ms: u32) -> usize {
        (samplerate as usize * ptime_ms as usize) / 1000
    }

    /// Linear 16-bit PCM on the wire.
    pub fn l16(samplerate: u32, channels: u16, ptime_ms: u32) -> Self {
        let bytes = Self::samples_per_packet(samplerate, ptime_ms) * channels as usize * 2;
        Self {
            samplerate,
            channels,
            ptime_ms,
            encoded_bytes_per_packet: bytes,
            decoded_bytes_per_packet: bytes,
        }
    }

    /// G.711 µ-law on the wire (mono, one byte per sample).
    pub fn pcmu(samplerate: u32, ptime_ms: u32) -> Self {
        let samples = Self::samples_per_packet(samplerate, ptime_ms);
        Self {
            samplerate,
            channels: 1,
            ptime_ms,
            encoded_bytes_per_packet: samples,
            decoded_bytes_per_packet: samples * 2,
        }
    }
}

/// Script-facing mutable fields, guarded by the session mutex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub language: Option<String>,
    pub tts_engine: Option<String>,
    pub asr_engine: Option<String>,
    pub chunk_type: ChunkType,
    chunk_file_ext: String,
    chunk_file_ext_changed: bool,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            language: config.engines.default_language.clone(),
            tts_engine: config.engines.default_tts_engine.clone(),
            asr_engine: config.engines.default_asr_engine.clone(),
            chunk_type: config.audio.chunk_type,
            chunk_file_ext: config.audio.chunk_file_ext.clone(),
            chunk_file_ext_changed: false,
        }
    }

    pub fn chunk_file_ext(&self) -> &str {
        &self.chunk_file_ext
    }

    pub fn set_chunk_file_ext(&mut self, ext: impl Into<String>) {
        let ext = ext.into();
        if ext != self.chunk_file_ext {
            self.chunk_file_ext = ext;
            self.chunk_file_ext_changed = true;
        }
    }

    /// Chunk mode plus extension for the chunk loop.
    ///
    /// `cached` is the loop's own copy of the extension; it is refreshed
    /// only when empty or when the extension changed since the last call.
    pub fn chunk_snapshot(&mut self, cached: &mut Option<String>) -> ChunkType {
        if cached.is_none() || self.chunk_file_ext_changed {
            *cached = Some(self.chunk_file_ext.clone());
            self.chunk_file_ext_changed = false;
        }
        self.chunk_type
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// One live call.
pub struct Session {
    id: String,
    call: CallInfo,
    media: MediaParams,
    chunk_buffer_size: usize,
    guard: SessionGuard,
    job_ids: JobIdGenerator,
    settings: Mutex<SessionSettings>,
    vad_state: AtomicU8,
    interrupt: AtomicBool,
    playback: AtomicBool,
    playback_break: AtomicBool,
    shutdown: Arc<AtomicBool>,
    inbound: AudioQueue,
    outbound: AudioQueue,
    events: EventQueue,
}

impl Session {
    pub fn builder(id: impl Into<String>, media: MediaParams) -> SessionBuilder {
        SessionBuilder::new(id, media)
    }

    /// Acquire a lease. `None` when the session is not ready or is being destroyed.
    pub fn take(this: &Arc<Session>) -> Option<Lease> {
        if this.guard.take() {
            Some(Lease::adopt(Arc::clone(this)))
        } else {
            None
        }
    }

    /// Start accepting leases.
    pub fn open(&self) {
        self.guard.mark_ready();
    }

    /// Ask every loop working on this session to stop at its next checkpoint.
    pub fn request_destroy(&self) {
        self.guard.request_destroy();
    }

    /// Tear the session down: stop leasing, wait for every lease to be
    /// released, then free the queued audio and events.
    ///
    /// Returns the number of events that were still queued. Idempotent.
    pub fn close(&self) -> usize {
        self.guard.begin_teardown();
        if self.guard.is_destroyed() {
            return 0;
        }
        let waited = self.guard.drain_default(&self.id);
        let audio = self.inbound.drain_and_destroy() + self.outbound.drain_and_destroy();
        let events = self.events.drain_and_destroy();
        tracing::debug!(
            session = %self.id,
            waited_ms = waited.as_millis() as u64,
            audio_segments = audio,
            events,
            "Session destroyed"
        );
        events
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn call(&self) -> &CallInfo {
        &self.call
    }

    pub fn media(&self) -> &MediaParams {
        &self.media
    }

    /// Flush threshold of the chunk loop, in bytes.
    pub fn chunk_buffer_size(&self) -> usize {
        self.chunk_buffer_size
    }

    pub fn guard(&self) -> &SessionGuard {
        &self.guard
    }

    pub fn next_job_id(&self) -> JobId {
        self.job_ids.next_id()
    }

    pub fn settings(&self) -> MutexGuard<'_, SessionSettings> {
        self.settings.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn vad_state(&self) -> VadState {
        VadState::from_u8(self.vad_state.load(Ordering::Acquire))
    }

    pub fn set_vad_state(&self, state: VadState) {
        self.vad_state.store(state as u8, Ordering::Release);
    }

    pub fn set_interrupt(&self, on: bool) {
        self.interrupt.store(on, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Cooperative stop condition for script and playback loops.
    pub fn is_interrupted(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
            || self.is_shutdown()
            || self.guard.is_destroy_requested()
            || !self.guard.is_ready()
    }

    /// Whether the media and chunk loops should keep running.
    pub fn is_active(&self) -> bool {
        !self.is_shutdown() && self.guard.is_ready() && !self.guard.is_destroy_requested()
    }

    pub fn is_playing(&self) -> bool {
        self.playback.load(Ordering::SeqCst)
    }

    pub(crate) fn set_playing(&self, on: bool) {
        if !on {
            self.playback_break.store(false, Ordering::SeqCst);
        }
        self.playback.store(on, Ordering::SeqCst);
    }

    pub(crate) fn request_playback_break(&self) {
        self.playback_break.store(true, Ordering::SeqCst);
    }

    pub fn is_playback_break(&self) -> bool {
        self.playback_break.load(Ordering::SeqCst)
    }

    pub fn inbound(&self) -> &AudioQueue {
        &self.inbound
    }

    pub fn outbound(&self) -> &AudioQueue {
        &self.outbound
    }

    pub fn events(&self) -> &EventQueue {
        &self.events
    }

    /// Push a job-less event, dropping it when the queue is full.
    pub fn emit(&self, kind: EventKind) -> bool {
        self.emit_event(Event::new(kind))
    }

    pub fn emit_event(&self, event: Event) -> bool {
        match self.events.push(event) {
            Ok(()) => true,
            Err(full) => {
                let event = full.into_inner();
                tracing::debug!(
                    session = %self.id,
                    event = event.name(),
                    jid = event.jid,
                    "Event queue full, dropping event"
                );
                false
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("media", &self.media)
            .field("leases", &self.guard.lease_count())
            .finish()
    }
}

/// Builder for [`Session`].
pub struct SessionBuilder {
    id: String,
    media: MediaParams,
    call: Option<CallInfo>,
    settings: SessionSettings,
    chunk_len_sec: u32,
    shutdown: Option<Arc<AtomicBool>>,
}

impl SessionBuilder {
    pub fn new(id: impl Into<String>, media: MediaParams) -> Self {
        Self {
            id: id.into(),
            media,
            call: None,
            settings: SessionSettings::default(),
            chunk_len_sec: defaults::CHUNK_LEN_SEC,
            shutdown: None,
        }
    }

    pub fn with_call(mut self, call: CallInfo) -> Self {
        self.call = Some(call);
        self
    }

    /// Seed settings and chunk length from the configuration.
    pub fn with_config(mut self, config: &Config) -> Self {
        self.settings = SessionSettings::from_config(config);
        self.chunk_len_sec = config.audio.effective_chunk_len_sec();
        self
    }

    pub fn with_settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_chunk_len_sec(mut self, secs: u32) -> Self {
        self.chunk_len_sec = if secs == 0 {
            defaults::CHUNK_LEN_SEC
        } else {
            secs
        };
        self
    }

    /// Share the process-wide shutdown flag.
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = Some(flag);
        self
    }

    pub fn build(self) -> Arc<Session> {
        let chunk_buffer_size = self.chunk_len_sec as usize
            * self.media.samplerate as usize
            * std::mem::size_of::<i16>();

        Arc::new(Session {
            call: self
                .call
                .unwrap_or_else(|| CallInfo::new("", "", "")),
            id: self.id,
            media: self.media,
            chunk_buffer_size,
            guard: SessionGuard::new(),
            job_ids: JobIdGenerator::new(),
            settings: Mutex::new(self.settings),
            vad_state: AtomicU8::new(VadState::None as u8),
            interrupt: AtomicBool::new(false),
            playback: AtomicBool::new(false),
            playback_break: AtomicBool::new(false),
            shutdown: self
                .shutdown
                .unwrap_or_else(|| Arc::new(AtomicBool::new(false))),
            inbound: AudioQueue::for_audio(),
            outbound: AudioQueue::for_audio(),
            events: EventQueue::for_events(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::segment::AudioSegment;
    use std::thread;
    use std::time::Duration;

    fn open_session() -> Arc<Session> {
        let session = Session::builder("sess-1", MediaParams::l16(8000, 1, 20))
            .with_call(CallInfo::new("welcome.js", "100", "200"))
            .build();
        session.open();
        session
    }

    #[test]
    fn media_params_l16_sizes() {
        let media = MediaParams::l16(8000, 1, 20);
        assert_eq!(media.encoded_bytes_per_packet, 320);
        assert_eq!(media.decoded_bytes_per_packet, 320);
    }

    #[test]
    fn media_params_pcmu_sizes() {
        let media = MediaParams::pcmu(8000, 20);
        assert_eq!(media.encoded_bytes_per_packet, 160);
        assert_eq!(media.decoded_bytes_per_packet, 320);
    }

    #[test]
    fn chunk_buffer_size_from_chunk_len() {
        let session = Session::builder("s", MediaParams::l16(8000, 1, 20))
            .with_chunk_len_sec(15)
            .build();
        assert_eq!(session.chunk_buffer_size(), 240_000);
    }

    #[test]
    fn zero_chunk_len_uses_default() {
        let session = Session::builder("s", MediaParams::l16(16000, 1, 20))
            .with_chunk_len_sec(0)
            .build();
        assert_eq!(
            session.chunk_buffer_size(),
            defaults::CHUNK_LEN_SEC as usize * 16000 * 2
        );
    }

    #[test]
    fn lease_counts_and_releases_on_drop() {
        let session = open_session();
        let lease = Session::take(&session).unwrap();
        assert_eq!(session.guard().lease_count(), 1);
        let second = lease.try_clone().unwrap();
        assert_eq!(session.guard().lease_count(), 2);
        drop(lease);
        second.release();
        assert_eq!(session.guard().lease_count(), 0);
    }

    #[test]
    fn take_fails_until_open() {
        let session = Session::builder("s", MediaParams::l16(8000, 1, 20)).build();
        assert!(Session::take(&session).is_none());
        session.open();
        assert!(Session::take(&session).is_some());
    }

    #[test]
    fn close_waits_for_lease_then_frees_queues() {
        let session = open_session();
        session.emit(EventKind::SpeakingStart);
        session
            .outbound()
            .push(AudioSegment::new(vec![0; 320], 8000, 1))
            .unwrap();
        let lease = Session::take(&session).unwrap();

        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            assert!(!lease.guard().is_destroyed());
            drop(lease);
        });

        assert_eq!(session.close(), 1);
        assert!(session.guard().is_destroyed());
        assert!(session.events().is_empty());
        assert!(session.outbound().is_empty());
        assert_eq!(session.close(), 0);
        worker.join().unwrap();
    }

    #[test]
    fn interrupted_by_flag_destroy_or_shutdown() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let session = Session::builder("s", MediaParams::l16(8000, 1, 20))
            .with_shutdown_flag(Arc::clone(&shutdown))
            .build();
        session.open();
        assert!(!session.is_interrupted());

        session.set_interrupt(true);
        assert!(session.is_interrupted());
        session.set_interrupt(false);

        shutdown.store(true, Ordering::SeqCst);
        assert!(session.is_interrupted());
        assert!(!session.is_active());
        shutdown.store(false, Ordering::SeqCst);

        session.request_destroy();
        assert!(session.is_interrupted());
    }

    #[test]
    fn vad_state_is_shared() {
        let session = open_session();
        assert_eq!(session.vad_state(), VadState::None);
        session.set_vad_state(VadState::StopTalking);
        assert_eq!(session.vad_state(), VadState::StopTalking);
    }

    #[test]
    fn chunk_snapshot_refreshes_only_on_change() {
        let mut settings = SessionSettings::default();
        let mut cached = None;

        assert_eq!(settings.chunk_snapshot(&mut cached), ChunkType::Buffer);
        assert_eq!(cached.as_deref(), Some("wav"));

        settings.set_chunk_file_ext("raw");
        settings.chunk_type = ChunkType::File;
        assert_eq!(settings.chunk_snapshot(&mut cached), ChunkType::File);
        assert_eq!(cached.as_deref(), Some("raw"));

        // A stale cache is kept while nothing changed.
        cached = Some("stale".to_string());
        settings.chunk_snapshot(&mut cached);
        assert_eq!(cached.as_deref(), Some("stale"));
    }

    #[test]
    fn settings_seeded_from_config() {
        let mut config = Config::default();
        config.engines.default_language = Some("de".to_string());
        config.audio.chunk_type = ChunkType::File;
        let session = Session::builder("s", MediaParams::l16(8000, 1, 20))
            .with_config(&config)
            .build();
        let settings = session.settings();
        assert_eq!(settings.language.as_deref(), Some("de"));
        assert_eq!(settings.chunk_type, ChunkType::File);
    }

    #[test]
    fn emit_drops_when_full() {
        let session = open_session();
        for _ in 0..defaults::EVENTS_QUEUE_SIZE {
            assert!(session.emit(EventKind::Nop));
        }
        assert!(!session.emit(EventKind::Nop));
        assert_eq!(session.events().len(), defaults::EVENTS_QUEUE_SIZE);
    }
}
