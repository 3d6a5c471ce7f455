//! Prompt playback into a call.
//!
//! The player itself is a collaborator (the telephony core, or [`WavPlayer`]
//! for simulated calls). This module owns the session side: the playback
//! flag, the break request, the started/finished events and the async job
//! variants.

use crate::audio::codec::CodecKind;
use crate::audio::segment::{AudioSegment, samples_to_bytes};
use crate::audio::wav::read_pcm;
use crate::defaults;
use crate::error::{IvsError, Result};
use crate::events::{Event, EventKind};
use crate::jobs::JobRunner;
use crate::pipeline::media::{MediaRead, MediaSink, Pacer, Pacing, SharedLine};
use crate::session::{JID_NONE, JobId, Lease, MediaParams, Session, SessionSettings};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Label used in playback events for synthesized speech.
const SAY_LABEL: &str = "SAY";

/// What to play.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackTarget {
    File(PathBuf),
    Url(String),
    Say {
        engine: String,
        language: String,
        text: String,
    },
}

impl PlaybackTarget {
    /// Classify a playback path: `say://text`, any other `scheme://`, or a
    /// local file that must exist.
    pub fn resolve(path: &str, settings: &SessionSettings) -> Result<Self> {
        if let Some(text) = path
            .get(..6)
            .filter(|scheme| scheme.eq_ignore_ascii_case("say://"))
            .and_then(|_| path.get(6..))
        {
            return Self::say(settings, None, text);
        }
        if path.contains("://") {
            return Ok(Self::Url(path.to_string()));
        }
        let file = PathBuf::from(path);
        if !file.is_file() {
            tracing::error!(path, "File not found");
            return Err(IvsError::PlaybackNotFound {
                path: path.to_string(),
            });
        }
        Ok(Self::File(file))
    }

    /// Speech target. Engine comes from the session; language from the
    /// argument, falling back to the session.
    pub fn say(settings: &SessionSettings, language: Option<&str>, text: &str) -> Result<Self> {
        if text.is_empty() {
            return Err(IvsError::Playback {
                message: "nothing to say".to_string(),
            });
        }
        let engine = settings.tts_engine.clone().ok_or_else(|| {
            tracing::error!("tts-engine not defined");
            IvsError::Playback {
                message: "tts-engine not defined".to_string(),
            }
        })?;
        let language = language
            .map(str::to_string)
            .or_else(|| settings.language.clone())
            .ok_or_else(|| {
                tracing::error!("language not defined");
                IvsError::Playback {
                    message: "language not defined".to_string(),
                }
            })?;
        Ok(Self::Say {
            engine,
            language,
            text: text.to_string(),
        })
    }

    fn label(&self) -> String {
        match self {
            PlaybackTarget::File(path) => path.display().to_string(),
            PlaybackTarget::Url(url) => url.clone(),
            PlaybackTarget::Say { .. } => SAY_LABEL.to_string(),
        }
    }
}

/// Session view handed to a [`Player`] while it plays.
pub struct PlaybackContext<'a> {
    session: &'a Session,
}

impl<'a> PlaybackContext<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Session {
        self.session
    }

    /// True once a break was requested or the session is going away.
    pub fn should_stop(&self) -> bool {
        self.session.is_playback_break() || self.session.is_interrupted()
    }

    /// Hand a frame read from the line during playback to the media loop.
    pub fn feed_inbound(&self, frame: Vec<u8>) -> bool {
        if frame.is_empty() {
            return false;
        }
        let media = self.session.media();
        self.session
            .inbound()
            .push_or_drop(AudioSegment::new(frame, media.samplerate, media.channels))
    }
}

/// Plays one target into the call, returning when done or told to stop.
pub trait Player: Send + Sync {
    fn play(&self, ctx: &PlaybackContext<'_>, target: &PlaybackTarget) -> Result<()>;
}

fn not_ready(session: &Session) -> IvsError {
    IvsError::SessionNotReady {
        id: session.id().to_string(),
    }
}

fn emit(lease: &Lease, jid: JobId, kind: EventKind) {
    lease.emit_event(Event::for_job(jid, kind));
}

/// Run a resolved target on a leased session.
fn play_leased(
    player: &dyn Player,
    lease: &Lease,
    target: &PlaybackTarget,
    jid: JobId,
) -> Result<()> {
    if lease.is_playing() {
        stop_playback(lease.session())?;
    }

    lease.set_playing(true);
    let file = target.label();
    emit(lease, jid, EventKind::PlaybackStarted { file: file.clone() });

    let result = player.play(&PlaybackContext::new(lease), target);
    if let Err(e) = &result {
        tracing::warn!(session = %lease.id(), file, "Playback failed: {e}");
    }

    lease.set_playing(false);
    emit(lease, jid, EventKind::PlaybackFinished { file });
    result
}

/// Play a file or URL and wait for it to finish.
pub fn playback(player: &dyn Player, session: &Arc<Session>, path: &str) -> Result<()> {
    let lease = Session::take(session).ok_or_else(|| not_ready(session))?;
    let target = PlaybackTarget::resolve(path, &lease.settings())?;
    play_leased(player, &lease, &target, JID_NONE)
}

/// Speak `text` with the session's TTS engine and wait for it to finish.
pub fn say(
    player: &dyn Player,
    session: &Arc<Session>,
    language: Option<&str>,
    text: &str,
) -> Result<()> {
    let lease = Session::take(session).ok_or_else(|| not_ready(session))?;
    let target = PlaybackTarget::say(&lease.settings(), language, text)?;
    play_leased(player, &lease, &target, JID_NONE)
}

/// Start playback as a job. Both playback events carry the job id.
/// With `delete_after` the file is removed once played.
pub fn playback_async(
    runner: &JobRunner,
    player: Arc<dyn Player>,
    session: &Arc<Session>,
    path: String,
    delete_after: bool,
) -> JobId {
    runner.submit_blocking(session, "playback", move |jid, lease| {
        let target = PlaybackTarget::resolve(&path, &lease.settings());
        let outcome = target.and_then(|target| play_leased(player.as_ref(), lease, &target, jid));
        if let Err(e) = outcome {
            tracing::debug!(session = %lease.id(), jid, path = %path, "Async playback ended: {e}");
        }
        if delete_after && let Err(e) = std::fs::remove_file(&path) {
            tracing::warn!(path = %path, "Failed to delete played file: {e}");
        }
        None
    })
}

/// Start speech as a job.
pub fn say_async(
    runner: &JobRunner,
    player: Arc<dyn Player>,
    session: &Arc<Session>,
    language: Option<String>,
    text: String,
) -> JobId {
    runner.submit_blocking(session, "say", move |jid, lease| {
        let target = PlaybackTarget::say(&lease.settings(), language.as_deref(), &text);
        let outcome = target.and_then(|target| play_leased(player.as_ref(), lease, &target, jid));
        if let Err(e) = outcome {
            tracing::debug!(session = %lease.id(), jid, "Async say ended: {e}");
        }
        None
    })
}

/// Interrupt the running playback and wait for the player to return.
pub fn stop_playback(session: &Arc<Session>) -> Result<()> {
    stop_playback_with(
        session,
        defaults::PLAYBACK_STOP_ATTEMPTS,
        Duration::from_millis(defaults::PLAYBACK_STOP_POLL_MS),
    )
}

pub(crate) fn stop_playback_with(
    session: &Arc<Session>,
    attempts: u32,
    poll: Duration,
) -> Result<()> {
    let Some(lease) = Session::take(session) else {
        return Ok(());
    };
    if !lease.is_playing() {
        return Ok(());
    }

    lease.request_playback_break();
    let mut waited = 0;
    while lease.is_playing() {
        if lease.is_shutdown() || lease.guard().is_destroyed() {
            break;
        }
        if waited >= attempts {
            tracing::warn!(session = %lease.id(), "Couldn't stop playback");
            return Err(IvsError::Playback {
                message: "couldn't stop playback".to_string(),
            });
        }
        waited += 1;
        std::thread::sleep(poll);
    }
    Ok(())
}

/// Plays WAV files into a [`MediaSink`] at packet cadence.
///
/// While playing it also owns the line: frames read from it go to the
/// session's inbound queue so the classifier keeps hearing the caller.
pub struct WavPlayer {
    media: MediaParams,
    codec: CodecKind,
    sink: Arc<dyn MediaSink>,
    line: Option<SharedLine>,
    pacing: Pacing,
}

impl WavPlayer {
    pub fn new(media: MediaParams, codec: CodecKind, sink: Arc<dyn MediaSink>) -> Self {
        Self {
            media,
            codec,
            sink,
            line: None,
            pacing: Pacing::Realtime,
        }
    }

    pub fn with_line(mut self, line: SharedLine) -> Self {
        self.line = Some(line);
        self
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    /// Drop whatever the line buffered before the prompt starts.
    fn flush_line(&self) {
        let Some(line) = &self.line else { return };
        for _ in 0..defaults::PLAYBACK_FLUSH_FRAMES {
            if line.read() == MediaRead::Hangup {
                break;
            }
        }
    }

    fn play_file(&self, ctx: &PlaybackContext<'_>, path: &Path) -> Result<()> {
        let samples = read_pcm(path, self.media.samplerate)?;
        let per_packet = MediaParams::samples_per_packet(self.media.samplerate, self.media.ptime_ms)
            .max(1);
        let mut encoder = self.codec.build();
        let mut pacer = Pacer::new(self.pacing, self.media.ptime_ms);
        let mut pcm = Vec::with_capacity(per_packet * 2);
        let mut frame = Vec::with_capacity(per_packet * 2);

        self.flush_line();

        for packet in samples.chunks(per_packet) {
            if ctx.should_stop() {
                tracing::debug!(session = %ctx.session().id(), "Playback interrupted");
                break;
            }

            pcm.clear();
            samples_to_bytes(packet, &mut pcm);
            pcm.resize(per_packet * 2, 0);
            frame.clear();
            encoder.encode(&pcm, &mut frame)?;
            self.sink.write_frame(&frame)?;

            if let Some(line) = &self.line {
                match line.read() {
                    MediaRead::Frame(data) => {
                        ctx.feed_inbound(data);
                    }
                    MediaRead::Hangup => break,
                    MediaRead::Cng | MediaRead::Empty => {}
                }
            }

            pacer.wait();
        }
        Ok(())
    }
}

impl Player for WavPlayer {
    fn play(&self, ctx: &PlaybackContext<'_>, target: &PlaybackTarget) -> Result<()> {
        match target {
            PlaybackTarget::File(path) => self.play_file(ctx, path),
            PlaybackTarget::Url(url) => Err(IvsError::Playback {
                message: format!("cannot fetch {url}: URL playback needs the telephony core"),
            }),
            PlaybackTarget::Say { engine, .. } => Err(IvsError::Playback {
                message: format!("TTS engine '{engine}' is not available"),
            }),
        }
    }
}

/// Players of the calls currently running, by session id.
#[derive(Clone, Default)]
pub struct PlayerTable {
    inner: Arc<Mutex<HashMap<String, Arc<dyn Player>>>>,
}

impl PlayerTable {
    pub fn insert(&self, session_id: &str, player: Arc<dyn Player>) {
        self.lock().insert(session_id.to_string(), player);
    }

    pub fn remove(&self, session_id: &str) -> Option<Arc<dyn Player>> {
        self.lock().remove(session_id)
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<dyn Player>> {
        self.lock().get(session_id).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<dyn Player>>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
