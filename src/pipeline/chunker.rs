//! Chunk accumulation and flush.
//!
//! Collects voiced segments from the outbound queue and flushes them as one
//! `chunk-ready` event when the chunk reaches its size threshold or when the
//! utterance ends.

use crate::audio::vad::VadState;
use crate::audio::wav::ChunkMaterializer;
use crate::config::ChunkType;
use crate::defaults;
use crate::events::{ChunkData, ChunkReady, EventKind};
use crate::pipeline::error::StationError;
use crate::pipeline::worker::{Step, Worker};
use crate::session::Session;
use std::sync::Arc;
use std::time::Duration;

/// Counters reported when the worker ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkStats {
    pub flushed: u64,
    pub failed: u64,
    pub events_dropped: u64,
    pub bytes_discarded: u64,
}

/// Chunk loop state. The buffer is owned by this worker alone.
pub struct ChunkWorker {
    materializer: Arc<dyn ChunkMaterializer>,
    buffer: Vec<u8>,
    extension: Option<String>,
    poll: Duration,
    stats: ChunkStats,
}

impl ChunkWorker {
    pub fn new(materializer: Arc<dyn ChunkMaterializer>) -> Self {
        Self {
            materializer,
            buffer: Vec::new(),
            extension: None,
            poll: Duration::from_millis(defaults::CHUNK_POLL_MS),
            stats: ChunkStats::default(),
        }
    }

    pub fn with_poll(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn stats(&self) -> ChunkStats {
        self.stats
    }

    /// One round: wait for audio, append everything available, flush when due.
    ///
    /// Returns the number of chunks flushed.
    pub fn poll_once(&mut self, session: &Session) -> usize {
        let mut flushed = 0;

        if let Some(segment) = session.outbound().pop_timeout(self.poll) {
            self.append(&segment.data, session, &mut flushed);
            while let Some(segment) = session.outbound().try_pop() {
                self.append(&segment.data, session, &mut flushed);
            }
        }

        if !self.buffer.is_empty() && session.vad_state() == VadState::StopTalking {
            self.flush(session);
            flushed += 1;
        }

        flushed
    }

    fn append(&mut self, data: &[u8], session: &Session, flushed: &mut usize) {
        self.buffer.extend_from_slice(data);
        if self.buffer.len() >= session.chunk_buffer_size() {
            self.flush(session);
            *flushed += 1;
        }
    }

    /// Package the buffer as a chunk event and reset it, whatever the outcome.
    pub fn flush(&mut self, session: &Session) -> bool {
        let data = std::mem::take(&mut self.buffer);
        if data.is_empty() {
            return false;
        }

        let media = *session.media();
        let length = data.len();
        let time_secs = (length / media.samplerate.max(1) as usize) as u32;

        let chunk_type = session.settings().chunk_snapshot(&mut self.extension);
        let extension = self
            .extension
            .as_deref()
            .unwrap_or(defaults::CHUNK_FILE_EXT);

        let payload = match chunk_type {
            ChunkType::Buffer => ChunkData::Buffer(data),
            ChunkType::File => {
                match self
                    .materializer
                    .write(&data, media.samplerate, media.channels, extension)
                {
                    Ok(path) => ChunkData::File(path),
                    Err(e) => {
                        tracing::warn!(session = %session.id(), length, "Chunk discarded: {e}");
                        self.stats.failed += 1;
                        self.stats.bytes_discarded += length as u64;
                        return false;
                    }
                }
            }
        };

        self.stats.flushed += 1;
        let delivered = session.emit(EventKind::ChunkReady(ChunkReady {
            time_secs,
            length,
            samplerate: media.samplerate,
            channels: media.channels,
            data: payload,
        }));
        if !delivered {
            self.stats.events_dropped += 1;
        }
        delivered
    }
}

impl Worker for ChunkWorker {
    fn name(&self) -> &'static str {
        "chunker"
    }

    fn step(&mut self, session: &Session) -> Result<Step, StationError> {
        self.poll_once(session);
        Ok(Step::Continue)
    }

    fn shutdown(&mut self, session: &Session) {
        if !self.buffer.is_empty() {
            tracing::debug!(
                session = %session.id(),
                bytes = self.buffer.len(),
                "Discarding unflushed chunk audio"
            );
            self.stats.bytes_discarded += self.buffer.len() as u64;
            self.buffer.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::segment::AudioSegment;
    use crate::audio::wav::FileMaterializer;
    use crate::error::{IvsError, Result};
    use crate::events::Event;
    use crate::session::MediaParams;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    struct FailingMaterializer;

    impl ChunkMaterializer for FailingMaterializer {
        fn write(&self, _: &[u8], _: u32, _: u16, _: &str) -> Result<PathBuf> {
            Err(IvsError::Materialize {
                path: "/nowhere".to_string(),
                message: "disk full".to_string(),
            })
        }
    }

    fn session(chunk_len_sec: u32) -> Arc<Session> {
        let session = Session::builder("chunk", MediaParams::l16(8000, 1, 20))
            .with_chunk_len_sec(chunk_len_sec)
            .build();
        session.open();
        session
    }

    fn push_packets(session: &Session, count: usize) {
        for _ in 0..count {
            session
                .outbound()
                .push(AudioSegment::new(vec![1; 320], 8000, 1))
                .unwrap();
        }
    }

    fn worker(dir: &Path) -> ChunkWorker {
        ChunkWorker::new(Arc::new(FileMaterializer::new(dir))).with_poll(Duration::from_millis(1))
    }

    fn chunks(session: &Session) -> Vec<ChunkReady> {
        std::iter::from_fn(|| session.events().try_pop())
            .filter_map(|Event { kind, .. }| match kind {
                EventKind::ChunkReady(chunk) => Some(chunk),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn size_threshold_flushes_and_resets() {
        let dir = TempDir::new().unwrap();
        let session = session(1);
        let mut worker = worker(dir.path());

        // 1 s at 8 kHz = 16000 bytes = 50 packets.
        push_packets(&session, 50);
        assert_eq!(worker.poll_once(&session), 1);
        assert_eq!(worker.buffered(), 0);

        let chunks = chunks(&session);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].length, 16000);
        assert_eq!(chunks[0].time_secs, 2);
        assert!(matches!(chunks[0].data, ChunkData::Buffer(ref b) if b.len() == 16000));
    }

    #[test]
    fn stop_talking_flushes_partial_chunk() {
        let dir = TempDir::new().unwrap();
        let session = session(15);
        let mut worker = worker(dir.path());

        push_packets(&session, 3);
        assert_eq!(worker.poll_once(&session), 0);
        assert_eq!(worker.buffered(), 960);

        session.set_vad_state(VadState::StopTalking);
        assert_eq!(worker.poll_once(&session), 1);
        assert_eq!(worker.buffered(), 0);
        assert_eq!(chunks(&session)[0].length, 960);

        // Nothing buffered, nothing flushed.
        assert_eq!(worker.poll_once(&session), 0);
    }

    #[test]
    fn file_mode_writes_with_session_extension() {
        let dir = TempDir::new().unwrap();
        let session = session(15);
        {
            let mut settings = session.settings();
            settings.chunk_type = ChunkType::File;
            settings.set_chunk_file_ext("raw");
        }
        let mut worker = worker(dir.path());

        push_packets(&session, 2);
        worker.poll_once(&session);
        session.set_vad_state(VadState::StopTalking);
        worker.poll_once(&session);

        let chunks = chunks(&session);
        let path = chunks[0].data.as_path().unwrap();
        assert_eq!(path.extension().unwrap(), "raw");
        assert_eq!(std::fs::read(path).unwrap().len(), 640);
    }

    #[test]
    fn materialization_failure_drops_chunk_silently() {
        let session = session(15);
        session.settings().chunk_type = ChunkType::File;
        let mut worker =
            ChunkWorker::new(Arc::new(FailingMaterializer)).with_poll(Duration::from_millis(1));

        push_packets(&session, 2);
        session.set_vad_state(VadState::StopTalking);
        worker.poll_once(&session);

        assert_eq!(worker.buffered(), 0);
        assert!(session.events().is_empty());
        assert_eq!(worker.stats().failed, 1);
        assert_eq!(worker.stats().flushed, 0);
    }

    #[test]
    fn empty_poll_times_out() {
        let dir = TempDir::new().unwrap();
        let session = session(15);
        let mut worker = worker(dir.path());
        assert_eq!(worker.poll_once(&session), 0);
    }

    #[test]
    fn shutdown_discards_pending_audio() {
        let dir = TempDir::new().unwrap();
        let session = session(15);
        let mut worker = worker(dir.path());
        push_packets(&session, 1);
        worker.poll_once(&session);
        worker.shutdown(&session);
        assert_eq!(worker.buffered(), 0);
        assert_eq!(worker.stats().bytes_discarded, 320);
        assert!(session.events().is_empty());
    }
}
