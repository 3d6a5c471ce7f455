//! Pre-roll ring for speech onset recovery.
//!
//! The classifier reports start-talking a few frames after speech actually
//! began. While idle, the media loop mirrors decoded frames here so the
//! segment emitted on start-talking can include the missed onset.

use std::collections::VecDeque;

/// Rotating store of the most recent uncaptured frames.
#[derive(Debug)]
pub struct RecoveryRing {
    frames: VecDeque<Vec<u8>>,
    capacity: usize,
    max_frame_bytes: usize,
}

impl RecoveryRing {
    /// `capacity` frames of at most `max_frame_bytes` each.
    pub fn new(capacity: usize, max_frame_bytes: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
            max_frame_bytes,
        }
    }

    /// Record one frame, evicting the oldest when full.
    ///
    /// Empty frames and frames larger than one decoded packet are not stored.
    pub fn record(&mut self, frame: &[u8]) -> bool {
        if self.capacity == 0 || frame.is_empty() || frame.len() > self.max_frame_bytes {
            return false;
        }
        if self.frames.len() == self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame.to_vec());
        true
    }

    /// Concatenate the last `min(len, max_frames)` frames followed by
    /// `current`, then clear the ring.
    pub fn take_with(&mut self, max_frames: usize, current: &[u8]) -> Vec<u8> {
        let skip = self.frames.len().saturating_sub(max_frames);
        let preroll: usize = self.frames.iter().skip(skip).map(Vec::len).sum();

        let mut out = Vec::with_capacity(preroll + current.len());
        for frame in self.frames.iter().skip(skip) {
            out.extend_from_slice(frame);
        }
        out.extend_from_slice(current);
        self.frames.clear();
        out
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}
