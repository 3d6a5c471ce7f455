//! Bounded, lossy, multi-producer queues.
//!
//! Producers never block: a push against a full queue hands the item back in
//! [`QueueFull`] and the caller drops it. Any thread may pop, which lets the
//! session teardown drain whatever the consumer left behind.

use crate::audio::segment::AudioSegment;
use crate::defaults;
use crate::events::Event;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use std::fmt;
use std::time::Duration;

/// Push rejected because the queue is at capacity. Carries the rejected item.
pub struct QueueFull<T>(pub T);

impl<T> QueueFull<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for QueueFull<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("QueueFull(..)")
    }
}

impl<T> fmt::Display for QueueFull<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("queue is full")
    }
}

impl<T> std::error::Error for QueueFull<T> {}

/// Fixed-capacity FIFO shared by producers and the consumer.
pub struct BoundedQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        Self { tx, rx, capacity }
    }

    /// Non-blocking push.
    pub fn push(&self, item: T) -> Result<(), QueueFull<T>> {
        match self.tx.try_send(item) {
            Ok(()) => Ok(()),
            // Both ends live inside self, so Disconnected cannot happen.
            Err(TrySendError::Full(item)) | Err(TrySendError::Disconnected(item)) => {
                Err(QueueFull(item))
            }
        }
    }

    /// Push, dropping the item when the queue is full. Returns whether it was queued.
    pub fn push_or_drop(&self, item: T) -> bool {
        self.push(item).is_ok()
    }

    pub fn try_pop(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Wait up to `timeout` for an item; wakes as soon as one is pushed.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Some(item),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Pop and drop every remaining item. Returns how many were dropped.
    pub fn drain_and_destroy(&self) -> usize {
        let mut dropped = 0;
        while let Ok(item) = self.rx.try_recv() {
            drop(item);
            dropped += 1;
        }
        dropped
    }
}

/// Per-session event queue.
pub type EventQueue = BoundedQueue<Event>;

/// Inbound / outbound audio segment queue.
pub type AudioQueue = BoundedQueue<AudioSegment>;

impl EventQueue {
    pub fn for_events() -> Self {
        Self::new(defaults::EVENTS_QUEUE_SIZE)
    }
}

impl AudioQueue {
    pub fn for_audio() -> Self {
        Self::new(defaults::AUDIO_QUEUE_SIZE)
    }
}
