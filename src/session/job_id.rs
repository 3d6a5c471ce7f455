//! Per-session job identifiers.

use std::sync::atomic::{AtomicU32, Ordering};

/// Correlation token for one asynchronous job.
pub type JobId = u32;

/// Reserved "no job" id. Never issued by [`JobIdGenerator`].
pub const JID_NONE: JobId = 0;

/// Strictly increasing, non-zero job ids scoped to one session.
#[derive(Debug)]
pub struct JobIdGenerator {
    next: AtomicU32,
}

impl JobIdGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicU32::new(1),
        }
    }

    /// Issue the next id. The first call returns 1.
    pub fn next_id(&self) -> JobId {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Number of ids issued so far.
    pub fn issued(&self) -> u32 {
        self.next.load(Ordering::Relaxed) - 1
    }
}

impl Default for JobIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn first_id_is_one() {
        let ids = JobIdGenerator::new();
        assert_eq!(ids.next_id(), 1);
        assert_eq!(ids.next_id(), 2);
        assert_eq!(ids.issued(), 2);
    }

    #[test]
    fn ids_increase_within_a_thread() {
        let ids = JobIdGenerator::new();
        let mut last = JID_NONE;
        for _ in 0..1000 {
            let id = ids.next_id();
            assert!(id > last);
            last = id;
        }
    }

    #[test]
    fn concurrent_ids_are_unique_and_non_zero() {
        let ids = Arc::new(JobIdGenerator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ids = Arc::clone(&ids);
                thread::spawn(move || (0..1250).map(|_| ids.next_id()).collect::<Vec<_>>())
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(all.insert(id), "duplicate job id {id}");
            }
        }

        assert_eq!(all.len(), 10_000);
        assert_eq!(all.iter().min(), Some(&1));
        assert_eq!(all.iter().max(), Some(&10_000));
        assert!(!all.contains(&JID_NONE));
    }
}
