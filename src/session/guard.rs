//! Lease accounting for sessions.
//!
//! A session may only be used through a [`Lease`]. Leases are handed out
//! while the session is ready and not marked for destruction; teardown
//! flips `ready` off and then waits until every lease has been dropped
//! before the session's resources are released.

use crate::defaults;
use crate::session::Session;
use std::ops::Deref;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct GuardState {
    ready: bool,
    destroy_requested: bool,
    destroyed: bool,
    leases: u32,
}

/// Readiness flags and lease count of one session.
#[derive(Debug, Default)]
pub struct SessionGuard {
    state: Mutex<GuardState>,
    released: Condvar,
}

impl SessionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, GuardState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Acquire one lease. Fails without side effects unless ready and not
    /// marked for destruction.
    pub fn take(&self) -> bool {
        let mut state = self.lock();
        if state.ready && !state.destroy_requested {
            state.leases += 1;
            true
        } else {
            false
        }
    }

    /// Return one lease. Never blocks beyond the state mutex, never fails.
    pub fn release(&self) {
        let mut state = self.lock();
        if state.leases > 0 {
            state.leases -= 1;
        }
        if state.leases == 0 {
            self.released.notify_all();
        }
    }

    pub fn mark_ready(&self) {
        let mut state = self.lock();
        if !state.destroyed {
            state.ready = true;
        }
    }

    pub fn request_destroy(&self) {
        self.lock().destroy_requested = true;
    }

    /// Stop handing out leases. Existing leases stay valid.
    pub fn begin_teardown(&self) {
        self.lock().ready = false;
    }

    /// Block until the lease count reaches zero, then mark destroyed.
    ///
    /// Waits on a condition variable in rounds of `poll`, logging a warning
    /// on the first round and then every `warn_every`. Returns how long it
    /// waited.
    pub fn drain(&self, session_id: &str, poll: Duration, warn_every: Duration) -> Duration {
        let started = Instant::now();
        let mut state = self.lock();
        let mut last_warn: Option<Instant> = None;

        while state.leases > 0 {
            if last_warn.is_none_or(|at| at.elapsed() >= warn_every) {
                tracing::warn!(
                    session = %session_id,
                    leases = state.leases,
                    "Waiting for unlock"
                );
                last_warn = Some(Instant::now());
            }
            let (next, _timeout) = self
                .released
                .wait_timeout(state, poll)
                .unwrap_or_else(|e| e.into_inner());
            state = next;
        }

        state.destroyed = true;
        started.elapsed()
    }

    /// [`drain`](Self::drain) with the default poll and warning intervals.
    pub fn drain_default(&self, session_id: &str) -> Duration {
        self.drain(
            session_id,
            Duration::from_millis(defaults::TEARDOWN_POLL_MS),
            Duration::from_secs(defaults::TEARDOWN_WARN_SECS),
        )
    }

    pub fn is_ready(&self) -> bool {
        self.lock().ready
    }

    pub fn is_destroy_requested(&self) -> bool {
        self.lock().destroy_requested
    }

    pub fn is_destroyed(&self) -> bool {
        self.lock().destroyed
    }

    pub fn lease_count(&self) -> u32 {
        self.lock().leases
    }
}

/// Counted permission to use a session. Dropping it releases the lease.
pub struct Lease {
    session: Arc<Session>,
}

impl Lease {
    /// Wrap an already-counted lease. Only [`Session::take`] calls this.
    pub(crate) fn adopt(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// Take a second, independent lease on the same session.
    pub fn try_clone(&self) -> Option<Lease> {
        Session::take(&self.session)
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Release early. Equivalent to dropping the lease.
    pub fn release(self) {}
}

impl Deref for Lease {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.session.guard().release();
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("session", &self.session.id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::thread;

    #[test]
    fn take_fails_before_ready() {
        let guard = SessionGuard::new();
        assert!(!guard.take());
        assert_eq!(guard.lease_count(), 0);
    }

    #[test]
    fn take_and_release_balance() {
        let guard = SessionGuard::new();
        guard.mark_ready();
        assert!(guard.take());
        assert!(guard.take());
        assert_eq!(guard.lease_count(), 2);
        guard.release();
        guard.release();
        assert_eq!(guard.lease_count(), 0);
    }

    #[test]
    fn release_without_lease_is_harmless() {
        let guard = SessionGuard::new();
        guard.release();
        assert_eq!(guard.lease_count(), 0);
    }

    #[test]
    fn destroy_request_blocks_new_leases() {
        let guard = SessionGuard::new();
        guard.mark_ready();
        assert!(guard.take());
        guard.request_destroy();
        assert!(!guard.take());
        assert_eq!(guard.lease_count(), 1);
    }

    #[test]
    fn teardown_blocks_new_leases() {
        let guard = SessionGuard::new();
        guard.mark_ready();
        guard.begin_teardown();
        assert!(!guard.take());
    }

    #[test]
    fn drain_without_leases_marks_destroyed_immediately() {
        let guard = SessionGuard::new();
        guard.mark_ready();
        guard.begin_teardown();
        guard.drain("s", Duration::from_millis(10), Duration::from_secs(1));
        assert!(guard.is_destroyed());
    }

    #[test]
    fn drain_waits_for_outstanding_lease() {
        let guard = Arc::new(SessionGuard::new());
        guard.mark_ready();
        assert!(guard.take());
        guard.begin_teardown();

        let releaser = {
            let guard = Arc::clone(&guard);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                assert!(!guard.is_destroyed());
                guard.release();
            })
        };

        let waited = guard.drain("s", Duration::from_millis(10), Duration::from_secs(1));
        assert!(waited >= Duration::from_millis(40));
        assert!(guard.is_destroyed());
        assert_eq!(guard.lease_count(), 0);
        releaser.join().unwrap();
    }

    #[test]
    fn ready_cannot_return_after_destroyed() {
        let guard = SessionGuard::new();
        guard.mark_ready();
        guard.begin_teardown();
        guard.drain("s", Duration::from_millis(1), Duration::from_secs(1));
        guard.mark_ready();
        assert!(!guard.is_ready());
    }

    #[test]
    fn concurrent_take_release_racing_teardown() {
        for _ in 0..20 {
            let guard = Arc::new(SessionGuard::new());
            guard.mark_ready();
            let in_use = Arc::new(AtomicU32::new(0));
            let violated = Arc::new(AtomicBool::new(false));

            let workers: Vec<_> = (0..8)
                .map(|_| {
                    let guard = Arc::clone(&guard);
                    let in_use = Arc::clone(&in_use);
                    let violated = Arc::clone(&violated);
                    thread::spawn(move || {
                        for _ in 0..500 {
                            if guard.take() {
                                in_use.fetch_add(1, Ordering::SeqCst);
                                if guard.is_destroyed() {
                                    violated.store(true, Ordering::SeqCst);
                                }
                                thread::yield_now();
                                in_use.fetch_sub(1, Ordering::SeqCst);
                                guard.release();
                            }
                        }
                    })
                })
                .collect();

            thread::sleep(Duration::from_millis(1));
            guard.begin_teardown();
            guard.drain("stress", Duration::from_millis(1), Duration::from_secs(5));

            assert_eq!(guard.lease_count(), 0);
            assert_eq!(in_use.load(Ordering::SeqCst), 0);
            assert!(!guard.take());

            for worker in workers {
                worker.join().unwrap();
            }
            assert!(!violated.load(Ordering::SeqCst));
        }
    }
}
