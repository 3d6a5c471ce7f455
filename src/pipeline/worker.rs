//! Thread runner for per-session workers.
//!
//! Each worker runs on its own thread and holds a session lease for its
//! whole life, so the session cannot be torn down underneath it.

use crate::pipeline::error::{ErrorReporter, StationError};
use crate::session::{Lease, Session};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// What the runner should do after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Done,
}

/// A loop body driven by [`WorkerRunner`].
pub trait Worker: Send + 'static {
    /// Name for logging and error reporting.
    fn name(&self) -> &'static str;

    /// Run one round. Should return within a bounded time so the runner
    /// can observe session teardown.
    fn step(&mut self, session: &Session) -> Result<Step, StationError>;

    /// Called once when the loop ends, before the lease is released.
    fn shutdown(&mut self, _session: &Session) {}
}

/// Runs a worker on a dedicated thread until it finishes, fails fatally,
/// or the session stops being active.
pub struct WorkerRunner<W: Worker> {
    handle: Option<JoinHandle<W>>,
    worker_name: &'static str,
}

impl<W: Worker> WorkerRunner<W> {
    pub fn spawn(
        mut worker: W,
        lease: Lease,
        error_reporter: Arc<dyn ErrorReporter>,
    ) -> std::io::Result<Self> {
        let worker_name = worker.name();
        let handle = thread::Builder::new()
            .name(format!("ivs-{worker_name}"))
            .spawn(move || {
                Self::run_worker(&mut worker, &lease, error_reporter.as_ref());
                drop(lease);
                worker
            })?;

        Ok(Self {
            handle: Some(handle),
            worker_name,
        })
    }

    fn run_worker(worker: &mut W, session: &Session, error_reporter: &dyn ErrorReporter) {
        let name = worker.name();

        while session.is_active() {
            match worker.step(session) {
                Ok(Step::Continue) => {}
                Ok(Step::Done) => break,
                Err(err @ StationError::Recoverable(_)) => {
                    error_reporter.report(name, session.id(), &err);
                }
                Err(err @ StationError::Fatal(_)) => {
                    error_reporter.report(name, session.id(), &err);
                    break;
                }
            }
        }

        worker.shutdown(session);
    }

    /// Wait for the thread and hand the worker back.
    pub fn join(mut self) -> Result<W, String> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| format!("Worker '{}' thread panicked", self.worker_name)),
            None => Err(format!("Worker '{}' already joined", self.worker_name)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.worker_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MediaParams;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct CountingWorker {
        steps: u32,
        stop_after: Option<u32>,
        shutdown_called: Arc<AtomicBool>,
    }

    impl Worker for CountingWorker {
        fn name(&self) -> &'static str {
            "counter"
        }

        fn step(&mut self, _session: &Session) -> Result<Step, StationError> {
            self.steps += 1;
            if self.stop_after == Some(self.steps) {
                return Ok(Step::Done);
            }
            thread::sleep(Duration::from_millis(1));
            Ok(Step::Continue)
        }

        fn shutdown(&mut self, _session: &Session) {
            self.shutdown_called.store(true, Ordering::SeqCst);
        }
    }

    struct FailingWorker {
        fatal_after: u32,
        steps: u32,
    }

    impl Worker for FailingWorker {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn step(&mut self, _session: &Session) -> Result<Step, StationError> {
            self.steps += 1;
            if self.steps == self.fatal_after {
                Err(StationError::Fatal("boom".to_string()))
            } else {
                Err(StationError::Recoverable(format!("step {}", self.steps)))
            }
        }
    }

    #[derive(Default)]
    struct MockReporter {
        errors: Mutex<Vec<(String, String)>>,
    }

    impl ErrorReporter for MockReporter {
        fn report(&self, worker: &str, _session: &str, error: &StationError) {
            self.errors
                .lock()
                .unwrap()
                .push((worker.to_string(), error.to_string()));
        }
    }

    fn open_session() -> Arc<Session> {
        let session = Session::builder("w", MediaParams::l16(8000, 1, 20)).build();
        session.open();
        session
    }

    #[test]
    fn worker_done_releases_lease() {
        let session = open_session();
        let shutdown_called = Arc::new(AtomicBool::new(false));
        let worker = CountingWorker {
            steps: 0,
            stop_after: Some(3),
            shutdown_called: Arc::clone(&shutdown_called),
        };

        let runner = WorkerRunner::spawn(
            worker,
            Session::take(&session).unwrap(),
            Arc::new(MockReporter::default()),
        )
        .unwrap();
        assert_eq!(runner.name(), "counter");

        let worker = runner.join().unwrap();
        assert_eq!(worker.steps, 3);
        assert!(shutdown_called.load(Ordering::SeqCst));
        assert_eq!(session.guard().lease_count(), 0);
    }

    #[test]
    fn worker_stops_on_destroy_request() {
        let session = open_session();
        let worker = CountingWorker {
            steps: 0,
            stop_after: None,
            shutdown_called: Arc::new(AtomicBool::new(false)),
        };
        let runner = WorkerRunner::spawn(
            worker,
            Session::take(&session).unwrap(),
            Arc::new(MockReporter::default()),
        )
        .unwrap();

        thread::sleep(Duration::from_millis(20));
        session.request_destroy();
        session.close();

        assert!(runner.join().unwrap().steps > 0);
        assert!(session.guard().is_destroyed());
    }

    #[test]
    fn recoverable_errors_are_reported_fatal_stops() {
        let session = open_session();
        let reporter = Arc::new(MockReporter::default());
        let runner = WorkerRunner::spawn(
            FailingWorker {
                fatal_after: 3,
                steps: 0,
            },
            Session::take(&session).unwrap(),
            Arc::clone(&reporter) as Arc<dyn ErrorReporter>,
        )
        .unwrap();

        assert_eq!(runner.join().unwrap().steps, 3);
        let errors = reporter.errors.lock().unwrap();
        assert_eq!(errors.len(), 3);
        assert_eq!(errors[0].0, "failing");
        assert!(errors[2].1.starts_with("Fatal error"));
    }
}
