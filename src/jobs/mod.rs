//! Background jobs correlated to sessions by job id.
//!
//! Every job follows the same pattern: lease the session, issue a job id,
//! run the work on the runtime, push at most one event tagged with that id,
//! release the lease. A session that cannot be leased gets [`JID_NONE`] and
//! nothing is spawned.

pub mod http;
pub mod nlp;

use crate::events::{Event, EventKind};
use crate::session::{JID_NONE, JobId, Lease, Session};
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;

pub use http::{Credentials, FormField, HttpClient, HttpRequest, HttpResponse, Method};
#[cfg(feature = "http")]
pub use http::ReqwestClient;
pub use nlp::NlpClient;

/// Spawns session jobs on a tokio runtime.
#[derive(Clone)]
pub struct JobRunner {
    runtime: Handle,
}

impl JobRunner {
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// Start an async job. Returns its id, or [`JID_NONE`] when the session
    /// cannot be leased.
    pub fn submit<F, Fut>(&self, session: &Arc<Session>, name: &'static str, work: F) -> JobId
    where
        F: FnOnce(JobId) -> Fut + Send + 'static,
        Fut: Future<Output = Option<EventKind>> + Send + 'static,
    {
        let Some(lease) = Session::take(session) else {
            tracing::debug!(session = %session.id(), job = name, "Session not ready, job not started");
            return JID_NONE;
        };
        let jid = lease.next_job_id();
        tracing::trace!(session = %lease.id(), jid, job = name, "Job started");

        self.runtime.spawn(async move {
            let outcome = work(jid).await;
            finish(&lease, jid, name, outcome);
        });

        jid
    }

    /// Start a job whose work blocks (file I/O, playback) on the blocking pool.
    pub fn submit_blocking<F>(&self, session: &Arc<Session>, name: &'static str, work: F) -> JobId
    where
        F: FnOnce(JobId, &Lease) -> Option<EventKind> + Send + 'static,
    {
        let Some(lease) = Session::take(session) else {
            tracing::debug!(session = %session.id(), job = name, "Session not ready, job not started");
            return JID_NONE;
        };
        let jid = lease.next_job_id();

        self.runtime.spawn_blocking(move || {
            let outcome = work(jid, &lease);
            finish(&lease, jid, name, outcome);
        });

        jid
    }

    /// Run a job's future to completion on the calling thread.
    ///
    /// For the synchronous job variants. Must not be called from inside the
    /// runtime.
    pub fn block_on<Fut: Future>(&self, fut: Fut) -> Fut::Output {
        self.runtime.block_on(fut)
    }
}

fn finish(lease: &Lease, jid: JobId, name: &str, outcome: Option<EventKind>) {
    let Some(kind) = outcome else {
        tracing::trace!(session = %lease.id(), jid, job = name, "Job finished without result");
        return;
    };
    if let Err(full) = lease.events().push(Event::for_job(jid, kind)) {
        tracing::error!(
            session = %lease.id(),
            jid,
            event = full.into_inner().name(),
            "Failed to emit event"
        );
    }
}
