//! Process-wide session registry.
//!
//! A single tokio task owns the id → session map and answers requests sent
//! over a channel, so no caller ever holds a lock across the map.

use crate::session::{Lease, Session};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

const REQUEST_QUEUE: usize = 64;

/// What `list` reports per live session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub script_name: String,
    pub caller_number: String,
    pub called_number: String,
    pub start_ts: u64,
}

impl SessionSummary {
    fn of(session: &Session) -> Self {
        let call = session.call();
        Self {
            id: session.id().to_string(),
            script_name: call.script_name.clone(),
            caller_number: call.caller_number.clone(),
            called_number: call.called_number.clone(),
            start_ts: call.start_ts,
        }
    }
}

enum Request {
    Insert {
        session: Arc<Session>,
        reply: oneshot::Sender<bool>,
    },
    Remove {
        id: String,
        reply: oneshot::Sender<Option<Arc<Session>>>,
    },
    Lookup {
        id: String,
        take: bool,
        reply: oneshot::Sender<Lookup>,
    },
    List {
        reply: oneshot::Sender<Vec<SessionSummary>>,
    },
    DestroyAll {
        reply: oneshot::Sender<usize>,
    },
    Len {
        reply: oneshot::Sender<usize>,
    },
}

enum Lookup {
    Found(Arc<Session>),
    Leased(Lease),
    Missing,
}

/// The actor owning the session map.
pub struct Registry {
    sessions: HashMap<String, Arc<Session>>,
    requests: mpsc::Receiver<Request>,
}

impl Registry {
    /// Start the actor on the current runtime.
    pub fn spawn() -> RegistryHandle {
        Self::spawn_on(&Handle::current())
    }

    pub fn spawn_on(runtime: &Handle) -> RegistryHandle {
        let (tx, rx) = mpsc::channel(REQUEST_QUEUE);
        let registry = Registry {
            sessions: HashMap::new(),
            requests: rx,
        };
        runtime.spawn(registry.run());
        RegistryHandle { tx }
    }

    async fn run(mut self) {
        while let Some(request) = self.requests.recv().await {
            self.handle(request);
        }
        tracing::debug!(sessions = self.sessions.len(), "Session registry stopped");
    }

    fn handle(&mut self, request: Request) {
        match request {
            Request::Insert { session, reply } => {
                let id = session.id().to_string();
                let inserted = if self.sessions.contains_key(&id) {
                    false
                } else {
                    self.sessions.insert(id, session);
                    true
                };
                respond(reply, inserted);
            }
            Request::Remove { id, reply } => {
                respond(reply, self.sessions.remove(&id));
            }
            Request::Lookup { id, take, reply } => {
                let found = match self.sessions.get(&id) {
                    None => Lookup::Missing,
                    Some(session) if take => match Session::take(session) {
                        Some(lease) => Lookup::Leased(lease),
                        None => Lookup::Missing,
                    },
                    Some(session) => Lookup::Found(Arc::clone(session)),
                };
                respond(reply, found);
            }
            Request::List { reply } => {
                let mut summaries: Vec<SessionSummary> = self
                    .sessions
                    .values()
                    .filter_map(Session::take)
                    .map(|lease| SessionSummary::of(&lease))
                    .collect();
                summaries.sort_by(|a, b| a.start_ts.cmp(&b.start_ts).then(a.id.cmp(&b.id)));
                respond(reply, summaries);
            }
            Request::DestroyAll { reply } => {
                for session in self.sessions.values() {
                    session.request_destroy();
                }
                respond(reply, self.sessions.len());
            }
            Request::Len { reply } => {
                respond(reply, self.sessions.len());
            }
        }
    }
}

// Callers may stop waiting; a closed reply channel is not an error.
fn respond<T>(reply: oneshot::Sender<T>, value: T) {
    if reply.send(value).is_err() {
        tracing::trace!("Registry caller went away before the reply");
    }
}

/// Cloneable client of the registry actor.
///
/// Async methods are for tasks; `blocking_*` methods are for plain threads
/// and must not be called from inside the runtime.
#[derive(Clone)]
pub struct RegistryHandle {
    tx: mpsc::Sender<Request>,
}

impl RegistryHandle {
    async fn ask<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Request) -> Option<T> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).await.ok()?;
        rx.await.ok()
    }

    fn blocking_ask<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Request) -> Option<T> {
        let (reply, rx) = oneshot::channel();
        self.tx.blocking_send(make(reply)).ok()?;
        rx.blocking_recv().ok()
    }

    /// Register a session. False when the id is already taken.
    pub async fn insert(&self, session: Arc<Session>) -> bool {
        self.ask(|reply| Request::Insert { session, reply })
            .await
            .unwrap_or(false)
    }

    pub async fn remove(&self, id: &str) -> Option<Arc<Session>> {
        let id = id.to_string();
        self.ask(|reply| Request::Remove { id, reply }).await.flatten()
    }

    pub async fn lookup(&self, id: &str) -> Option<Arc<Session>> {
        let id = id.to_string();
        match self
            .ask(|reply| Request::Lookup {
                id,
                take: false,
                reply,
            })
            .await
        {
            Some(Lookup::Found(session)) => Some(session),
            _ => None,
        }
    }

    /// Look up and lease in one step. `None` when missing or not ready.
    pub async fn lookup_and_take(&self, id: &str) -> Option<Lease> {
        let id = id.to_string();
        match self
            .ask(|reply| Request::Lookup {
                id,
                take: true,
                reply,
            })
            .await
        {
            Some(Lookup::Leased(lease)) => Some(lease),
            _ => None,
        }
    }

    /// Summaries of every session that could be leased.
    pub async fn list(&self) -> Vec<SessionSummary> {
        self.ask(|reply| Request::List { reply })
            .await
            .unwrap_or_default()
    }

    /// Mark every registered session for destruction. Returns how many.
    pub async fn request_destroy_all(&self) -> usize {
        self.ask(|reply| Request::DestroyAll { reply })
            .await
            .unwrap_or(0)
    }

    pub async fn len(&self) -> usize {
        self.ask(|reply| Request::Len { reply }).await.unwrap_or(0)
    }

    pub fn blocking_insert(&self, session: Arc<Session>) -> bool {
        self.blocking_ask(|reply| Request::Insert { session, reply })
            .unwrap_or(false)
    }

    pub fn blocking_remove(&self, id: &str) -> Option<Arc<Session>> {
        let id = id.to_string();
        self.blocking_ask(|reply| Request::Remove { id, reply })
            .flatten()
    }

    pub fn blocking_lookup_and_take(&self, id: &str) -> Option<Lease> {
        let id = id.to_string();
        match self.blocking_ask(|reply| Request::Lookup {
            id,
            take: true,
            reply,
        }) {
            Some(Lookup::Leased(lease)) => Some(lease),
            _ => None,
        }
    }

    pub fn blocking_list(&self) -> Vec<SessionSummary> {
        self.blocking_ask(|reply| Request::List { reply })
            .unwrap_or_default()
    }

    pub fn blocking_request_destroy_all(&self) -> usize {
        self.blocking_ask(|reply| Request::DestroyAll { reply })
            .unwrap_or(0)
    }
}
