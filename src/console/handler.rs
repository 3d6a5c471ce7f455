//! Console command handling against the live session registry.

use crate::console::protocol::{ConsoleCommand, ConsoleReply};
use crate::jobs::JobRunner;
use crate::playback::{PlayerTable, playback_async};
use crate::session::RegistryHandle;

/// Handler trait for processing console commands.
#[async_trait::async_trait]
pub trait ConsoleHandler: Send + Sync {
    async fn handle(&self, command: ConsoleCommand) -> ConsoleReply;
}

/// Serves console commands from the session registry.
pub struct RegistryConsole {
    registry: RegistryHandle,
    runner: JobRunner,
    players: PlayerTable,
}

impl RegistryConsole {
    pub fn new(registry: RegistryHandle, runner: JobRunner, players: PlayerTable) -> Self {
        Self {
            registry,
            runner,
            players,
        }
    }
}

#[async_trait::async_trait]
impl ConsoleHandler for RegistryConsole {
    async fn handle(&self, command: ConsoleCommand) -> ConsoleReply {
        match command {
            ConsoleCommand::List => ConsoleReply::Sessions(self.registry.list().await),
            ConsoleCommand::Kill { sid } => match self.registry.lookup_and_take(&sid).await {
                Some(lease) => {
                    tracing::info!(session = %sid, "Session kill requested from console");
                    lease.request_destroy();
                    ConsoleReply::Ok
                }
                None => ConsoleReply::NotFound,
            },
            ConsoleCommand::Playback { sid, path } => {
                let Some(lease) = self.registry.lookup_and_take(&sid).await else {
                    return ConsoleReply::NotFound;
                };
                let Some(player) = self.players.get(&sid) else {
                    tracing::warn!(session = %sid, "No player attached to session");
                    return ConsoleReply::NotFound;
                };
                playback_async(&self.runner, player, lease.session(), path, false);
                ConsoleReply::Ok
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::playback::{PlaybackContext, PlaybackTarget, Player};
    use crate::session::{CallInfo, MediaParams, Registry, Session};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::runtime::Handle;

    #[derive(Default)]
    struct CountingPlayer {
        plays: AtomicUsize,
    }

    impl Player for CountingPlayer {
        fn play(&self, _ctx: &PlaybackContext<'_>, _target: &PlaybackTarget) -> Result<()> {
            self.plays.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn session(id: &str) -> Arc<Session> {
        let session = Session::builder(id, MediaParams::l16(8000, 1, 20))
            .with_call(CallInfo::new("welcome", "100", "200"))
            .build();
        session.open();
        session
    }

    fn console() -> (RegistryConsole, RegistryHandle, PlayerTable) {
        let registry = Registry::spawn();
        let players = PlayerTable::default();
        let console = RegistryConsole::new(
            registry.clone(),
            JobRunner::new(Handle::current()),
            players.clone(),
        );
        (console, registry, players)
    }

    #[tokio::test]
    async fn test_list_reports_sessions() {
        let (console, registry, _) = console();
        registry.insert(session("s1")).await;

        match console.handle(ConsoleCommand::List).await {
            ConsoleReply::Sessions(list) => {
                assert_eq!(list.len(), 1);
                assert_eq!(list[0].id, "s1");
            }
            other => panic!("Expected Sessions, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_kill_requests_destroy() {
        let (console, registry, _) = console();
        let s = session("s1");
        registry.insert(Arc::clone(&s)).await;

        let reply = console
            .handle(ConsoleCommand::Kill {
                sid: "s1".to_string(),
            })
            .await;
        assert_eq!(reply, ConsoleReply::Ok);
        assert!(s.guard().is_destroy_requested());
        assert_eq!(s.guard().lease_count(), 0);

        // A session being destroyed can no longer be leased.
        let reply = console
            .handle(ConsoleCommand::Kill {
                sid: "s1".to_string(),
            })
            .await;
        assert_eq!(reply, ConsoleReply::NotFound);
    }

    #[tokio::test]
    async fn test_kill_unknown_session() {
        let (console, _, _) = console();
        let reply = console
            .handle(ConsoleCommand::Kill {
                sid: "nope".to_string(),
            })
            .await;
        assert_eq!(reply, ConsoleReply::NotFound);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_playback_runs_session_player() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("prompt.wav");
        std::fs::write(&file, b"RIFF").unwrap();

        let (console, registry, players) = console();
        let s = session("s1");
        registry.insert(Arc::clone(&s)).await;
        let player = Arc::new(CountingPlayer::default());
        players.insert("s1", player.clone());

        let reply = console
            .handle(ConsoleCommand::Playback {
                sid: "s1".to_string(),
                path: file.display().to_string(),
            })
            .await;
        assert_eq!(reply, ConsoleReply::Ok);

        for _ in 0..500 {
            if player.plays.load(Ordering::SeqCst) == 1 && s.guard().lease_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert_eq!(player.plays.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_playback_unknown_session() {
        let (console, _, _) = console();
        let reply = console
            .handle(ConsoleCommand::Playback {
                sid: "nope".to_string(),
                path: "/tmp/x.wav".to_string(),
            })
            .await;
        assert_eq!(reply, ConsoleReply::NotFound);
    }
}
