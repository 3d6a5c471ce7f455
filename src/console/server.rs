//! Async Unix socket server for the operator console.

use crate::console::handler::ConsoleHandler;
use crate::console::protocol::{ConsoleCommand, ConsoleReply};
use crate::error::{IvsError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

/// Accept timeout; bounds how long shutdown goes unnoticed.
const ACCEPT_POLL: Duration = Duration::from_millis(100);

/// Console server answering one request line per connection.
pub struct ConsoleServer {
    socket_path: PathBuf,
    stop: AtomicBool,
    shutdown: Option<Arc<AtomicBool>>,
}

impl ConsoleServer {
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            stop: AtomicBool::new(false),
            shutdown: None,
        }
    }

    /// Stop when `flag` is raised, in addition to [`ConsoleServer::stop`].
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = Some(flag);
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Default socket path based on XDG_RUNTIME_DIR, falling back to /tmp.
    pub fn default_socket_path() -> PathBuf {
        if let Ok(xdg_runtime) = std::env::var("XDG_RUNTIME_DIR") {
            PathBuf::from(xdg_runtime).join("ivs.sock")
        } else {
            let uid = unsafe { libc::getuid() };
            PathBuf::from(format!("/tmp/ivs-{}.sock", uid))
        }
    }

    /// Bind and serve until shutdown. The socket file is removed on exit.
    pub async fn start<H>(&self, handler: H) -> Result<()>
    where
        H: ConsoleHandler + 'static,
    {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| IvsError::ConsoleSocket {
                message: format!("Failed to remove existing socket: {}", e),
            })?;
        }

        let listener =
            UnixListener::bind(&self.socket_path).map_err(|e| IvsError::ConsoleSocket {
                message: format!("Failed to bind to socket: {}", e),
            })?;
        tracing::debug!(socket = %self.socket_path.display(), "Console listening");

        let handler = Arc::new(handler);
        let result = loop {
            if self.should_stop() {
                break Ok(());
            }

            match tokio::time::timeout(ACCEPT_POLL, listener.accept()).await {
                Ok(Ok((stream, _))) => {
                    let handler = Arc::clone(&handler);
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, handler).await {
                            tracing::warn!("Console client error: {e}");
                        }
                    });
                }
                Ok(Err(e)) => {
                    break Err(IvsError::ConsoleConnection {
                        message: format!("Failed to accept connection: {}", e),
                    });
                }
                Err(_) => continue,
            }
        };

        self.remove_socket();
        result
    }

    /// Ask the accept loop to exit.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    fn should_stop(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
            || self
                .shutdown
                .as_ref()
                .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    fn remove_socket(&self) {
        if self.socket_path.exists()
            && let Err(e) = std::fs::remove_file(&self.socket_path)
        {
            tracing::warn!(socket = %self.socket_path.display(), "Failed to remove socket file: {e}");
        }
    }
}

/// Read one request line, answer it, close.
async fn handle_client<H>(stream: UnixStream, handler: Arc<H>) -> Result<()>
where
    H: ConsoleHandler,
{
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    reader
        .read_line(&mut line)
        .await
        .map_err(|e| IvsError::ConsoleConnection {
            message: format!("Failed to read from client: {}", e),
        })?;

    let reply = match ConsoleCommand::parse(&line) {
        Some(command) => handler.handle(command).await,
        None => ConsoleReply::Usage,
    };

    writer
        .write_all(reply.render().as_bytes())
        .await
        .map_err(|e| IvsError::ConsoleConnection {
            message: format!("Failed to write to client: {}", e),
        })?;

    writer
        .shutdown()
        .await
        .map_err(|e| IvsError::ConsoleConnection {
            message: format!("Failed to close connection: {}", e),
        })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    struct MockHandler;

    #[async_trait::async_trait]
    impl ConsoleHandler for MockHandler {
        async fn handle(&self, command: ConsoleCommand) -> ConsoleReply {
            match command {
                ConsoleCommand::List => ConsoleReply::Sessions(Vec::new()),
                ConsoleCommand::Kill { sid } if sid == "known" => ConsoleReply::Ok,
                ConsoleCommand::Kill { .. } => ConsoleReply::NotFound,
                ConsoleCommand::Playback { .. } => ConsoleReply::Ok,
            }
        }
    }

    async fn start_server(socket_path: &Path) -> (Arc<AtomicBool>, tokio::task::JoinHandle<Result<()>>) {
        let flag = Arc::new(AtomicBool::new(false));
        let server = ConsoleServer::new(socket_path.to_path_buf()).with_shutdown_flag(Arc::clone(&flag));
        let handle = tokio::spawn(async move { server.start(MockHandler).await });
        for _ in 0..100 {
            if socket_path.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        (flag, handle)
    }

    async fn request(socket_path: &Path, line: &str) -> String {
        let mut stream = UnixStream::connect(socket_path).await.unwrap();
        stream.write_all(line.as_bytes()).await.unwrap();
        let mut reply = String::new();
        stream.read_to_string(&mut reply).await.unwrap();
        reply
    }

    #[test]
    fn test_default_socket_path_returns_valid_path() {
        let path = ConsoleServer::default_socket_path();
        let path_str = path.to_string_lossy();
        if std::env::var("XDG_RUNTIME_DIR").is_ok() {
            assert!(path_str.ends_with("ivs.sock"), "got: {:?}", path);
        } else {
            let uid = unsafe { libc::getuid() };
            assert_eq!(path_str, format!("/tmp/ivs-{}.sock", uid));
        }
    }

    #[tokio::test]
    async fn test_server_answers_commands() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("console.sock");
        let (flag, handle) = start_server(&socket_path).await;

        assert_eq!(request(&socket_path, "list\n").await, "ivs-sessions: \n");
        assert_eq!(request(&socket_path, "KILL known\n").await, "+OK\n");
        assert_eq!(
            request(&socket_path, "kill other\n").await,
            "-ERR: session not found\n"
        );
        assert!(request(&socket_path, "bogus\n").await.starts_with("-USAGE: "));

        flag.store(true, Ordering::SeqCst);
        handle.await.unwrap().unwrap();
        assert!(!socket_path.exists());
    }

    #[tokio::test]
    async fn test_multiple_concurrent_clients() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("console.sock");
        let (flag, handle) = start_server(&socket_path).await;

        let clients: Vec<_> = (0..5)
            .map(|_| {
                let socket_path = socket_path.clone();
                tokio::spawn(async move { request(&socket_path, "playback s1 /a.wav\n").await })
            })
            .collect();
        for client in clients {
            assert_eq!(client.await.unwrap(), "+OK\n");
        }

        flag.store(true, Ordering::SeqCst);
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_stop_ends_accept_loop() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("console.sock");
        let server = Arc::new(ConsoleServer::new(socket_path.clone()));
        let handle = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.start(MockHandler).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(socket_path.exists());

        server.stop();
        handle.await.unwrap().unwrap();
        assert!(!socket_path.exists());
    }

    #[tokio::test]
    async fn test_server_replaces_stale_socket() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("console.sock");
        std::fs::write(&socket_path, b"stale").unwrap();

        let (flag, handle) = start_server(&socket_path).await;
        // Give the server time to swap the stale file for a listener.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(request(&socket_path, "list\n").await, "ivs-sessions: \n");

        flag.store(true, Ordering::SeqCst);
        handle.await.unwrap().unwrap();
    }
}
