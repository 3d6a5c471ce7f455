//! Console client: send one line, read the reply to EOF.

use crate::error::{IvsError, Result};
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

/// Send a console request line and return the raw reply text.
///
/// # Errors
/// Returns `IvsError::ConsoleConnection` if the socket cannot be reached or
/// the exchange fails.
pub async fn send_command(socket_path: &Path, line: &str) -> Result<String> {
    let mut stream =
        UnixStream::connect(socket_path)
            .await
            .map_err(|e| IvsError::ConsoleConnection {
                message: format!("Failed to connect to {}: {}", socket_path.display(), e),
            })?;

    let mut request = line.trim_end().to_string();
    request.push('\n');
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| IvsError::ConsoleConnection {
            message: format!("Failed to write command: {}", e),
        })?;

    let mut reply = String::new();
    stream
        .read_to_string(&mut reply)
        .await
        .map_err(|e| IvsError::ConsoleConnection {
            message: format!("Failed to read reply: {}", e),
        })?;

    Ok(reply)
}
