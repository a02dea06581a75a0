//! # Admin Channel
//!
//! A Unix socket through which `widgets user …` reaches a running server.
//!
//! redb locks its file for as long as a process holds it open, so while the
//! server runs no other process can write users. The CLI therefore sends its
//! command to the server, which applies it to the same store the request
//! path reads. A revoked key stops resolving on the very next request.
//!
//! ## Protocol
//!
//! One JSON line each way per connection: a `UserCommand` in, a
//! `Result<Vec<String>, WidgetsError>` out. The socket file is created with
//! mode 0600, so only the server's owner can manage users through it.

use crate::cli::{UserCommand, run_user_command};
use std::io::{BufRead, BufReader as StdBufReader, ErrorKind, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use widgets_core::{SharedStore, WidgetsError};

/// Longest request line the server will read.
const MAX_REQUEST_BYTES: u64 = 4 * 1024;

/// How long the CLI waits for the server to answer.
const REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// What travels back over the socket.
type AdminReply = Result<Vec<String>, WidgetsError>;

fn io_err(context: &str, path: &Path, e: std::io::Error) -> WidgetsError {
    WidgetsError::Io(format!("{} '{}': {}", context, path.display(), e))
}

// =============================================================================
// SERVER SIDE
// =============================================================================

/// Bind the admin socket, replacing a file left by a server that is gone.
///
/// Call only while holding the database open: the redb lock guarantees no
/// other live server owns `path`.
pub fn bind(path: &Path) -> Result<UnixListener, WidgetsError> {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(socket = %path.display(), "Removed stale admin socket"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(io_err("Cannot remove stale admin socket", path, e)),
    }

    let listener =
        UnixListener::bind(path).map_err(|e| io_err("Cannot bind admin socket", path, e))?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err("Cannot restrict admin socket", path, e))?;
    Ok(listener)
}

/// Answer user commands until `shutdown` becomes `true`, then remove the
/// socket file.
pub async fn serve(
    listener: UnixListener,
    path: PathBuf,
    store: SharedStore,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!("Admin channel listening on {}", path.display());

    loop {
        if *shutdown.borrow_and_update() {
            break;
        }

        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    tokio::spawn(handle_connection(stream, Arc::clone(&store)));
                }
                Err(e) => tracing::warn!("Admin channel accept failed: {}", e),
            },
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    if let Err(e) = std::fs::remove_file(&path) {
        tracing::warn!("Cannot remove admin socket {}: {}", path.display(), e);
    }
    tracing::info!("Admin channel closed");
}

async fn handle_connection(stream: UnixStream, store: SharedStore) {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader.take(MAX_REQUEST_BYTES));
    let mut line = String::new();

    let reply: AdminReply = match reader.read_line(&mut line).await {
        Err(e) => Err(WidgetsError::Io(format!("Cannot read admin request: {}", e))),
        Ok(_) => match serde_json::from_str::<UserCommand>(line.trim_end()) {
            Ok(command) => apply(store, command).await,
            Err(e) => Err(WidgetsError::Deserialization(format!(
                "Bad admin request: {}",
                e
            ))),
        },
    };

    let mut payload = match serde_json::to_vec(&reply) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!("Cannot encode admin reply: {}", e);
            return;
        }
    };
    payload.push(b'\n');
    if let Err(e) = writer.write_all(&payload).await {
        tracing::warn!("Cannot send admin reply: {}", e);
    }
}

async fn apply(store: SharedStore, command: UserCommand) -> AdminReply {
    let operation = command.operation();
    let user = command.user_name().unwrap_or("-").to_string();

    let outcome = tokio::task::spawn_blocking(move || run_user_command(store.as_ref(), &command))
        .await
        .map_err(|e| WidgetsError::Io(format!("Admin task failed: {}", e)))
        .and_then(|result| result);

    match &outcome {
        Ok(_) => tracing::info!(
            event = "admin_command",
            operation,
            user = %user,
            "User command applied"
        ),
        Err(e) => tracing::warn!(
            event = "admin_command_failed",
            operation,
            user = %user,
            error = %e,
            "User command failed"
        ),
    }
    outcome
}

// =============================================================================
// CLIENT SIDE
// =============================================================================

/// Send `command` to the server listening on `path`.
///
/// Returns `Ok(None)` when no server is listening there; the caller then
/// works on the database file itself.
pub fn request(path: &Path, command: &UserCommand) -> Result<Option<Vec<String>>, WidgetsError> {
    let mut stream = match StdUnixStream::connect(path) {
        Ok(stream) => stream,
        Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::ConnectionRefused) => {
            return Ok(None);
        }
        Err(e) => return Err(io_err("Cannot reach server at", path, e)),
    };
    stream
        .set_read_timeout(Some(REPLY_TIMEOUT))
        .map_err(|e| io_err("Cannot configure admin socket", path, e))?;

    let mut payload = serde_json::to_vec(command)
        .map_err(|e| WidgetsError::Serialization(e.to_string()))?;
    payload.push(b'\n');
    stream
        .write_all(&payload)
        .map_err(|e| io_err("Cannot send command to server at", path, e))?;

    let mut line = String::new();
    StdBufReader::new(stream)
        .read_line(&mut line)
        .map_err(|e| io_err("No reply from server at", path, e))?;

    let reply: AdminReply = serde_json::from_str(line.trim_end())
        .map_err(|e| WidgetsError::Deserialization(format!("Bad reply from server: {}", e)))?;
    reply.map(Some)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use widgets_core::{MemoryStore, WidgetStore};

    #[test]
    fn no_server_means_none() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("absent.sock");
        assert!(request(&path, &UserCommand::List).unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn round_trip_and_cleanup() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("admin.sock");
        // A leftover from a crashed server must not block the bind.
        std::fs::write(&path, b"").unwrap();

        let store: SharedStore = Arc::new(MemoryStore::new());
        let listener = bind(&path).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(serve(listener, path.clone(), Arc::clone(&store), stop_rx));

        let client_path = path.clone();
        let lines = tokio::task::spawn_blocking(move || {
            request(
                &client_path,
                &UserCommand::Create {
                    name: "alice".to_string(),
                },
            )
        })
        .await
        .unwrap()
        .unwrap()
        .unwrap();
        assert!(lines[0].starts_with("Creating api user alice with key "));
        assert!(store.get_user("alice").unwrap().is_some());

        // Failures keep their kind across the socket.
        let client_path = path.clone();
        let err = tokio::task::spawn_blocking(move || {
            request(
                &client_path,
                &UserCommand::Delete {
                    name: "nobody".to_string(),
                },
            )
        })
        .await
        .unwrap()
        .unwrap_err();
        assert!(matches!(err, WidgetsError::UserNotFound(name) if name == "nobody"));

        stop_tx.send(true).unwrap();
        task.await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn garbage_request_gets_an_error_reply() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("admin.sock");
        let listener = bind(&path).unwrap();
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(serve(
            listener,
            path.clone(),
            Arc::new(MemoryStore::new()),
            stop_rx,
        ));

        let client_path = path.clone();
        let reply = tokio::task::spawn_blocking(move || {
            let mut stream = StdUnixStream::connect(&client_path).unwrap();
            stream.write_all(b"{\"Explode\":{}}\n").unwrap();
            let mut line = String::new();
            StdBufReader::new(stream).read_line(&mut line).unwrap();
            line
        })
        .await
        .unwrap();
        let reply: AdminReply = serde_json::from_str(reply.trim_end()).unwrap();
        assert!(matches!(reply, Err(WidgetsError::Deserialization(_))));

        stop_tx.send(true).unwrap();
        task.await.unwrap();
    }
}
