//! Management socket for observers (UI shell, `headlessd` CLI)
//!
//! Subjects:
//! - hello: protocol handshake
//! - getHeadlessConfig: projected service configuration
//! - start / stop / restart: lifecycle transitions
//! - updateHeadlessConfig: merge and persist preferences
//! - subscribe: switch the connection to a notification stream

use headless_core::{Command, CommandRequest, ErrorDetail, Response};
use headless_socket::{DEFAULT_MAX_LINE_BYTES, Reply, serve_jsonl_session};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixListener;

use crate::bus::BroadcastBus;
use crate::dispatch::CommandDispatcher;

/// Management socket server
pub struct SocketServer {
    path: PathBuf,
}

fn prepare_socket_path(path: &Path) -> Result<(), std::io::Error> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    Ok(())
}

impl SocketServer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept connections until `shutdown` resolves, then remove the socket file.
    pub async fn run<F>(
        &self,
        dispatcher: Arc<CommandDispatcher>,
        bus: Arc<BroadcastBus>,
        shutdown: F,
    ) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()>,
    {
        prepare_socket_path(&self.path)?;

        let listener = UnixListener::bind(&self.path)?;
        tracing::info!("Management socket listening on {}", self.path.display());

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let dispatcher = dispatcher.clone();
                        let bus = bus.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, dispatcher, bus).await {
                                tracing::error!("Connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Accept error: {}", e);
                    }
                }
            }
        }

        if let Err(e) = std::fs::remove_file(&self.path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!("Failed to remove socket {}: {}", self.path.display(), e);
        }
        Ok(())
    }
}

/// Serve one observer connection.
pub async fn handle_connection<S>(
    stream: S,
    dispatcher: Arc<CommandDispatcher>,
    bus: Arc<BroadcastBus>,
) -> Result<(), std::io::Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    serve_jsonl_session(
        stream,
        DEFAULT_MAX_LINE_BYTES,
        move |request: CommandRequest| {
            let dispatcher = dispatcher.clone();
            let bus = bus.clone();
            async move {
                tracing::debug!("Received request: {:?}", request);
                if matches!(Command::parse(&request), Ok(Command::Subscribe)) {
                    return Reply::Stream {
                        ack: Response::ok(serde_json::json!({ "subscribed": true })),
                        events: bus.subscribe(),
                    };
                }
                Reply::Respond(dispatcher.dispatch(request).await)
            }
        },
        |e| {
            Response::failure(ErrorDetail::new(
                "invalid_request",
                format!("Invalid request: {}", e),
            ))
        },
    )
    .await
}
