//! Unix domain socket server for IPC
//!
//! Request-response communication with the host UI, plus push delivery of
//! engine notifications to connections that subscribed. Activation requests
//! are forwarded to the controller and answered with its verdict, so
//! `already_active` and `unavailable` reach the caller that pressed the
//! control.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tracing::{debug, error, info, warn};

use crate::assistant::ControlRequest;
use crate::events::RecognitionState;

use super::protocol::{DaemonStatus, Notification, Request, Response};

/// IPC server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    state: Arc<RwLock<ServerState>>,
    shutdown_tx: broadcast::Sender<()>,
    /// Requests forwarded to the controller loop
    control_tx: mpsc::Sender<ControlRequest>,
    /// Fan-out to subscribed clients
    notify_tx: broadcast::Sender<Notification>,
}

/// Shared server state
struct ServerState {
    status: DaemonStatus,
    start_time: std::time::Instant,
}

impl Server {
    /// Create a new IPC server bound to the given socket
    pub fn new(socket_path: &Path, control_tx: mpsc::Sender<ControlRequest>) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);
        let (notify_tx, _) = broadcast::channel(64);

        let state = Arc::new(RwLock::new(ServerState {
            status: DaemonStatus::default(),
            start_time: std::time::Instant::now(),
        }));

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            state,
            shutdown_tx,
            control_tx,
            notify_tx,
        })
    }

    /// Record which speech services the daemon came up with
    pub async fn set_capabilities(&self, recognition: bool, synthesis: bool) {
        let mut state = self.state.write().await;
        state.status.recognition_supported = recognition;
        state.status.synthesis_supported = synthesis;
    }

    /// Update the engine state reported by `GetStatus`
    pub async fn set_state(&self, engine_state: RecognitionState) {
        let mut state = self.state.write().await;
        state.status.state = engine_state;
    }

    /// Push a notification to every subscribed client
    pub fn publish(&self, notification: Notification) {
        let _ = self.notify_tx.send(notification);
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("server not initialized")?;

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let state = Arc::clone(&self.state);
                    let control_tx = self.control_tx.clone();
                    let notify_rx = self.notify_tx.subscribe();
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, state, control_tx, notify_rx) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection
    async fn handle_client(
        mut stream: UnixStream,
        state: Arc<RwLock<ServerState>>,
        control_tx: mpsc::Sender<ControlRequest>,
        mut notify_rx: broadcast::Receiver<Notification>,
    ) -> Result<()> {
        let mut len_buf = [0u8; 4];

        // Request-response phase
        loop {
            // Read message length (4-byte little-endian)
            match stream.read_exact(&mut len_buf).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    debug!("client disconnected");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }

            let len = u32::from_le_bytes(len_buf) as usize;
            if len > 1024 * 1024 {
                warn!(len, "message too large, disconnecting");
                return Ok(());
            }

            // Read message body
            let mut msg_buf = vec![0u8; len];
            stream.read_exact(&mut msg_buf).await?;

            // Parse request
            let request: Request =
                serde_json::from_slice(&msg_buf).context("failed to parse request")?;

            debug!(?request, "received request");

            let subscribe = matches!(request, Request::Subscribe);
            let response = Self::process_request(request, &state, &control_tx).await;
            Self::send_message(&mut stream, &response).await?;

            if subscribe {
                debug!("client subscribed to notifications");
                break;
            }
        }

        // Push phase: the connection is now a one-way notification stream.
        // A disconnected client surfaces as a send error on the next push.
        loop {
            match notify_rx.recv().await {
                Ok(notification) => {
                    Self::send_message(&mut stream, &notification).await?;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "notification receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Ok(());
                }
            }
        }
    }

    /// Send a length-prefixed JSON message
    async fn send_message<T: serde::Serialize>(stream: &mut UnixStream, msg: &T) -> Result<()> {
        let msg_bytes = serde_json::to_vec(msg)?;
        let msg_len = (msg_bytes.len() as u32).to_le_bytes();

        stream.write_all(&msg_len).await?;
        stream.write_all(&msg_bytes).await?;

        Ok(())
    }

    /// Process a request and return a response
    async fn process_request(
        request: Request,
        state: &Arc<RwLock<ServerState>>,
        control_tx: &mpsc::Sender<ControlRequest>,
    ) -> Response {
        match request {
            Request::Ping => Response::Pong,

            Request::GetStatus => {
                let mut state = state.write().await;
                state.status.uptime_secs = state.start_time.elapsed().as_secs();
                Response::Status(state.status.clone())
            }

            Request::Activate => {
                let (reply_tx, reply_rx) = oneshot::channel();
                let sent = control_tx
                    .send(ControlRequest::Activate { reply: reply_tx })
                    .await;

                if sent.is_err() {
                    return Self::controller_gone();
                }

                match reply_rx.await {
                    Ok(Ok(session)) => Response::Activated { session },
                    Ok(Err(err)) => Response::from_activate_error(err),
                    Err(_) => Self::controller_gone(),
                }
            }

            Request::Cancel => {
                if control_tx.send(ControlRequest::Cancel).await.is_err() {
                    return Self::controller_gone();
                }
                Response::Canceled
            }

            Request::Subscribe => Response::Subscribed,
        }
    }

    fn controller_gone() -> Response {
        Response::Error {
            code: "unavailable".to_string(),
            message: "controller is not running".to_string(),
        }
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}
