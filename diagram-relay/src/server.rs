//! WebSocket host for the relay.
//!
//! Architecture:
//! ```text
//! ws://host/diagram/ex1 ──┐
//!                         ├── room "ex1" ── RelayHub ── RoomRegistry
//! ws://host/diagram/ex1 ──┘                    │           └── DocumentStore per room
//!                                              │
//!                          ┌───────────────────┼───────────────────┐
//!                          ▼                   ▼                   ▼
//!                   outbound queue       outbound queue      outbound queue
//!                   → writer task        → writer task       → writer task
//! ```
//!
//! Each connection gets a bounded outbound queue drained by its own writer
//! task, so broadcasting never awaits a socket. The room key is the request
//! path below `path_prefix`.

use std::net::SocketAddr;
use std::sync::Arc;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

use crate::hub::{RelayHub, RelayStats};
use crate::session::SessionHandle;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Path under which rooms are addressed, e.g. `/diagram/{room}`
    pub path_prefix: String,
    /// Frames buffered per session before deliveries to it start failing
    pub outbound_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            path_prefix: "/diagram".to_string(),
            outbound_capacity: 256,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub active_rooms: usize,
    pub relay: RelayStats,
}

#[derive(Debug, Default)]
struct ConnectionCounters {
    total_connections: u64,
    active_connections: u64,
    total_messages: u64,
    total_bytes: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Extract the room key from a request path.
///
/// `/diagram/ex1` with prefix `/diagram` gives `ex1`. Paths outside the
/// prefix use the whole path, trimmed of slashes.
pub fn room_key_from_path(path: &str, prefix: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let rest = match path.strip_prefix(prefix) {
        Some(rest) if prefix.is_empty() || rest.is_empty() || rest.starts_with('/') => rest,
        _ => path,
    };
    rest.trim_matches('/').to_owned()
}

pub struct RelayServer {
    config: ServerConfig,
    hub: Arc<RelayHub>,
    counters: Arc<RwLock<ConnectionCounters>>,
}

impl RelayServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            hub: Arc::new(RelayHub::new()),
            counters: Arc::new(RwLock::new(ConnectionCounters::default())),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Bind the configured address and serve forever.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        log::info!(
            "Diagram relay listening on {} (rooms under {})",
            listener.local_addr()?,
            self.config.path_prefix
        );

        loop {
            let (stream, addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    self.hub.on_transport_error(&e);
                    continue;
                }
            };
            log::debug!("New TCP connection from {addr}");

            let hub = self.hub.clone();
            let counters = self.counters.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, hub.clone(), counters, config).await {
                    hub.on_transport_error(&e);
                }
            });
        }
    }

    /// Handle a single WebSocket connection from handshake to leave.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        hub: Arc<RelayHub>,
        counters: Arc<RwLock<ConnectionCounters>>,
        config: ServerConfig,
    ) -> Result<(), ServerError> {
        let mut path = String::new();
        let ws_stream = tokio_tungstenite::accept_hdr_async(
            stream,
            |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                path = req.uri().path().to_owned();
                Ok(resp)
            },
        )
        .await?;
        let room_key = room_key_from_path(&path, &config.path_prefix);
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        {
            let mut c = counters.write().await;
            c.total_connections += 1;
            c.active_connections += 1;
        }

        let (session, mut outbound_rx) = SessionHandle::channel(config.outbound_capacity);
        let session_id = session.id();
        log::info!("WebSocket connection from {addr} is session {session_id} in room {room_key}");

        // Writer task: drain the session's queue into the socket
        let writer = tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                if let Err(e) = ws_sender.send(Message::text(text)).await {
                    log::debug!("Write to session {session_id} failed: {e}");
                    break;
                }
            }
            let _ = ws_sender.close().await;
        });

        hub.on_join(&room_key, session.clone()).await;

        while let Some(frame) = ws_receiver.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    {
                        let mut c = counters.write().await;
                        c.total_messages += 1;
                        c.total_bytes += text.len() as u64;
                    }
                    log::trace!("Message from {session_id}: {}", text.as_str());
                    hub.on_message(&room_key, session_id, text.as_str()).await;
                }
                Ok(Message::Binary(data)) => {
                    log::debug!("Ignoring {} byte binary frame from {session_id}", data.len());
                }
                Ok(Message::Close(_)) => {
                    log::info!("Connection closed by {addr}");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    hub.on_transport_error(&e);
                    break;
                }
            }
        }

        hub.on_leave(&room_key, session_id).await;
        drop(session);
        let _ = writer.await;

        {
            let mut c = counters.write().await;
            c.active_connections = c.active_connections.saturating_sub(1);
        }
        Ok(())
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        let c = self.counters.read().await;
        ServerStats {
            total_connections: c.total_connections,
            active_connections: c.active_connections,
            total_messages: c.total_messages,
            total_bytes: c.total_bytes,
            active_rooms: self.hub.registry().room_count().await,
            relay: self.hub.stats(),
        }
    }

    pub fn hub(&self) -> &Arc<RelayHub> {
        &self.hub
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}
