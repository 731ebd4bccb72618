//! WebSocket relay server.
//!
//! Architecture:
//! ```text
//! Client A ──► conn task A ──┐                     ┌──► conn task A ──► Client A
//!                            ├──► Relay task ──────┤
//! Client B ──► conn task B ──┘    (SharedText)     └──► conn task B ──► Client B
//! ```
//!
//! Each accepted socket gets its own task. Inbound binary frames go to the
//! relay task; frames queued by the relay for this connection are written
//! back to the socket. When the relay drops a connection's queue (protocol
//! failure or slow consumer) the socket is closed.

use std::net::SocketAddr;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::document::DEFAULT_TEXT_NAME;
use crate::registry::{ConnectionId, Outbound};
use crate::relay::{Relay, RelayError, RelayHandle, RelayStats};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Name of the shared root text
    pub text_name: String,
    /// Frames buffered per connection before it counts as too slow
    pub outbound_capacity: usize,
    /// Commands buffered in front of the relay task
    pub command_capacity: usize,
    /// Maximum simultaneous connections
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".to_string(),
            text_name: DEFAULT_TEXT_NAME.to_string(),
            outbound_capacity: 256,
            command_capacity: 1024,
            max_connections: 1000,
        }
    }
}

/// Errors raised by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error(transparent)]
    Relay(#[from] RelayError),
}

/// The relay server: a bound listener plus a running relay task.
pub struct SyncServer {
    config: ServerConfig,
    listener: TcpListener,
    relay: RelayHandle,
    _relay_task: JoinHandle<()>,
}

impl SyncServer {
    /// Bind the listener and start the relay task.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(&config.bind_addr).await?;
        let (relay, relay_task) = Relay::new(&config.text_name)
            .with_max_connections(config.max_connections)
            .spawn(config.command_capacity);
        log::info!("Sync server listening on {}", listener.local_addr()?);

        Ok(Self {
            config,
            listener,
            relay,
            _relay_task: relay_task,
        })
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle to the relay task.
    pub fn relay(&self) -> RelayHandle {
        self.relay.clone()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub async fn stats(&self) -> Result<RelayStats, ServerError> {
        Ok(self.relay.stats().await?)
    }

    /// Accept connections until the listener fails.
    pub async fn run(self) -> Result<(), ServerError> {
        loop {
            let (stream, addr) = self.listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let relay = self.relay.clone();
            let config = self.config.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, relay, config).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }
}

/// Drive one WebSocket connection until it closes.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    relay: RelayHandle,
    config: ServerConfig,
) -> Result<(), ServerError> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let id = ConnectionId::new();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Outbound>(config.outbound_capacity);
    match relay.connect(id, outbound_tx).await {
        Ok(()) => {}
        Err(RelayError::AtCapacity(limit)) => {
            log::warn!("Rejecting {addr}: connection limit of {limit} reached");
            ws_sender.send(WsMessage::Close(None)).await?;
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    }
    log::info!("WebSocket connection {id} established from {addr}");

    let result = async {
        loop {
            tokio::select! {
                msg = ws_receiver.next() => match msg {
                    Some(Ok(WsMessage::Binary(data))) => {
                        relay.inbound(id, data.into()).await?;
                    }
                    Some(Ok(WsMessage::Text(_))) => {
                        log::warn!("Ignoring text frame from {id}: protocol is binary only");
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        ws_sender.send(WsMessage::Pong(data)).await?;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        log::info!("Connection {id} closed by {addr}");
                        break;
                    }
                    Some(Err(e)) => {
                        log::warn!("WebSocket error from {addr}: {e}");
                        break;
                    }
                    Some(Ok(_)) => {}
                },

                frame = outbound_rx.recv() => match frame {
                    Some(frame) => {
                        ws_sender.send(WsMessage::Binary(frame.to_vec().into())).await?;
                    }
                    None => {
                        log::info!("Relay closed connection {id}");
                        let _ = ws_sender.send(WsMessage::Close(None)).await;
                        break;
                    }
                },
            }
        }
        Ok::<(), ServerError>(())
    }
    .await;

    // Deregister on every exit path, graceful or not.
    relay.disconnect(id).await?;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:8000");
        assert_eq!(config.text_name, "quill");
        assert_eq!(config.outbound_capacity, 256);
        assert_eq!(config.command_capacity, 1024);
        assert_eq!(config.max_connections, 1000);
    }

    #[tokio::test]
    async fn test_server_bind_ephemeral_port() {
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            ..ServerConfig::default()
        };
        let server = SyncServer::bind(config).await.unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_server_stats_initial() {
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            ..ServerConfig::default()
        };
        let server = SyncServer::bind(config).await.unwrap();
        let stats = server.stats().await.unwrap();
        assert_eq!(stats, RelayStats::default());
    }

    #[tokio::test]
    async fn test_bind_conflict_is_error() {
        let first = SyncServer::bind(ServerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            ..ServerConfig::default()
        })
        .await
        .unwrap();
        let taken = first.local_addr().unwrap().to_string();

        let second = SyncServer::bind(ServerConfig {
            bind_addr: taken,
            ..ServerConfig::default()
        })
        .await;
        assert!(matches!(second, Err(ServerError::Io(_))));
    }
}
