//! Relay core: the canonical document and the sync handshake.
//!
//! ```text
//! conn task A ──┐                          ┌──► outbound A
//!               ├── RelayCommand (mpsc) ── Relay task ──┤
//! conn task B ──┘        │                 │            └──► outbound B
//!                        ▼                 ▼
//!               strict arrival order    SharedText (single writer)
//! ```
//!
//! The relay task is the only owner of the document and the connection
//! registry. Connection tasks talk to it through a [`RelayHandle`]. Commands
//! are handled one at a time, so an update is fully applied before its diff
//! is broadcast, and the broadcast reaches the registry as it is at that
//! moment.
//!
//! The relay never sends SyncStep1: the handshake is always opened by the
//! client.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::document::{ChangeOrigin, DocumentError, SharedText};
use crate::protocol::{Message, EMPTY_UPDATE};
use crate::registry::{ConnectionId, ConnectionRegistry, ConnectionState, Outbound, RegistryStats};

/// Errors surfaced by the relay.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Processing a connection's message failed; that connection is closed.
    #[error("document error: {0}")]
    Document(#[from] DocumentError),
    /// The connection limit is reached; the new connection is refused.
    #[error("connection limit of {0} reached")]
    AtCapacity(usize),
    /// The relay task is gone.
    #[error("relay task stopped")]
    Stopped,
}

/// Relay statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub total_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub updates_applied: u64,
    pub updates_suppressed: u64,
    pub decode_errors: u64,
    pub registry: RegistryStats,
}

/// The canonical replica plus its live connections.
pub struct Relay {
    doc: SharedText,
    registry: ConnectionRegistry,
    stats: RelayStats,
    max_connections: usize,
}

impl Relay {
    /// Create a relay over an empty document with root text `text_name`.
    pub fn new(text_name: &str) -> Self {
        Self {
            doc: SharedText::new(text_name),
            registry: ConnectionRegistry::new(),
            stats: RelayStats::default(),
            max_connections: usize::MAX,
        }
    }

    /// Cap the number of simultaneously registered connections.
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Register a connection. Nothing is sent: the client opens the handshake.
    ///
    /// At the connection limit the sender is dropped unregistered and
    /// `AtCapacity` is returned.
    pub fn on_connect(
        &mut self,
        id: ConnectionId,
        sender: mpsc::Sender<Outbound>,
    ) -> Result<(), RelayError> {
        if self.registry.len() >= self.max_connections {
            log::warn!("Refusing {id}: {} connections already open", self.registry.len());
            return Err(RelayError::AtCapacity(self.max_connections));
        }
        self.registry.register(id, sender);
        self.stats.total_connections += 1;
        log::info!("Connection {id} registered ({} live)", self.registry.len());
        Ok(())
    }

    /// Handle one inbound frame from `id`.
    ///
    /// Decode errors and protocol anomalies are logged and swallowed. A
    /// returned error means the connection must be closed.
    pub fn on_message(&mut self, id: ConnectionId, raw: &[u8]) -> Result<(), RelayError> {
        self.stats.total_messages += 1;
        self.stats.total_bytes += raw.len() as u64;

        let message = match Message::decode(raw) {
            Ok(message) => message,
            Err(e) => {
                self.stats.decode_errors += 1;
                log::warn!("Dropping message from {id}: {e} ({raw:?})");
                return Ok(());
            }
        };

        match message {
            Message::SyncStep1(state_vector) => {
                let diff = self.doc.diff(&state_vector)?;
                log::debug!("Replying to SyncStep1 from {id} with {} byte diff", diff.len());
                let reply = Arc::new(Message::sync_step2(diff).encode());
                if self.registry.send_to(&id, reply) {
                    self.registry.mark_synced(&id);
                }
            }

            Message::SyncStep2(_) => {
                log::warn!("Unexpected SyncStep2 from {id}: the relay never sends SyncStep1");
            }

            Message::Update(update) => {
                if update.as_slice() == EMPTY_UPDATE {
                    log::trace!("Ignoring empty update from {id}");
                    return Ok(());
                }
                let diff = self.doc.apply(&update, ChangeOrigin::Remote)?;
                self.stats.updates_applied += 1;

                if diff.as_slice() == EMPTY_UPDATE {
                    // Already reflected here (duplicate or late delivery)
                    self.stats.updates_suppressed += 1;
                    log::debug!("Update from {id} produced no diff, skipping broadcast");
                    return Ok(());
                }

                let frame = Arc::new(Message::update(diff).encode());
                let delivered = self.registry.broadcast(frame);
                log::debug!("Broadcast update from {id} to {delivered} connections");
                log::trace!("Document text: {:?}", self.doc.text());
            }

            Message::Awareness(_) => {
                log::trace!("Ignoring awareness message from {id}");
            }
        }
        Ok(())
    }

    /// Remove a connection. Later broadcasts never reference it.
    pub fn on_disconnect(&mut self, id: ConnectionId) {
        if self.registry.remove(&id) {
            log::info!("Connection {id} removed ({} live)", self.registry.len());
        }
    }

    /// Close a connection whose message could not be processed.
    fn close(&mut self, id: ConnectionId, error: &RelayError) {
        log::error!("Closing connection {id}: {error}");
        self.on_disconnect(id);
    }

    pub fn state(&self, id: &ConnectionId) -> Option<ConnectionState> {
        self.registry.state(id)
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    pub fn document(&self) -> &SharedText {
        &self.doc
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            registry: self.registry.stats(),
            ..self.stats.clone()
        }
    }

    /// Move the relay onto its own task and return a handle to it.
    pub fn spawn(self, command_capacity: usize) -> (RelayHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(command_capacity);
        let task = tokio::spawn(self.run(rx));
        (RelayHandle { commands: tx }, task)
    }

    /// Process commands until every handle is dropped.
    pub async fn run(mut self, mut commands: mpsc::Receiver<RelayCommand>) {
        while let Some(command) = commands.recv().await {
            match command {
                RelayCommand::Connect { id, outbound, reply } => {
                    let _ = reply.send(self.on_connect(id, outbound));
                }
                RelayCommand::Inbound { id, data } => {
                    if let Err(e) = self.on_message(id, &data) {
                        self.close(id, &e);
                    }
                }
                RelayCommand::Disconnect { id } => self.on_disconnect(id),
                RelayCommand::Stats { reply } => {
                    let _ = reply.send(self.stats());
                }
                RelayCommand::Text { reply } => {
                    let _ = reply.send(self.doc.text());
                }
            }
        }
        log::info!("Relay stopped");
    }
}

/// Commands accepted by the relay task.
#[derive(Debug)]
pub enum RelayCommand {
    Connect {
        id: ConnectionId,
        outbound: mpsc::Sender<Outbound>,
        reply: oneshot::Sender<Result<(), RelayError>>,
    },
    Inbound {
        id: ConnectionId,
        data: Vec<u8>,
    },
    Disconnect {
        id: ConnectionId,
    },
    Stats {
        reply: oneshot::Sender<RelayStats>,
    },
    Text {
        reply: oneshot::Sender<String>,
    },
}

/// Cloneable handle to a running relay task.
#[derive(Debug, Clone)]
pub struct RelayHandle {
    commands: mpsc::Sender<RelayCommand>,
}

impl RelayHandle {
    pub async fn connect(
        &self,
        id: ConnectionId,
        outbound: mpsc::Sender<Outbound>,
    ) -> Result<(), RelayError> {
        let (reply, rx) = oneshot::channel();
        self.send(RelayCommand::Connect { id, outbound, reply }).await?;
        rx.await.map_err(|_| RelayError::Stopped)?
    }

    pub async fn inbound(&self, id: ConnectionId, data: Vec<u8>) -> Result<(), RelayError> {
        self.send(RelayCommand::Inbound { id, data }).await
    }

    pub async fn disconnect(&self, id: ConnectionId) -> Result<(), RelayError> {
        self.send(RelayCommand::Disconnect { id }).await
    }

    pub async fn stats(&self) -> Result<RelayStats, RelayError> {
        let (reply, rx) = oneshot::channel();
        self.send(RelayCommand::Stats { reply }).await?;
        rx.await.map_err(|_| RelayError::Stopped)
    }

    /// Current text of the canonical document.
    pub async fn text(&self) -> Result<String, RelayError> {
        let (reply, rx) = oneshot::channel();
        self.send(RelayCommand::Text { reply }).await?;
        rx.await.map_err(|_| RelayError::Stopped)
    }

    async fn send(&self, command: RelayCommand) -> Result<(), RelayError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| RelayError::Stopped)
    }
}
