//! Registry of live connections and fan-out delivery.
//!
//! Each connection owns a bounded outbound channel drained by its socket
//! task. Delivery uses `try_send`, so a slow or dead recipient never stalls
//! the relay or the other recipients. A recipient whose channel is closed or
//! full is evicted; dropping its sender makes the socket task close the
//! connection.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

/// Encoded frame shared by every recipient of a broadcast.
pub type Outbound = Arc<Vec<u8>>;

/// Opaque per-connection handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handshake progress of a connection.
///
/// `Disconnected` is terminal and corresponds to the entry being removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Synced,
}

/// Statistics for monitoring delivery health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub messages_sent: u64,
    pub recipients_evicted: u64,
    pub active_connections: usize,
}

struct Entry {
    sender: mpsc::Sender<Outbound>,
    state: ConnectionState,
}

/// Live connections of a relay.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Entry>,
    messages_sent: u64,
    recipients_evicted: u64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection in the `Connected` state.
    pub fn register(&mut self, id: ConnectionId, sender: mpsc::Sender<Outbound>) {
        self.connections.insert(
            id,
            Entry {
                sender,
                state: ConnectionState::Connected,
            },
        );
    }

    /// Remove a connection. Returns whether it was present.
    pub fn remove(&mut self, id: &ConnectionId) -> bool {
        self.connections.remove(id).is_some()
    }

    pub fn mark_synced(&mut self, id: &ConnectionId) {
        if let Some(entry) = self.connections.get_mut(id) {
            entry.state = ConnectionState::Synced;
        }
    }

    /// State of a connection, `None` once disconnected.
    pub fn state(&self, id: &ConnectionId) -> Option<ConnectionState> {
        self.connections.get(id).map(|entry| entry.state)
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.keys().copied().collect()
    }

    /// Deliver a frame to a single connection.
    pub fn send_to(&mut self, id: &ConnectionId, frame: Outbound) -> bool {
        let Some(entry) = self.connections.get(id) else {
            log::debug!("Dropping frame for unknown connection {id}");
            return false;
        };
        if Self::deliver(id, &entry.sender, frame) {
            self.messages_sent += 1;
            true
        } else {
            self.evict(id);
            false
        }
    }

    /// Deliver a frame to every registered connection.
    ///
    /// Returns the number of recipients that accepted it. Failed recipients
    /// are evicted after the loop; delivery to the rest continues.
    pub fn broadcast(&mut self, frame: Outbound) -> usize {
        let mut failed = Vec::new();
        let mut delivered = 0;

        for (id, entry) in &self.connections {
            if Self::deliver(id, &entry.sender, frame.clone()) {
                delivered += 1;
            } else {
                failed.push(*id);
            }
        }

        self.messages_sent += delivered as u64;
        for id in &failed {
            self.evict(id);
        }
        delivered
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            messages_sent: self.messages_sent,
            recipients_evicted: self.recipients_evicted,
            active_connections: self.connections.len(),
        }
    }

    fn deliver(id: &ConnectionId, sender: &mpsc::Sender<Outbound>, frame: Outbound) -> bool {
        match sender.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::warn!("Outbound queue full for {id}, closing connection");
                false
            }
            Err(TrySendError::Closed(_)) => {
                log::debug!("Connection {id} already closed");
                false
            }
        }
    }

    fn evict(&mut self, id: &ConnectionId) {
        if self.connections.remove(id).is_some() {
            self.recipients_evicted += 1;
        }
    }
}
