//! WebSocket sync client bound to an editor.
//!
//! Provides:
//! - Connection lifecycle (connect, handshake, disconnect detection)
//! - Local editor deltas turned into outbound updates
//! - Remote updates turned into editor deltas
//! - Offline queue for edits made while disconnected
//!
//! On open the client sends SyncStep1 with its state vector; the server
//! answers with SyncStep2 and then streams Update messages. Right after
//! SyncStep1 the client sends its whole replica as one Update. The server
//! never asks a client what it is missing, so this is how edits made offline
//! or lost with a dying socket reach it.

use std::collections::VecDeque;
use std::sync::Arc;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::binding::EditorBinding;
use crate::delta::EditorDelta;
use crate::document::DocumentError;
use crate::protocol::Message;

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the sync client.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Connection established, SyncStep1 sent
    Connected,
    /// SyncStep2 applied; the replica has caught up with the server
    StateSynced,
    /// A remote change the editor must render
    RemoteDelta(EditorDelta),
    /// Connection lost
    Disconnected,
}

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection failed: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("offline queue full")]
    QueueFull,
}

/// Updates authored while disconnected.
///
/// Bounds how far a replica may drift offline. On the next connect the queue
/// is cleared: the full-state update sent after SyncStep1 carries its edits.
pub struct OfflineQueue {
    queue: VecDeque<Vec<u8>>,
    max_size: usize,
}

impl OfflineQueue {
    /// Create a new offline queue with max capacity.
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(max_size.min(1024)),
            max_size,
        }
    }

    /// Whether another edit would exceed the capacity.
    pub fn is_full(&self) -> bool {
        self.queue.len() >= self.max_size
    }

    /// Queue an encoded Update frame. Returns false when full.
    pub fn enqueue(&mut self, frame: Vec<u8>) -> bool {
        if self.queue.len() >= self.max_size {
            return false;
        }
        self.queue.push_back(frame);
        true
    }

    /// Drain all queued frames in authoring order.
    pub fn drain(&mut self) -> Vec<Vec<u8>> {
        self.queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Total bytes queued.
    pub fn total_bytes(&self) -> usize {
        self.queue.iter().map(Vec::len).sum()
    }
}

/// The sync client.
pub struct SyncClient {
    server_url: String,
    binding: Arc<Mutex<EditorBinding>>,
    state: Arc<RwLock<ConnectionState>>,
    offline_queue: Arc<Mutex<OfflineQueue>>,
    outgoing_tx: Option<mpsc::Sender<Vec<u8>>>,
    event_tx: mpsc::Sender<SyncEvent>,
    event_rx: Option<mpsc::Receiver<SyncEvent>>,
}

impl SyncClient {
    /// Create a client for `server_url` editing the root text `text_name`.
    pub fn new(server_url: impl Into<String>, text_name: &str) -> Self {
        Self::with_offline_capacity(server_url, text_name, 10_000)
    }

    /// Like [`SyncClient::new`], accepting at most `capacity` offline edits.
    pub fn with_offline_capacity(
        server_url: impl Into<String>,
        text_name: &str,
        capacity: usize,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            server_url: server_url.into(),
            binding: Arc::new(Mutex::new(EditorBinding::new(text_name))),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            offline_queue: Arc::new(Mutex::new(OfflineQueue::new(capacity))),
            outgoing_tx: None,
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SyncEvent>> {
        self.event_rx.take()
    }

    /// Connect, open the handshake and push the local replica.
    pub async fn connect(&mut self) -> Result<(), ClientError> {
        *self.state.write().await = ConnectionState::Connecting;

        let (ws_stream, _) = match tokio_tungstenite::connect_async(&self.server_url).await {
            Ok(connected) => connected,
            Err(e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(e.into());
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward outgoing frames to the socket
        let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(256);
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if ws_writer.send(WsMessage::Binary(frame.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        let (step1, full_state) = {
            let binding = self.binding.lock().await;
            (binding.sync_step1(), binding.full_state_update())
        };
        let mut opening = vec![step1.encode()];
        if let Some(update) = full_state {
            opening.push(update.encode());
        }
        for frame in opening {
            if out_tx.send(frame).await.is_err() {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ClientError::ConnectionClosed);
            }
        }

        // The full state supersedes the individual queued updates
        let queued = self.offline_queue.lock().await.drain();
        if !queued.is_empty() {
            log::info!("Synced {} offline edits with the full local state", queued.len());
        }

        self.outgoing_tx = Some(out_tx);
        *self.state.write().await = ConnectionState::Connected;
        let _ = self.event_tx.send(SyncEvent::Connected).await;

        // Reader task: apply server messages through the binding
        let binding = self.binding.clone();
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(WsMessage::Binary(data)) => {
                        if !handle_server_frame(&binding, &event_tx, &data).await {
                            break;
                        }
                    }
                    Ok(WsMessage::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }

            *state.write().await = ConnectionState::Disconnected;
            let _ = event_tx.send(SyncEvent::Disconnected).await;
        });

        Ok(())
    }

    /// Apply an editor delta locally and send the resulting update.
    ///
    /// While disconnected the update is queued until the next connect. A full
    /// queue rejects the delta before the replica is touched.
    pub async fn apply_local_delta(&self, delta: &EditorDelta) -> Result<(), ClientError> {
        let binding = self.binding.lock().await;
        let connected = *self.state.read().await == ConnectionState::Connected;
        let sender = self.outgoing_tx.as_ref().filter(|_| connected);

        let Some(sender) = sender else {
            let mut queue = self.offline_queue.lock().await;
            if queue.is_full() {
                return Err(ClientError::QueueFull);
            }
            if let Some(message) = binding.apply_local_delta(delta)? {
                queue.enqueue(message.encode());
            }
            return Ok(());
        };

        let Some(message) = binding.apply_local_delta(delta)? else {
            return Ok(());
        };
        if let Err(mpsc::error::SendError(frame)) = sender.send(message.encode()).await {
            // Writer gone; the edit stays in the replica and goes out with
            // the full state on the next connect.
            log::debug!("Connection lost while sending, holding {} byte update", frame.len());
            self.offline_queue.lock().await.enqueue(frame);
        }
        Ok(())
    }

    /// Current text of the local replica.
    pub async fn text(&self) -> String {
        self.binding.lock().await.text()
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub async fn offline_queue_len(&self) -> usize {
        self.offline_queue.lock().await.len()
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}

/// Apply one server frame. Returns false when the connection must end.
async fn handle_server_frame(
    binding: &Mutex<EditorBinding>,
    event_tx: &mpsc::Sender<SyncEvent>,
    data: &[u8],
) -> bool {
    let message = match Message::decode(data) {
        Ok(message) => message,
        Err(e) => {
            log::warn!("Dropping server message: {e}");
            return true;
        }
    };

    let (diff, synced) = match message {
        Message::SyncStep2(diff) => (diff, true),
        Message::Update(diff) => (diff, false),
        other => {
            log::debug!("Ignoring {} from server", other.kind());
            return true;
        }
    };

    let deltas = match binding.lock().await.on_remote_update(&diff) {
        Ok(deltas) => deltas,
        Err(e) => {
            log::error!("Failed to apply server update: {e}");
            return false;
        }
    };

    for delta in deltas {
        let _ = event_tx.send(SyncEvent::RemoteDelta(delta)).await;
    }
    if synced {
        let _ = event_tx.send(SyncEvent::StateSynced).await;
    }
    true
}
