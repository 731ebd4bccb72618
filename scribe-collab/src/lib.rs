//! # scribe-collab: Collaborative rich-text sync over WebSocket
//!
//! A relay server holds the canonical shared text and fans out updates;
//! each editor keeps a local replica and a binding that translates editor
//! deltas to document operations and back.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     WebSocket      ┌──────────────┐
//! │ SyncClient   │ ◄────────────────► │ SyncServer   │
//! │ (per editor) │   y-protocol sync  │ (relay)      │
//! └──────┬───────┘                    └──────┬───────┘
//!        │                                   │
//!        ▼                                   ▼
//! ┌──────────────┐                    ┌──────────────┐
//! │EditorBinding │                    │ Relay task   │
//! │ + SharedText │                    │ + SharedText │
//! └──────────────┘                    └──────┬───────┘
//!                                            │
//!                                   ┌────────┴────────┐
//!                                   │ConnectionRegistry│
//!                                   │ (fan-out)       │
//!                                   └─────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: Sync message framing
//! - [`document`]: Shared text replica with origin-tagged transactions
//! - [`delta`]: Editor (Quill) delta model
//! - [`binding`]: Editor ↔ document translation with echo suppression
//! - [`registry`]: Live connections and non-blocking fan-out
//! - [`relay`]: Handshake, apply and rebroadcast
//! - [`server`]: WebSocket relay server
//! - [`client`]: WebSocket sync client with offline queue

pub mod protocol;
pub mod document;
pub mod delta;
pub mod binding;
pub mod registry;
pub mod relay;
pub mod server;
pub mod client;

// Re-exports for convenience
pub use protocol::{DecodeError, Message, EMPTY_UPDATE};
pub use document::{ChangeOrigin, DocumentError, SharedText, DEFAULT_TEXT_NAME};
pub use delta::{Attributes, DeltaOp, EditorDelta};
pub use binding::EditorBinding;
pub use registry::{ConnectionId, ConnectionRegistry, ConnectionState, RegistryStats};
pub use relay::{Relay, RelayCommand, RelayError, RelayHandle, RelayStats};
pub use server::{ServerConfig, ServerError, SyncServer};
pub use client::{ClientError, OfflineQueue, SyncClient, SyncEvent};
