//! Editor binding: translates between editor deltas and document text
//! operations.
//!
//! Every transaction carries a [`ChangeOrigin`] tag. The text observer
//! records each change together with that tag, and the binding branches on
//! it:
//!
//! ```text
//!            apply_local_delta                on_remote_update
//!                   │ (Local)                        │ (Remote)
//!                   ▼                                ▼
//!              SharedText ── text observer ──► pending changes
//!                   │                                │
//!      outbound Update (Local only)     editor deltas (Remote only)
//! ```
//!
//! Local changes are never echoed back to the editor, and remote changes are
//! never sent back over the transport.

use std::sync::{Arc, Mutex, PoisonError};
use yrs::types::Delta;
use yrs::{Any, Observable, Out, Subscription, Text};

use crate::delta::{from_attrs, to_attrs, utf16_len, DeltaOp, EditorDelta};
use crate::document::{ChangeOrigin, DocumentError, SharedText, DEFAULT_TEXT_NAME};
use crate::protocol::{Message, EMPTY_UPDATE};

/// A text change captured by the observer.
#[derive(Debug, Clone, PartialEq)]
struct TextChange {
    origin: ChangeOrigin,
    delta: EditorDelta,
}

type ChangeLog = Arc<Mutex<Vec<TextChange>>>;

/// Client-side replica bound to a rich-text editor.
pub struct EditorBinding {
    doc: SharedText,
    changes: ChangeLog,
    _subscription: Subscription,
}

impl EditorBinding {
    /// Create a binding over a fresh document with the given text name.
    pub fn new(text_name: &str) -> Self {
        let doc = SharedText::new(text_name);
        let changes: ChangeLog = Arc::new(Mutex::new(Vec::new()));

        let sink = changes.clone();
        let subscription = doc.text_ref().observe(move |txn, event| {
            let origin = ChangeOrigin::of(txn);
            let mut delta = EditorDelta::new();
            for change in event.delta(txn) {
                match change {
                    Delta::Inserted(Out::Any(Any::String(chunk)), attrs) => {
                        delta.ops.push(DeltaOp::Insert {
                            insert: chunk.to_string(),
                            attributes: attrs.as_deref().map(from_attrs),
                        });
                    }
                    Delta::Inserted(_, _) => {
                        log::warn!("Skipping non-text insert in text change");
                    }
                    Delta::Deleted(len) => {
                        delta.ops.push(DeltaOp::Delete { delete: *len });
                    }
                    Delta::Retain(len, attrs) => {
                        delta.ops.push(DeltaOp::Retain {
                            retain: *len,
                            attributes: attrs.as_deref().map(from_attrs),
                        });
                    }
                }
            }
            sink.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(TextChange { origin, delta });
        });

        Self {
            doc,
            changes,
            _subscription: subscription,
        }
    }

    /// Apply an editor delta as one local transaction.
    ///
    /// The whole delta is checked against the current text length first, so
    /// a rejected delta leaves the document untouched. Returns the `Update`
    /// to send to the server, or `None` if nothing changed.
    pub fn apply_local_delta(&self, delta: &EditorDelta) -> Result<Option<Message>, DocumentError> {
        validate(delta, self.doc.len())?;

        let diff = self.doc.edit(ChangeOrigin::Local, |text, txn| {
            let mut cursor = 0u32;
            for op in &delta.ops {
                match op {
                    DeltaOp::Retain { retain, attributes } => {
                        if let Some(attrs) = attributes {
                            text.format(txn, cursor, *retain, to_attrs(attrs));
                        }
                        cursor += retain;
                    }
                    DeltaOp::Insert { insert, attributes } => {
                        match attributes {
                            Some(attrs) => {
                                text.insert_with_attributes(txn, cursor, insert, to_attrs(attrs))
                            }
                            None => text.insert(txn, cursor, insert),
                        }
                        cursor += utf16_len(insert);
                    }
                    DeltaOp::Delete { delete } => {
                        text.remove_range(txn, cursor, *delete);
                    }
                }
            }
            Ok(())
        })?;

        // Drains the local change; nothing reaches the editor.
        self.on_document_change();
        log::debug!("Applied local delta with {} ops", delta.ops.len());

        Ok(Self::outbound_update(ChangeOrigin::Local, diff))
    }

    /// Apply an update received from the server.
    ///
    /// Returns the deltas the editor must render. Remote changes never
    /// produce outbound traffic.
    pub fn on_remote_update(&self, diff: &[u8]) -> Result<Vec<EditorDelta>, DocumentError> {
        if diff == EMPTY_UPDATE {
            return Ok(Vec::new());
        }
        self.doc.apply(diff, ChangeOrigin::Remote)?;
        Ok(self.on_document_change())
    }

    /// Drain captured text changes and return those the editor must see.
    ///
    /// Changes from local transactions are suppressed: the editor already
    /// shows them.
    pub fn on_document_change(&self) -> Vec<EditorDelta> {
        let drained: Vec<TextChange> = {
            let mut changes = self.changes.lock().unwrap_or_else(PoisonError::into_inner);
            changes.drain(..).collect()
        };

        drained
            .into_iter()
            .filter_map(|change| match change.origin {
                ChangeOrigin::Local => {
                    log::trace!("Suppressing local echo of {} ops", change.delta.ops.len());
                    None
                }
                ChangeOrigin::Remote => {
                    let mut delta = change.delta;
                    delta.normalize();
                    Some(delta)
                }
            })
            .collect()
    }

    /// Decide whether a transaction's diff goes over the transport.
    pub fn outbound_update(origin: ChangeOrigin, diff: Vec<u8>) -> Option<Message> {
        if origin == ChangeOrigin::Remote || diff.as_slice() == EMPTY_UPDATE {
            return None;
        }
        Some(Message::update(diff))
    }

    /// Everything this replica holds, as an `Update` for the server.
    ///
    /// Sent after the handshake so edits the server never received reach
    /// it. The server applies it idempotently and relays only what is new.
    pub fn full_state_update(&self) -> Option<Message> {
        Self::outbound_update(ChangeOrigin::Local, self.doc.full_update())
    }

    /// Handshake opener carrying this replica's state vector.
    pub fn sync_step1(&self) -> Message {
        Message::sync_step1(self.doc.state_vector())
    }

    pub fn text(&self) -> String {
        self.doc.text()
    }

    pub fn document(&self) -> &SharedText {
        &self.doc
    }
}

impl Default for EditorBinding {
    fn default() -> Self {
        Self::new(DEFAULT_TEXT_NAME)
    }
}

/// Walk the delta against a text of `text_len` without touching it.
fn validate(delta: &EditorDelta, text_len: u32) -> Result<(), DocumentError> {
    let mut cursor = 0u32;
    let mut len = text_len;
    let out_of_bounds = |index, span, text_len| DocumentError::OutOfBounds {
        index,
        len: span,
        text_len,
    };

    for op in &delta.ops {
        match op {
            DeltaOp::Retain { retain, .. } => {
                if cursor.saturating_add(*retain) > len {
                    return Err(out_of_bounds(cursor, *retain, len));
                }
                cursor += retain;
            }
            DeltaOp::Insert { insert, .. } => {
                let span = utf16_len(insert);
                cursor += span;
                len += span;
            }
            DeltaOp::Delete { delete } => {
                if cursor.saturating_add(*delete) > len {
                    return Err(out_of_bounds(cursor, *delete, len));
                }
                len -= delete;
            }
        }
    }
    Ok(())
}
