//! Shared text document backed by a Yrs `Doc`.
//!
//! Every mutation runs inside one transaction tagged with a [`ChangeOrigin`],
//! and returns the update produced by that transaction. Callers consume that
//! return value directly instead of registering after-transaction observers.

use thiserror::Error;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{
    Doc, GetString, OffsetKind, Options, Origin, ReadTxn, StateVector, Text, TextRef, Transact,
    TransactionMut, Update,
};

/// Default name of the shared root text.
pub const DEFAULT_TEXT_NAME: &str = "quill";

const LOCAL_ORIGIN: &str = "local";
const REMOTE_ORIGIN: &str = "remote";

/// Who authored a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// Edit made by the user of this replica.
    Local,
    /// Update received from another replica.
    Remote,
}

impl ChangeOrigin {
    /// Recover the origin tag of a running transaction.
    ///
    /// Untagged transactions count as local.
    pub fn of(txn: &TransactionMut) -> Self {
        match txn.origin() {
            Some(origin) if *origin == Origin::from(REMOTE_ORIGIN) => Self::Remote,
            _ => Self::Local,
        }
    }

    fn tag(self) -> &'static str {
        match self {
            Self::Local => LOCAL_ORIGIN,
            Self::Remote => REMOTE_ORIGIN,
        }
    }
}

/// Errors raised by document operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentError {
    #[error("invalid state vector: {0}")]
    InvalidStateVector(String),
    #[error("invalid update: {0}")]
    InvalidUpdate(String),
    #[error("failed to apply update: {0}")]
    Apply(String),
    #[error("position {index} + {len} out of bounds for text of length {text_len}")]
    OutOfBounds { index: u32, len: u32, text_len: u32 },
}

/// A Yrs document holding a single root text.
///
/// Offsets are counted in UTF-16 code units so positions agree with
/// browser editors and Yjs peers.
pub struct SharedText {
    doc: Doc,
    text: TextRef,
}

impl SharedText {
    /// Create an empty document with a root text named `name`.
    pub fn new(name: &str) -> Self {
        let options = Options {
            offset_kind: OffsetKind::Utf16,
            ..Options::default()
        };
        let doc = Doc::with_options(options);
        let text = doc.get_or_insert_text(name);
        Self { doc, text }
    }

    /// Encoded state vector of this replica.
    pub fn state_vector(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.state_vector().encode_v1()
    }

    /// Everything this replica has that a peer with `state_vector` lacks.
    pub fn diff(&self, state_vector: &[u8]) -> Result<Vec<u8>, DocumentError> {
        let remote_sv = StateVector::decode_v1(state_vector)
            .map_err(|e| DocumentError::InvalidStateVector(e.to_string()))?;
        let txn = self.doc.transact();
        Ok(txn.encode_diff_v1(&remote_sv))
    }

    /// The whole replica as one update, as seen by an empty peer.
    pub fn full_update(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_diff_v1(&StateVector::default())
    }

    /// Apply an encoded update and return the diff it produced.
    ///
    /// The update is decoded before any transaction starts, so malformed
    /// bytes never touch the document. The returned diff is
    /// [`EMPTY_UPDATE`](crate::protocol::EMPTY_UPDATE) when the update was
    /// already reflected here.
    pub fn apply(&self, update: &[u8], origin: ChangeOrigin) -> Result<Vec<u8>, DocumentError> {
        let update =
            Update::decode_v1(update).map_err(|e| DocumentError::InvalidUpdate(e.to_string()))?;
        let mut txn = self.doc.transact_mut_with(origin.tag());
        txn.apply_update(update)
            .map_err(|e| DocumentError::Apply(e.to_string()))?;
        Ok(txn.encode_update_v1())
    }

    /// Run text operations inside one transaction and return its diff.
    pub fn edit<F>(&self, origin: ChangeOrigin, f: F) -> Result<Vec<u8>, DocumentError>
    where
        F: FnOnce(&TextRef, &mut TransactionMut) -> Result<(), DocumentError>,
    {
        let mut txn = self.doc.transact_mut_with(origin.tag());
        f(&self.text, &mut txn)?;
        Ok(txn.encode_update_v1())
    }

    /// Current plain text content.
    pub fn text(&self) -> String {
        let txn = self.doc.transact();
        self.text.get_string(&txn)
    }

    /// Length in UTF-16 code units.
    pub fn len(&self) -> u32 {
        let txn = self.doc.transact();
        self.text.len(&txn)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The root text, for observers.
    pub fn text_ref(&self) -> &TextRef {
        &self.text
    }
}

impl Default for SharedText {
    fn default() -> Self {
        Self::new(DEFAULT_TEXT_NAME)
    }
}
