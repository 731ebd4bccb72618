//! Binary wire protocol for document synchronization.
//!
//! Wire format (y-protocols compatible):
//! ```text
//! ┌──────────┬──────────┬──────────────┬──────────┐
//! │ class    │ subtype  │ length       │ payload  │
//! │ 1 byte   │ 1 byte   │ var-uint     │ variable │
//! └──────────┴──────────┴──────────────┴──────────┘
//! ```
//!
//! Class `0` carries document sync messages (subtype `0` SyncStep1,
//! `1` SyncStep2, `2` Update). Class `1` carries awareness data, which has
//! no subtype byte and is kept verbatim.
//!
//! Payload lengths vary, so decoding goes through a length-aware cursor
//! rather than fixed offsets.

use thiserror::Error;
use yrs::encoding::read::{Cursor, Read};
use yrs::encoding::write::Write;

/// Update payload that carries no content change.
///
/// Encodes zero structs and an empty delete set. It is never applied and
/// never forwarded.
pub const EMPTY_UPDATE: &[u8] = &[0, 0];

/// Protocol class tags (first byte).
pub mod message_class {
    /// Document sync messages
    pub const SYNC: u8 = 0;
    /// Presence / awareness messages
    pub const AWARENESS: u8 = 1;
}

/// Sync subtype tags (second byte when the class is [`message_class::SYNC`]).
pub mod sync_type {
    /// Peer state vector, opens the handshake
    pub const SYNC_STEP1: u8 = 0;
    /// Diff answering a SyncStep1
    pub const SYNC_STEP2: u8 = 1;
    /// Incremental update
    pub const UPDATE: u8 = 2;
}

/// A decoded protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Encoded state vector of the sender.
    SyncStep1(Vec<u8>),
    /// Encoded update the receiver is missing.
    SyncStep2(Vec<u8>),
    /// Encoded incremental update.
    Update(Vec<u8>),
    /// Raw awareness bytes, everything after the class byte.
    Awareness(Vec<u8>),
}

impl Message {
    /// Create a SyncStep1 message from an encoded state vector.
    pub fn sync_step1(state_vector: Vec<u8>) -> Self {
        Self::SyncStep1(state_vector)
    }

    /// Create a SyncStep2 message from an encoded diff.
    pub fn sync_step2(diff: Vec<u8>) -> Self {
        Self::SyncStep2(diff)
    }

    /// Create an Update message from an encoded diff.
    pub fn update(diff: Vec<u8>) -> Self {
        Self::Update(diff)
    }

    /// Payload bytes of this message.
    pub fn payload(&self) -> &[u8] {
        match self {
            Self::SyncStep1(data)
            | Self::SyncStep2(data)
            | Self::Update(data)
            | Self::Awareness(data) => data,
        }
    }

    /// Whether this is an Update carrying [`EMPTY_UPDATE`].
    pub fn is_empty_update(&self) -> bool {
        matches!(self, Self::Update(data) if data.as_slice() == EMPTY_UPDATE)
    }

    /// Short name used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SyncStep1(_) => "SyncStep1",
            Self::SyncStep2(_) => "SyncStep2",
            Self::Update(_) => "Update",
            Self::Awareness(_) => "Awareness",
        }
    }

    /// Serialize to the binary wire format.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.payload().len() + 4);
        match self {
            Self::SyncStep1(data) => Self::encode_sync(&mut buf, sync_type::SYNC_STEP1, data),
            Self::SyncStep2(data) => Self::encode_sync(&mut buf, sync_type::SYNC_STEP2, data),
            Self::Update(data) => Self::encode_sync(&mut buf, sync_type::UPDATE, data),
            Self::Awareness(data) => {
                buf.write_u8(message_class::AWARENESS);
                buf.write_all(data);
            }
        }
        buf
    }

    fn encode_sync(buf: &mut Vec<u8>, subtype: u8, data: &[u8]) {
        buf.write_u8(message_class::SYNC);
        buf.write_u8(subtype);
        buf.write_buf(data);
    }

    /// Deserialize from the binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut cursor = Cursor::new(bytes);
        let class = cursor.read_u8().map_err(|_| DecodeError::Empty)?;

        match class {
            message_class::SYNC => {
                let subtype = cursor
                    .read_u8()
                    .map_err(|e| DecodeError::Malformed(format!("missing sync subtype: {e}")))?;
                if subtype > sync_type::UPDATE {
                    return Err(DecodeError::UnknownSyncType(subtype));
                }
                let data = cursor
                    .read_buf()
                    .map_err(|e| DecodeError::Malformed(format!("bad sync payload: {e}")))?
                    .to_vec();
                Ok(match subtype {
                    sync_type::SYNC_STEP1 => Self::SyncStep1(data),
                    sync_type::SYNC_STEP2 => Self::SyncStep2(data),
                    _ => Self::Update(data),
                })
            }
            message_class::AWARENESS => Ok(Self::Awareness(bytes[1..].to_vec())),
            other => Err(DecodeError::UnknownClass(other)),
        }
    }
}

/// Errors produced while decoding a wire message.
///
/// All of them are non-fatal: the message is dropped and the connection
/// stays open.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("empty message")]
    Empty,
    #[error("unknown message class {0}")]
    UnknownClass(u8),
    #[error("unknown sync message type {0}")]
    UnknownSyncType(u8),
    #[error("malformed message: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_sync_step1_bytes() {
        let decoded = Message::decode(&[0, 0, 3, 1, 2, 3]).unwrap();
        assert_eq!(decoded, Message::SyncStep1(vec![1, 2, 3]));
    }

    #[test]
    fn test_decode_update_bytes() {
        let decoded = Message::decode(&[0, 2, 2, 0, 0]).unwrap();
        assert_eq!(decoded, Message::Update(EMPTY_UPDATE.to_vec()));
        assert!(decoded.is_empty_update());
    }

    #[test]
    fn test_encode_framing() {
        assert_eq!(Message::sync_step1(vec![9]).encode(), vec![0, 0, 1, 9]);
        assert_eq!(Message::sync_step2(vec![7, 8]).encode(), vec![0, 1, 2, 7, 8]);
        assert_eq!(Message::update(vec![0, 0]).encode(), vec![0, 2, 2, 0, 0]);
        assert_eq!(Message::Awareness(vec![4, 5]).encode(), vec![1, 4, 5]);
    }

    #[test]
    fn test_roundtrip_is_stable() {
        let raw = [
            vec![0, 0, 2, 1, 0],
            vec![0, 1, 4, 1, 2, 3, 4],
            vec![0, 2, 0],
            vec![1, 3, 9, 9, 9],
        ];
        for bytes in raw {
            let first = Message::decode(&bytes).unwrap();
            let second = Message::decode(&first.encode()).unwrap();
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_multibyte_length_prefix() {
        let payload = vec![42u8; 300];
        let encoded = Message::update(payload.clone()).encode();

        // 300 needs two var-uint bytes: 0xAC 0x02
        assert_eq!(&encoded[..4], &[0, 2, 0xAC, 0x02]);
        assert_eq!(encoded.len(), 304);
        assert_eq!(Message::decode(&encoded).unwrap(), Message::Update(payload));
    }

    #[test]
    fn test_large_payload() {
        let payload = vec![7u8; 65536];
        let decoded = Message::decode(&Message::sync_step2(payload.clone()).encode()).unwrap();
        assert_eq!(decoded.payload().len(), 65536);
        assert_eq!(decoded, Message::SyncStep2(payload));
    }

    #[test]
    fn test_unknown_class() {
        assert_eq!(Message::decode(&[7, 0, 0]), Err(DecodeError::UnknownClass(7)));
    }

    #[test]
    fn test_unknown_sync_type() {
        assert_eq!(Message::decode(&[0, 3, 0]), Err(DecodeError::UnknownSyncType(3)));
    }

    #[test]
    fn test_empty_and_truncated() {
        assert_eq!(Message::decode(&[]), Err(DecodeError::Empty));
        assert!(matches!(Message::decode(&[0]), Err(DecodeError::Malformed(_))));
        // Declares 5 payload bytes, carries 2
        assert!(matches!(
            Message::decode(&[0, 2, 5, 1, 2]),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_awareness_passthrough() {
        let decoded = Message::decode(&[1, 2, 10, 11]).unwrap();
        assert_eq!(decoded, Message::Awareness(vec![2, 10, 11]));
        assert_eq!(decoded.encode(), vec![1, 2, 10, 11]);
    }

    #[test]
    fn test_tag_values() {
        assert_eq!(message_class::SYNC, 0);
        assert_eq!(message_class::AWARENESS, 1);
        assert_eq!(sync_type::SYNC_STEP1, 0);
        assert_eq!(sync_type::SYNC_STEP2, 1);
        assert_eq!(sync_type::UPDATE, 2);
    }

    #[test]
    fn test_message_kind() {
        assert_eq!(Message::sync_step1(vec![]).kind(), "SyncStep1");
        assert_eq!(Message::update(vec![]).kind(), "Update");
        assert!(!Message::update(vec![1, 0]).is_empty_update());
        assert!(!Message::sync_step2(EMPTY_UPDATE.to_vec()).is_empty_update());
    }
}
