//! WAL record types and serialization.

use crate::error::{CoreError, CoreResult};
use crate::types::WalPosition;
use foliodb_codec::Document;
use serde::{Deserialize, Serialize};

/// Magic bytes identifying a WAL record.
pub const WAL_MAGIC: [u8; 4] = *b"FWAL";

/// Current WAL format version.
pub const WAL_VERSION: u16 = 1;

/// Envelope header size: magic (4) + version (2) + length (4) = 10 bytes.
pub const HEADER_SIZE: usize = 10;

/// CRC size.
pub const CRC_SIZE: usize = 4;

/// A mutation intent recorded in the WAL.
///
/// The payload is self-describing JSON tagged with the operation kind,
/// so replay recovers exact entries without out-of-band knowledge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tag")]
pub enum Operation {
    /// Create a document.
    #[serde(rename = "CreateOp")]
    Create {
        /// Target collection name.
        collection: String,
        /// Document id, unique within the collection.
        id: String,
        /// The full document.
        data: Document,
    },

    /// Update a document.
    #[serde(rename = "UpdateOp")]
    Update {
        /// Target collection name.
        collection: String,
        /// Document id.
        id: String,
        /// The full replacement document.
        data: Document,
    },

    /// Delete a document.
    #[serde(rename = "DeleteOp")]
    Delete {
        /// Target collection name.
        collection: String,
        /// Document id.
        id: String,
    },
}

impl Operation {
    /// Returns the target collection name.
    #[must_use]
    pub fn collection(&self) -> &str {
        match self {
            Self::Create { collection, .. }
            | Self::Update { collection, .. }
            | Self::Delete { collection, .. } => collection,
        }
    }

    /// Returns the target document id.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Create { id, .. } | Self::Update { id, .. } | Self::Delete { id, .. } => id,
        }
    }

    /// Returns the operation kind tag used on the wire.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Create { .. } => "CreateOp",
            Self::Update { .. } => "UpdateOp",
            Self::Delete { .. } => "DeleteOp",
        }
    }
}

/// An operation together with its durability coordinates.
///
/// Immutable once appended; `(segment, position)` totally orders and
/// uniquely identifies the entry.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedOperation {
    /// The recorded operation.
    pub operation: Operation,
    /// Where the entry landed in the WAL.
    pub position: WalPosition,
}

/// Encodes an operation into a framed WAL record.
///
/// Layout: `magic (4) | version (2) | length (4) | payload | crc32 (4)`,
/// with the CRC computed over everything before it.
pub fn encode_record(operation: &Operation) -> CoreResult<Vec<u8>> {
    let payload = serde_json::to_vec(operation)
        .map_err(|e| CoreError::wal_io(format!("failed serializing operation: {e}")))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| CoreError::invalid_operation("WAL record payload too large"))?;

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
    buf.extend_from_slice(&WAL_MAGIC);
    buf.extend_from_slice(&WAL_VERSION.to_le_bytes());
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(&payload);

    let crc = compute_crc32(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());

    Ok(buf)
}

/// Computes CRC32 checksum for data (IEEE polynomial).
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}
