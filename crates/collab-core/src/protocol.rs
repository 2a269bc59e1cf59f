//! Binary sync protocol exchanged with editor sessions.
//!
//! All frames are bincode-encoded [`SyncMessage`]s sent as binary WebSocket
//! frames. A session opens with a `SyncRequest` carrying its encoded version
//! vector (empty for a fresh session); the server answers with a
//! `SyncResponse` holding a snapshot or minimal diff. Incremental edits flow
//! as `Update` frames in both directions.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum frame size (10MB) to prevent memory exhaustion from misbehaving
/// sessions. Form documents are far smaller in practice.
pub const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Frame exceeds maximum size ({size} > {MAX_FRAME_SIZE})")]
    TooLarge { size: usize },

    #[error("Malformed frame: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Messages exchanged between a session and the document owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SyncMessage {
    /// Request state - carries the sender's encoded version vector
    /// (empty = sender knows nothing).
    SyncRequest { version: Vec<u8> },

    /// Snapshot or diff bytes answering a `SyncRequest`.
    SyncResponse { update: Vec<u8> },

    /// Incremental CRDT update push.
    Update { update: Vec<u8> },
}

impl SyncMessage {
    /// Serialize to bytes for a binary frame.
    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).expect("SyncMessage serialization should not fail")
    }

    /// Parse a binary frame.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::TooLarge { size: data.len() });
        }
        bincode::deserialize(data).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}
