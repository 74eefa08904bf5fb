//! DHT wire messages.
//!
//! Each RPC is one length-prefixed frame carrying a bincode-encoded
//! [`DhtMessage`]. Requests identify the sender and the addresses it can be
//! reached on so the responder can add it to its routing table.

use super::node_id::NodeId;
use super::routing::CompactPeer;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use thiserror::Error;

/// Largest encoded DHT message accepted.
pub const MAX_MESSAGE_SIZE: usize = 256 * 1024;

/// Largest value a STORE may carry.
pub const MAX_VALUE_SIZE: usize = 64 * 1024;

/// Message encoding errors
#[derive(Debug, Error)]
pub enum MessageError {
    /// bincode failure
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Encoded message exceeds [`MAX_MESSAGE_SIZE`]
    #[error("message too large: {0} bytes")]
    TooLarge(usize),
}

/// PING request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingRequest {
    /// Sender id
    pub sender_id: NodeId,
    /// Sender's advertised addresses
    pub sender_addrs: Vec<SocketAddr>,
    /// Echoed in the PONG
    pub nonce: u64,
}

/// PONG response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PongResponse {
    /// Responder id
    pub sender_id: NodeId,
    /// Responder's advertised addresses
    pub sender_addrs: Vec<SocketAddr>,
    /// Nonce from the PING
    pub nonce: u64,
}

/// FIND_NODE request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindNodeRequest {
    /// Sender id
    pub sender_id: NodeId,
    /// Sender's advertised addresses
    pub sender_addrs: Vec<SocketAddr>,
    /// Id to find neighbours of
    pub target_id: NodeId,
}

/// FIND_NODE response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoundNodesResponse {
    /// Responder id
    pub sender_id: NodeId,
    /// Up to K contacts closest to the target
    pub peers: Vec<CompactPeer>,
}

/// STORE request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreRequest {
    /// Sender id
    pub sender_id: NodeId,
    /// Sender's advertised addresses
    pub sender_addrs: Vec<SocketAddr>,
    /// DHT key
    pub key: NodeId,
    /// Value bytes
    pub value: Vec<u8>,
    /// Lifetime in seconds
    pub ttl: u64,
}

/// STORE acknowledgment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreAckResponse {
    /// Responder id
    pub sender_id: NodeId,
    /// Whether the value was accepted
    pub stored: bool,
}

/// FIND_VALUE request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindValueRequest {
    /// Sender id
    pub sender_id: NodeId,
    /// Sender's advertised addresses
    pub sender_addrs: Vec<SocketAddr>,
    /// DHT key
    pub key: NodeId,
}

/// FIND_VALUE response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FoundValueResponse {
    /// Responder holds the value
    Value {
        /// Responder id
        sender_id: NodeId,
        /// Stored bytes
        value: Vec<u8>,
    },
    /// Responder does not hold it; try these instead
    Peers {
        /// Responder id
        sender_id: NodeId,
        /// Closest known contacts to the key
        peers: Vec<CompactPeer>,
    },
}

/// All DHT RPC messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DhtMessage {
    /// Liveness probe
    Ping(PingRequest),
    /// Liveness reply
    Pong(PongResponse),
    /// Neighbour query
    FindNode(FindNodeRequest),
    /// Neighbour reply
    FoundNodes(FoundNodesResponse),
    /// Store a value
    Store(StoreRequest),
    /// Store reply
    StoreAck(StoreAckResponse),
    /// Value query
    FindValue(FindValueRequest),
    /// Value reply
    FoundValue(FoundValueResponse),
}

impl DhtMessage {
    /// Encode with bincode.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError`] if encoding fails or the result exceeds
    /// [`MAX_MESSAGE_SIZE`].
    pub fn to_bytes(&self) -> Result<Vec<u8>, MessageError> {
        let bytes =
            bincode::serialize(self).map_err(|e| MessageError::Serialization(e.to_string()))?;
        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(MessageError::TooLarge(bytes.len()));
        }
        Ok(bytes)
    }

    /// Decode with bincode.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError`] for oversized or malformed input.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MessageError> {
        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(MessageError::TooLarge(bytes.len()));
        }
        bincode::deserialize(bytes).map_err(|e| MessageError::Serialization(e.to_string()))
    }

    /// True for request variants.
    #[must_use]
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            Self::Ping(_) | Self::FindNode(_) | Self::Store(_) | Self::FindValue(_)
        )
    }

    /// Short name for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ping(_) => "PING",
            Self::Pong(_) => "PONG",
            Self::FindNode(_) => "FIND_NODE",
            Self::FoundNodes(_) => "FOUND_NODES",
            Self::Store(_) => "STORE",
            Self::StoreAck(_) => "STORE_ACK",
            Self::FindValue(_) => "FIND_VALUE",
            Self::FoundValue(_) => "FOUND_VALUE",
        }
    }
}
