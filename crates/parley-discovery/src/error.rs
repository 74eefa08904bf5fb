//! Overlay directory errors.

use crate::dht::{MessageError, NodeId};
use parley_transport::{FrameError, TransportError};
use std::net::SocketAddr;
use thiserror::Error;

/// Overlay directory errors
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// None of the seed peers answered
    #[error("bootstrap failed: {0}")]
    Bootstrap(String),

    /// Key absent or expired everywhere we looked
    #[error("record not found")]
    NotFound,

    /// Peer could not be located within the lookup bounds
    #[error("peer {0} unreachable")]
    PeerUnreachable(NodeId),

    /// An RPC did not complete in time
    #[error("RPC to {0} timed out")]
    Timeout(SocketAddr),

    /// Remote answered with something other than the expected reply
    #[error("RPC to {addr} failed: {reason}")]
    Rpc {
        /// Remote address
        addr: SocketAddr,
        /// Failure description
        reason: String,
    },

    /// Value exceeds the DHT value limit
    #[error("value of {0} bytes is too large to publish")]
    ValueTooLarge(usize),

    /// Directory has been shut down
    #[error("directory is shut down")]
    Shutdown,

    /// Transport failure
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Framing failure
    #[error("framing error: {0}")]
    Frame(#[from] FrameError),

    /// Message encoding failure
    #[error("message error: {0}")]
    Message(#[from] MessageError),
}

impl DirectoryError {
    /// Returns true if the caller may retry, possibly after backoff.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Bootstrap(_)
            | Self::NotFound
            | Self::PeerUnreachable(_)
            | Self::Timeout(_)
            | Self::Rpc { .. }
            | Self::Frame(_) => true,
            Self::Transport(e) => e.is_transient(),
            Self::ValueTooLarge(_) | Self::Shutdown | Self::Message(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(DirectoryError::NotFound.is_transient());
        assert!(DirectoryError::Bootstrap("no seeds".into()).is_transient());
        assert!(DirectoryError::PeerUnreachable(NodeId::random()).is_transient());
        assert!(!DirectoryError::Shutdown.is_transient());
        assert!(!DirectoryError::ValueTooLarge(1 << 20).is_transient());
        assert!(!DirectoryError::Transport(TransportError::Closed).is_transient());
    }
}
