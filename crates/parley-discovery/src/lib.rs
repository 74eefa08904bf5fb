//! # Parley Discovery
//!
//! Overlay directory for the Parley messaging node.
//!
//! This crate provides:
//! - A Kademlia DHT over the Parley stream transport
//! - Publication and lookup of small records (public keys, endpoints)
//! - Resolution of a peer identifier to its current addresses
//!
//! ## Kademlia DHT
//!
//! The DHT module implements Kademlia with:
//! - 256-bit node identifiers (BLAKE3 hash of public keys)
//! - XOR distance metric
//! - K-bucket routing (k=20)
//! - Iterative lookup with alpha parallelism
//! - bincode messages, one length-prefixed frame per RPC
//!
//! ## Example
//!
//! ```rust,no_run
//! use parley_discovery::{DirectoryConfig, OverlayDirectory, dht::NodeId};
//! use parley_transport::{TcpTransport, TcpTransportConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = TcpTransport::bind(
//!     &["0.0.0.0:4001".parse()?],
//!     TcpTransportConfig::default(),
//! )
//! .await?;
//! let directory =
//!     OverlayDirectory::start(NodeId::random(), Arc::new(transport), DirectoryConfig::default())?;
//!
//! directory.bootstrap(&["203.0.113.10:4001".parse()?]).await?;
//! directory.publish(b"greeting", b"hello".to_vec()).await?;
//! let value = directory.lookup(b"greeting").await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dht;
pub mod directory;
pub mod error;
pub mod rpc;

pub use dht::NodeId;
pub use directory::{DirectoryConfig, OverlayDirectory, RoutingHealth};
pub use error::DirectoryError;
pub use rpc::KAD_PROTOCOL;

/// Peer endpoint information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    /// Peer identifier
    pub peer_id: NodeId,
    /// Addresses the peer was last seen on, preferred first
    pub addrs: Vec<std::net::SocketAddr>,
    /// X25519 public key, once learned from the DHT or a handshake
    pub public_key: Option<[u8; 32]>,
}

impl PeerRecord {
    /// Create a record with an unknown public key.
    #[must_use]
    pub fn new(peer_id: NodeId, addrs: Vec<std::net::SocketAddr>) -> Self {
        Self {
            peer_id,
            addrs,
            public_key: None,
        }
    }

    /// Attach a public key.
    ///
    /// Keys that do not hash to `peer_id` are ignored and logged.
    #[must_use]
    pub fn with_public_key(mut self, public_key: [u8; 32]) -> Self {
        if self.peer_id.matches_public_key(&public_key) {
            self.public_key = Some(public_key);
        } else {
            tracing::warn!(
                target: "parley::security",
                peer = %self.peer_id,
                "Public key does not match peer id, ignoring"
            );
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_accepts_matching_key() {
        let key = [7u8; 32];
        let record = PeerRecord::new(NodeId::from_public_key(&key), vec![]).with_public_key(key);
        assert_eq!(record.public_key, Some(key));
    }

    #[test]
    fn test_record_rejects_foreign_key() {
        let record = PeerRecord::new(NodeId::from_public_key(&[7u8; 32]), vec![])
            .with_public_key([8u8; 32]);
        assert_eq!(record.public_key, None);
    }
}
