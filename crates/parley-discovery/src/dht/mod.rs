//! Kademlia DHT Implementation
//!
//! This module provides the Kademlia DHT behind the Parley overlay
//! directory. Key features include:
//!
//! - 256-bit node identifiers derived from public keys using BLAKE3
//! - XOR distance metric for efficient routing
//! - K-bucket routing table with LRU eviction (k=20)
//! - Iterative lookup with alpha parallelism (α=3)
//! - Values with bounded lifetimes
//!
//! # Example Usage
//!
//! ```rust
//! use parley_discovery::dht::{DhtNode, NodeId};
//! use std::time::Duration;
//!
//! let id = NodeId::random();
//! let addr = "127.0.0.1:8000".parse().unwrap();
//! let mut node = DhtNode::new(id, vec![addr]);
//!
//! let key = NodeId::for_record_key(b"example");
//! node.store(key, vec![1, 2, 3], Duration::from_secs(3600));
//! assert_eq!(node.get(&key), Some(vec![1, 2, 3]));
//! ```

pub mod messages;
pub mod node;
pub mod node_id;
pub mod operations;
pub mod routing;

pub use messages::{
    DhtMessage, FindNodeRequest, FindValueRequest, FoundNodesResponse, FoundValueResponse,
    MAX_MESSAGE_SIZE, MAX_VALUE_SIZE, MessageError, PingRequest, PongResponse, StoreAckResponse,
    StoreRequest,
};
pub use node::{DhtNode, MAX_STORED_VALUES, MAX_TTL, StoredValue};
pub use node_id::{NodeId, ParseNodeIdError};
pub use operations::{ALPHA, Lookup, MAX_ITERATIONS, RPC_TIMEOUT, normalize_addrs};
pub use routing::{
    CompactPeer, DhtError, DhtPeer, K, KBucket, MAX_FAILURES, MAX_PEER_ADDRS, NUM_BUCKETS,
    RoutingTable,
};
