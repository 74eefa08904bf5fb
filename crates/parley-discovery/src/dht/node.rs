//! Local DHT node state: identity, routing table and value store.
//!
//! `DhtNode` is plain data with synchronous methods. The overlay directory
//! owns it behind a lock and performs all network I/O outside that lock.

use super::node_id::NodeId;
use super::routing::RoutingTable;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Maximum number of values held for other peers.
pub const MAX_STORED_VALUES: usize = 16_384;

/// Upper bound on a requested record lifetime.
pub const MAX_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// A value held in the local store.
#[derive(Debug, Clone)]
pub struct StoredValue {
    /// Value bytes
    pub data: Vec<u8>,
    /// When the value was (last) stored
    pub stored_at: Instant,
    /// When it stops being served
    pub expires_at: Instant,
}

impl StoredValue {
    /// True once the lifetime has elapsed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Local DHT state.
#[derive(Debug)]
pub struct DhtNode {
    id: NodeId,
    addrs: Vec<SocketAddr>,
    routing_table: RoutingTable,
    storage: HashMap<NodeId, StoredValue>,
}

impl DhtNode {
    /// Create a node with an empty routing table and store.
    #[must_use]
    pub fn new(id: NodeId, addrs: Vec<SocketAddr>) -> Self {
        Self {
            id,
            addrs,
            routing_table: RoutingTable::new(id),
            storage: HashMap::new(),
        }
    }

    /// Local id.
    #[must_use]
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// Addresses advertised to other nodes.
    #[must_use]
    pub fn addrs(&self) -> &[SocketAddr] {
        &self.addrs
    }

    /// Routing table (read-only).
    #[must_use]
    pub fn routing_table(&self) -> &RoutingTable {
        &self.routing_table
    }

    /// Routing table (mutable).
    pub fn routing_table_mut(&mut self) -> &mut RoutingTable {
        &mut self.routing_table
    }

    /// Store or refresh a value.
    ///
    /// Returns false if the store is full and `key` is not already present.
    pub fn store(&mut self, key: NodeId, data: Vec<u8>, ttl: Duration) -> bool {
        if !self.storage.contains_key(&key) && self.storage.len() >= MAX_STORED_VALUES {
            self.purge_expired();
            if self.storage.len() >= MAX_STORED_VALUES {
                return false;
            }
        }

        let now = Instant::now();
        self.storage.insert(
            key,
            StoredValue {
                data,
                stored_at: now,
                expires_at: now + ttl.min(MAX_TTL),
            },
        );
        true
    }

    /// Fetch an unexpired value.
    #[must_use]
    pub fn get(&self, key: &NodeId) -> Option<Vec<u8>> {
        self.storage
            .get(key)
            .filter(|v| !v.is_expired())
            .map(|v| v.data.clone())
    }

    /// Drop expired values. Returns how many were removed.
    pub fn purge_expired(&mut self) -> usize {
        let before = self.storage.len();
        self.storage.retain(|_, v| !v.is_expired());
        before - self.storage.len()
    }

    /// Number of values held (including not-yet-purged expired ones).
    #[must_use]
    pub fn stored_count(&self) -> usize {
        self.storage.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> DhtNode {
        DhtNode::new(NodeId::random(), vec!["127.0.0.1:8000".parse().unwrap()])
    }

    #[test]
    fn test_store_and_get() {
        let mut node = node();
        let key = NodeId::for_record_key(b"alpha");

        assert!(node.store(key, vec![1, 2, 3], Duration::from_secs(60)));
        assert_eq!(node.get(&key), Some(vec![1, 2, 3]));
        assert_eq!(node.get(&NodeId::for_record_key(b"beta")), None);
    }

    #[test]
    fn test_expired_value_hidden_and_purged() {
        let mut node = node();
        let key = NodeId::random();

        node.store(key, vec![9], Duration::ZERO);
        assert_eq!(node.get(&key), None);
        assert_eq!(node.stored_count(), 1);

        assert_eq!(node.purge_expired(), 1);
        assert_eq!(node.stored_count(), 0);
    }

    #[test]
    fn test_store_overwrites() {
        let mut node = node();
        let key = NodeId::random();

        node.store(key, vec![1], Duration::from_secs(60));
        node.store(key, vec![2], Duration::from_secs(60));
        assert_eq!(node.get(&key), Some(vec![2]));
        assert_eq!(node.stored_count(), 1);
    }

    #[test]
    fn test_ttl_capped() {
        let mut node = node();
        let key = NodeId::random();
        node.store(key, vec![1], Duration::from_secs(u64::MAX / 4));

        let stored = &node.storage[&key];
        assert!(stored.expires_at - stored.stored_at <= MAX_TTL);
    }
}
