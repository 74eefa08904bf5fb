//! K-bucket routing table.
//!
//! 256 buckets, one per bit of XOR distance from the local id. Each bucket
//! keeps at most [`K`] contacts ordered from least to most recently seen.
//! A full bucket only admits a newcomer by evicting a contact that has
//! failed to answer; responsive old contacts are preferred.

use super::node_id::NodeId;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Replication parameter and bucket capacity.
pub const K: usize = 20;

/// Number of buckets (one per id bit).
pub const NUM_BUCKETS: usize = NodeId::BITS;

/// Consecutive RPC failures after which a contact is dropped.
pub const MAX_FAILURES: u32 = 3;

/// Routing table errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DhtError {
    /// Refused to route to ourselves
    #[error("cannot insert the local node into its own routing table")]
    SelfInsert,

    /// Bucket full of responsive contacts
    #[error("bucket {0} is full")]
    BucketFull(usize),

    /// Contact advertised no addresses
    #[error("contact has no addresses")]
    NoAddresses,
}

/// A routing table contact.
#[derive(Debug, Clone)]
pub struct DhtPeer {
    /// Contact id
    pub id: NodeId,
    /// Dialable addresses, most preferred first
    pub addrs: Vec<SocketAddr>,
    /// Last time this contact answered or contacted us
    pub last_seen: Instant,
    /// Consecutive failed RPCs
    pub failures: u32,
}

impl DhtPeer {
    /// Create a freshly seen contact.
    #[must_use]
    pub fn new(id: NodeId, mut addrs: Vec<SocketAddr>) -> Self {
        addrs.truncate(MAX_PEER_ADDRS);
        Self {
            id,
            addrs,
            last_seen: Instant::now(),
            failures: 0,
        }
    }

    /// Wire form of this contact.
    #[must_use]
    pub fn compact(&self) -> CompactPeer {
        CompactPeer {
            id: self.id,
            addrs: self.addrs.clone(),
        }
    }
}

/// Addresses kept per contact; the rest of an advertised list is ignored.
pub const MAX_PEER_ADDRS: usize = 4;

/// Contact as carried in DHT messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactPeer {
    /// Contact id
    pub id: NodeId,
    /// Dialable addresses
    pub addrs: Vec<SocketAddr>,
}

impl From<CompactPeer> for DhtPeer {
    fn from(peer: CompactPeer) -> Self {
        Self::new(peer.id, peer.addrs)
    }
}

/// One bucket of up to [`K`] contacts, least recently seen first.
#[derive(Debug, Clone, Default)]
pub struct KBucket {
    peers: Vec<DhtPeer>,
}

impl KBucket {
    /// Contacts in least-recently-seen order.
    #[must_use]
    pub fn peers(&self) -> &[DhtPeer] {
        &self.peers
    }

    /// Number of contacts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// True if the bucket holds no contacts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    fn position(&self, id: &NodeId) -> Option<usize> {
        self.peers.iter().position(|p| p.id == *id)
    }

    /// Insert or refresh a contact, moving it to the most-recent end.
    fn upsert(&mut self, peer: DhtPeer, index: usize) -> Result<(), DhtError> {
        if let Some(pos) = self.position(&peer.id) {
            let mut existing = self.peers.remove(pos);
            existing.addrs = peer.addrs;
            existing.last_seen = Instant::now();
            existing.failures = 0;
            self.peers.push(existing);
            return Ok(());
        }

        if self.peers.len() < K {
            self.peers.push(peer);
            return Ok(());
        }

        // Replace the stalest contact only if it has been failing
        match self.peers.iter().position(|p| p.failures > 0) {
            Some(pos) => {
                self.peers.remove(pos);
                self.peers.push(peer);
                Ok(())
            }
            None => Err(DhtError::BucketFull(index)),
        }
    }
}

/// Kademlia routing table owned by one node.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    local_id: NodeId,
    buckets: Vec<KBucket>,
}

impl RoutingTable {
    /// Create an empty table for `local_id`.
    #[must_use]
    pub fn new(local_id: NodeId) -> Self {
        Self {
            local_id,
            buckets: vec![KBucket::default(); NUM_BUCKETS],
        }
    }

    /// The id distances are measured from.
    #[must_use]
    pub fn local_id(&self) -> &NodeId {
        &self.local_id
    }

    /// Insert a contact or refresh an existing one.
    ///
    /// # Errors
    ///
    /// Returns [`DhtError::SelfInsert`] for the local id,
    /// [`DhtError::NoAddresses`] for a contact without addresses and
    /// [`DhtError::BucketFull`] when the bucket holds only responsive contacts.
    pub fn insert(&mut self, peer: DhtPeer) -> Result<(), DhtError> {
        let index = peer
            .id
            .bucket_index(&self.local_id)
            .ok_or(DhtError::SelfInsert)?;
        if peer.addrs.is_empty() {
            return Err(DhtError::NoAddresses);
        }
        self.buckets[index].upsert(peer, index)
    }

    /// Remove a contact.
    pub fn remove(&mut self, id: &NodeId) -> Option<DhtPeer> {
        let index = id.bucket_index(&self.local_id)?;
        let bucket = &mut self.buckets[index];
        let pos = bucket.position(id)?;
        Some(bucket.peers.remove(pos))
    }

    /// Look up a contact by id.
    #[must_use]
    pub fn get(&self, id: &NodeId) -> Option<&DhtPeer> {
        let index = id.bucket_index(&self.local_id)?;
        self.buckets[index].peers.iter().find(|p| p.id == *id)
    }

    /// Record a failed RPC. Drops the contact after [`MAX_FAILURES`].
    ///
    /// Returns true if the contact was removed.
    pub fn mark_failed(&mut self, id: &NodeId) -> bool {
        let Some(index) = id.bucket_index(&self.local_id) else {
            return false;
        };
        let bucket = &mut self.buckets[index];
        let Some(pos) = bucket.position(id) else {
            return false;
        };

        bucket.peers[pos].failures += 1;
        if bucket.peers[pos].failures >= MAX_FAILURES {
            bucket.peers.remove(pos);
            return true;
        }
        false
    }

    /// Up to `count` contacts ordered by XOR distance to `target`.
    #[must_use]
    pub fn closest_peers(&self, target: &NodeId, count: usize) -> Vec<DhtPeer> {
        let mut all: Vec<DhtPeer> = self
            .buckets
            .iter()
            .flat_map(|b| b.peers.iter().cloned())
            .collect();
        all.sort_by_key(|p| p.id.distance(target));
        all.truncate(count);
        all
    }

    /// Drop contacts not seen within `max_age` that have also failed.
    ///
    /// Returns the number removed.
    pub fn evict_stale(&mut self, max_age: Duration) -> usize {
        let mut removed = 0;
        for bucket in &mut self.buckets {
            let before = bucket.peers.len();
            bucket
                .peers
                .retain(|p| p.failures == 0 || p.last_seen.elapsed() < max_age);
            removed += before - bucket.peers.len();
        }
        removed
    }

    /// Total number of contacts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.iter().map(KBucket::len).sum()
    }

    /// True if the table has no contacts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(KBucket::is_empty)
    }

    /// Number of buckets holding at least one contact.
    #[must_use]
    pub fn non_empty_buckets(&self) -> usize {
        self.buckets.iter().filter(|b| !b.is_empty()).count()
    }

    /// All buckets, index 0 nearest.
    #[must_use]
    pub fn buckets(&self) -> &[KBucket] {
        &self.buckets
    }
}
