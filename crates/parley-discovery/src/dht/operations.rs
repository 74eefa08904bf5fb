//! DHT Operations
//!
//! This module implements the responder side of the Kademlia RPCs and the
//! bookkeeping for the initiator side:
//! - Request handlers for PING, FIND_NODE, STORE and FIND_VALUE
//! - [`Lookup`], the shortlist state for iterative lookups with alpha
//!   parallelism
//!
//! Network I/O lives in the overlay directory; everything here is
//! synchronous and operates on a [`DhtNode`] the caller has locked.

use super::messages::*;
use super::node::DhtNode;
use super::node_id::NodeId;
use super::routing::{CompactPeer, DhtPeer, K, MAX_PEER_ADDRS};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

/// Alpha: parallelism factor for iterative lookups
///
/// Kademlia performs up to α concurrent queries during node lookup.
/// Standard value is 3.
pub const ALPHA: usize = 3;

/// Maximum rounds of an iterative lookup.
pub const MAX_ITERATIONS: usize = 20;

/// Default timeout for one RPC round trip.
pub const RPC_TIMEOUT: Duration = Duration::from_secs(3);

/// Replace unspecified advertised IPs with the IP we saw the request from.
///
/// A node bound to `0.0.0.0:4001` advertises that literally; peers can only
/// reach it on the address its packets arrive from. At most
/// [`MAX_PEER_ADDRS`] distinct addresses are kept.
#[must_use]
pub fn normalize_addrs(addrs: &[SocketAddr], observed: SocketAddr) -> Vec<SocketAddr> {
    let mut out: Vec<SocketAddr> = Vec::with_capacity(addrs.len().min(MAX_PEER_ADDRS));
    for addr in addrs {
        if out.len() == MAX_PEER_ADDRS {
            break;
        }
        let fixed = if addr.ip().is_unspecified() {
            SocketAddr::new(observed.ip(), addr.port())
        } else {
            *addr
        };
        if !out.contains(&fixed) {
            out.push(fixed);
        }
    }
    out
}

impl DhtNode {
    fn closest_compact(&self, target: &NodeId) -> Vec<CompactPeer> {
        self.routing_table()
            .closest_peers(target, K)
            .iter()
            .map(DhtPeer::compact)
            .collect()
    }

    /// Handle incoming FIND_NODE request
    ///
    /// Returns the K closest peers to the target from the local routing table.
    #[must_use]
    pub fn handle_find_node(&self, request: &FindNodeRequest) -> FoundNodesResponse {
        FoundNodesResponse {
            sender_id: *self.id(),
            peers: self.closest_compact(&request.target_id),
        }
    }

    /// Handle incoming STORE request
    ///
    /// Oversized values are refused; otherwise the value is stored if there
    /// is capacity.
    #[must_use]
    pub fn handle_store(&mut self, request: StoreRequest) -> StoreAckResponse {
        let stored = request.value.len() <= MAX_VALUE_SIZE
            && self.store(request.key, request.value, Duration::from_secs(request.ttl));

        StoreAckResponse {
            sender_id: *self.id(),
            stored,
        }
    }

    /// Handle incoming FIND_VALUE request
    ///
    /// Returns the value if stored locally, otherwise returns closest peers.
    #[must_use]
    pub fn handle_find_value(&self, request: &FindValueRequest) -> FoundValueResponse {
        if let Some(value) = self.get(&request.key) {
            return FoundValueResponse::Value {
                sender_id: *self.id(),
                value,
            };
        }

        FoundValueResponse::Peers {
            sender_id: *self.id(),
            peers: self.closest_compact(&request.key),
        }
    }

    /// Handle incoming PING request
    #[must_use]
    pub fn handle_ping(&self, request: &PingRequest) -> PongResponse {
        PongResponse {
            sender_id: *self.id(),
            sender_addrs: self.addrs().to_vec(),
            nonce: request.nonce,
        }
    }

    fn observe_sender(&mut self, id: NodeId, addrs: &[SocketAddr], from: SocketAddr) {
        let addrs = normalize_addrs(addrs, from);
        if addrs.is_empty() {
            return;
        }
        if let Err(e) = self.routing_table_mut().insert(DhtPeer::new(id, addrs)) {
            tracing::trace!(peer = %id, error = %e, "Sender not added to routing table");
        }
    }

    /// Handle an incoming DHT message
    ///
    /// Records the sender in the routing table and routes the request to its
    /// handler. Response variants produce no reply.
    #[must_use]
    pub fn handle_message(&mut self, message: DhtMessage, from: SocketAddr) -> Option<DhtMessage> {
        match message {
            DhtMessage::Ping(ping) => {
                self.observe_sender(ping.sender_id, &ping.sender_addrs, from);
                Some(DhtMessage::Pong(self.handle_ping(&ping)))
            }

            DhtMessage::FindNode(find) => {
                self.observe_sender(find.sender_id, &find.sender_addrs, from);
                Some(DhtMessage::FoundNodes(self.handle_find_node(&find)))
            }

            DhtMessage::Store(store) => {
                self.observe_sender(store.sender_id, &store.sender_addrs, from);
                Some(DhtMessage::StoreAck(self.handle_store(store)))
            }

            DhtMessage::FindValue(find) => {
                self.observe_sender(find.sender_id, &find.sender_addrs, from);
                Some(DhtMessage::FoundValue(self.handle_find_value(&find)))
            }

            // Response messages don't generate new responses
            DhtMessage::Pong(_)
            | DhtMessage::FoundNodes(_)
            | DhtMessage::StoreAck(_)
            | DhtMessage::FoundValue(_) => None,
        }
    }
}

/// Shortlist state for one iterative lookup.
///
/// Algorithm:
/// 1. Start with the K closest known contacts
/// 2. Query up to α closest unqueried contacts in parallel
/// 3. Merge the contacts they return into the shortlist
/// 4. Stop when a round brings nothing closer, nothing is left to query,
///    or [`MAX_ITERATIONS`] rounds have run
#[derive(Debug)]
pub struct Lookup {
    target: NodeId,
    local_id: NodeId,
    shortlist: Vec<DhtPeer>,
    seen: HashSet<NodeId>,
    queried: HashSet<NodeId>,
    responded: HashSet<NodeId>,
    rounds: usize,
    best: Option<NodeId>,
}

impl Lookup {
    /// Start a lookup for `target` seeded with `initial` contacts.
    #[must_use]
    pub fn new(local_id: NodeId, target: NodeId, initial: Vec<DhtPeer>) -> Self {
        let mut lookup = Self {
            target,
            local_id,
            shortlist: Vec::new(),
            seen: HashSet::new(),
            queried: HashSet::new(),
            responded: HashSet::new(),
            rounds: 0,
            best: None,
        };
        lookup.merge(initial.into_iter().map(|p| p.compact()).collect());
        lookup.best = lookup.closest_distance();
        lookup
    }

    /// Lookup target.
    #[must_use]
    pub fn target(&self) -> &NodeId {
        &self.target
    }

    fn closest_distance(&self) -> Option<NodeId> {
        self.shortlist.first().map(|p| p.id.distance(&self.target))
    }

    /// Next batch of up to α unqueried contacts, closest first.
    ///
    /// Returns an empty batch once the lookup has converged.
    pub fn next_batch(&mut self) -> Vec<DhtPeer> {
        if self.rounds >= MAX_ITERATIONS {
            return Vec::new();
        }

        let batch: Vec<DhtPeer> = self
            .shortlist
            .iter()
            .take(K)
            .filter(|p| !self.queried.contains(&p.id))
            .take(ALPHA)
            .cloned()
            .collect();

        for peer in &batch {
            self.queried.insert(peer.id);
        }
        if !batch.is_empty() {
            self.rounds += 1;
        }
        batch
    }

    /// Merge contacts returned by a responder.
    pub fn record_response(&mut self, from: &NodeId, peers: Vec<CompactPeer>) {
        self.responded.insert(*from);
        self.merge(peers);
    }

    /// Drop a contact that failed to answer.
    pub fn record_failure(&mut self, id: &NodeId) {
        self.shortlist.retain(|p| p.id != *id);
    }

    /// Finish a round. Returns true if it brought a closer contact.
    pub fn end_round(&mut self) -> bool {
        let now = self.closest_distance();
        let improved = match (now, self.best) {
            (Some(now), Some(best)) => now < best,
            (Some(_), None) => true,
            _ => false,
        };
        if improved {
            self.best = now;
        }
        improved
    }

    /// True once every one of the K closest contacts has been queried.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.shortlist
            .iter()
            .take(K)
            .all(|p| self.queried.contains(&p.id))
    }

    /// Rounds run so far.
    #[must_use]
    pub fn rounds(&self) -> usize {
        self.rounds
    }

    /// A shortlisted contact with exactly this id, if one was found.
    #[must_use]
    pub fn find(&self, id: &NodeId) -> Option<&DhtPeer> {
        self.shortlist.iter().find(|p| p.id == *id)
    }

    /// The K closest contacts that answered during the lookup.
    #[must_use]
    pub fn closest_responded(&self) -> Vec<DhtPeer> {
        self.shortlist
            .iter()
            .filter(|p| self.responded.contains(&p.id))
            .take(K)
            .cloned()
            .collect()
    }

    /// The K closest contacts known, answered or not.
    #[must_use]
    pub fn closest(&self) -> Vec<DhtPeer> {
        self.shortlist.iter().take(K).cloned().collect()
    }

    fn merge(&mut self, peers: Vec<CompactPeer>) {
        for peer in peers {
            if peer.id == self.local_id || peer.addrs.is_empty() || !self.seen.insert(peer.id) {
                continue;
            }
            self.shortlist.push(DhtPeer::from(peer));
        }
        let target = self.target;
        self.shortlist.sort_by_key(|p| p.id.distance(&target));
    }
}
