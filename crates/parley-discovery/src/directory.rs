//! Overlay Directory
//!
//! Wraps the Kademlia DHT behind the operations the messaging core needs:
//! join through seed peers, publish and look up records, and resolve a
//! peer's current addresses. A background task keeps the routing table and
//! record store healthy and reports their state.
//!
//! The routing table is owned here and only mutated through these
//! operations or the RPC server.

use crate::PeerRecord;
use crate::dht::{
    DhtMessage, DhtNode, DhtPeer, FindNodeRequest, FindValueRequest, FoundValueResponse, Lookup,
    MAX_VALUE_SIZE, NodeId, PingRequest, StoreRequest, normalize_addrs,
};
use crate::error::DirectoryError;
use crate::rpc::{KAD_PROTOCOL, RpcClient, serve};
use parley_transport::Transport;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout_at};

/// Overlay directory configuration
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    /// Addresses advertised to other nodes (defaults to the transport's)
    pub advertise_addrs: Vec<SocketAddr>,
    /// Timeout for one RPC round trip
    pub rpc_timeout: Duration,
    /// Overall bound on one iterative lookup
    pub lookup_timeout: Duration,
    /// Lifetime requested for published records
    pub record_ttl: Duration,
    /// How often the node republishes its own records
    pub republish_interval: Duration,
    /// How often routing health is reported and expired state purged
    pub health_interval: Duration,
    /// How often buckets are refreshed with a self-lookup
    pub refresh_interval: Duration,
    /// Age after which failing contacts are evicted
    pub stale_contact_age: Duration,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            advertise_addrs: Vec::new(),
            rpc_timeout: Duration::from_secs(3),
            lookup_timeout: Duration::from_secs(10),
            record_ttl: Duration::from_secs(60 * 60),
            republish_interval: Duration::from_secs(10 * 60),
            health_interval: Duration::from_secs(30),
            refresh_interval: Duration::from_secs(5 * 60),
            stale_contact_age: Duration::from_secs(15 * 60),
        }
    }
}

/// Snapshot of routing table and store state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoutingHealth {
    /// Contacts in the routing table
    pub peer_count: usize,
    /// Buckets holding at least one contact
    pub non_empty_buckets: usize,
    /// Values held for the overlay
    pub stored_values: usize,
    /// Records this node publishes and republishes
    pub published_records: usize,
    /// Iterative lookups started since startup
    pub lookups: u64,
}

enum LookupGoal {
    Node,
    Value,
}

enum LookupOutcome {
    Value(Vec<u8>),
    Nodes(Lookup),
}

struct DirectoryInner {
    config: DirectoryConfig,
    local_id: NodeId,
    advertise: Vec<SocketAddr>,
    node: Arc<RwLock<DhtNode>>,
    rpc: RpcClient,
    published: RwLock<HashMap<NodeId, Vec<u8>>>,
    health_tx: watch::Sender<RoutingHealth>,
    shutdown: watch::Sender<bool>,
    stopped: AtomicBool,
    lookups: AtomicU64,
}

/// DHT-backed peer and record directory.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct OverlayDirectory {
    inner: Arc<DirectoryInner>,
}

impl OverlayDirectory {
    /// Start the directory: register the RPC handler and spawn the
    /// maintenance task.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::Transport`] if the DHT protocol handler
    /// cannot be registered.
    pub fn start(
        local_id: NodeId,
        transport: Arc<dyn Transport>,
        config: DirectoryConfig,
    ) -> Result<Self, DirectoryError> {
        let advertise = if config.advertise_addrs.is_empty() {
            transport.local_addrs()
        } else {
            config.advertise_addrs.clone()
        };

        let inbound = transport.listen(KAD_PROTOCOL)?;
        let node = Arc::new(RwLock::new(DhtNode::new(local_id, advertise.clone())));
        let (shutdown, _) = watch::channel(false);
        let (health_tx, _) = watch::channel(RoutingHealth::default());

        let inner = Arc::new(DirectoryInner {
            rpc: RpcClient::new(transport, config.rpc_timeout),
            config,
            local_id,
            advertise,
            node: Arc::clone(&node),
            published: RwLock::new(HashMap::new()),
            health_tx,
            shutdown,
            stopped: AtomicBool::new(false),
            lookups: AtomicU64::new(0),
        });

        tokio::spawn(serve(node, inbound, inner.shutdown.subscribe()));
        tokio::spawn(maintenance_loop(
            Arc::downgrade(&inner),
            inner.shutdown.subscribe(),
        ));

        tracing::info!(
            node_id = %local_id,
            addrs = ?inner.advertise,
            "Overlay directory started"
        );

        Ok(Self { inner })
    }

    /// Local node id.
    #[must_use]
    pub fn local_id(&self) -> NodeId {
        self.inner.local_id
    }

    /// Addresses advertised to the overlay.
    #[must_use]
    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.inner.advertise
    }

    fn ensure_running(&self) -> Result<(), DirectoryError> {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return Err(DirectoryError::Shutdown);
        }
        Ok(())
    }

    /// Join the overlay through `seeds`.
    ///
    /// Pings every seed, adds those that answer to the routing table and
    /// then looks up the local id to fill nearby buckets. An empty seed list
    /// succeeds: this node starts a new overlay.
    ///
    /// Returns the routing table size afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::Bootstrap`] if no seed answered.
    pub async fn bootstrap(&self, seeds: &[SocketAddr]) -> Result<usize, DirectoryError> {
        self.ensure_running()?;

        if seeds.is_empty() {
            tracing::info!("No bootstrap seeds configured, starting a new overlay");
            return Ok(0);
        }

        let mut pings = JoinSet::new();
        for seed in seeds.iter().copied() {
            let rpc = self.inner.rpc.clone();
            let request = DhtMessage::Ping(PingRequest {
                sender_id: self.inner.local_id,
                sender_addrs: self.inner.advertise.clone(),
                nonce: rand::random(),
            });
            pings.spawn(async move { (seed, rpc.request(seed, &request).await) });
        }

        let mut reached = 0usize;
        while let Some(joined) = pings.join_next().await {
            let Ok((seed, result)) = joined else { continue };
            match result {
                Ok(DhtMessage::Pong(pong)) if pong.sender_id != self.inner.local_id => {
                    let mut addrs = vec![seed];
                    for addr in normalize_addrs(&pong.sender_addrs, seed) {
                        if !addrs.contains(&addr) {
                            addrs.push(addr);
                        }
                    }
                    let mut node = self.inner.node.write().await;
                    if node
                        .routing_table_mut()
                        .insert(DhtPeer::new(pong.sender_id, addrs))
                        .is_ok()
                    {
                        reached += 1;
                    }
                }
                Ok(DhtMessage::Pong(_)) => {
                    tracing::debug!(%seed, "Bootstrap seed is this node, skipping");
                }
                Ok(other) => {
                    tracing::debug!(%seed, kind = other.kind(), "Unexpected bootstrap reply");
                }
                Err(e) => {
                    tracing::warn!(%seed, error = %e, "Bootstrap seed unreachable");
                }
            }
        }

        if reached == 0 {
            return Err(DirectoryError::Bootstrap(format!(
                "none of {} seed(s) reachable",
                seeds.len()
            )));
        }

        self.iterative_lookup(self.inner.local_id, LookupGoal::Node)
            .await;

        let peers = self.peer_count().await;
        tracing::info!(seeds_reached = reached, peers, "Bootstrap complete");
        Ok(peers)
    }

    /// Publish `value` under `key`.
    ///
    /// The value is stored locally, on the K closest reachable nodes, and
    /// republished periodically until shutdown. Returns the number of remote
    /// nodes that accepted it.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::ValueTooLarge`] if the value exceeds the DHT
    /// value limit.
    pub async fn publish(&self, key: &[u8], value: Vec<u8>) -> Result<usize, DirectoryError> {
        self.ensure_running()?;
        if value.len() > MAX_VALUE_SIZE {
            return Err(DirectoryError::ValueTooLarge(value.len()));
        }

        let key_id = NodeId::for_record_key(key);
        self.inner
            .published
            .write()
            .await
            .insert(key_id, value.clone());

        let replicas = self.replicate(key_id, value).await;
        tracing::debug!(key = %key_id, replicas, "Published record");
        Ok(replicas)
    }

    async fn replicate(&self, key_id: NodeId, value: Vec<u8>) -> usize {
        self.inner.node.write().await.store(
            key_id,
            value.clone(),
            self.inner.config.record_ttl,
        );

        let LookupOutcome::Nodes(lookup) = self.iterative_lookup(key_id, LookupGoal::Node).await
        else {
            return 0;
        };

        let request = DhtMessage::Store(StoreRequest {
            sender_id: self.inner.local_id,
            sender_addrs: self.inner.advertise.clone(),
            key: key_id,
            value,
            ttl: self.inner.config.record_ttl.as_secs(),
        });

        let mut stores = JoinSet::new();
        for peer in lookup.closest_responded() {
            let rpc = self.inner.rpc.clone();
            let request = request.clone();
            stores.spawn(async move { rpc.request_peer(&peer, &request).await });
        }

        let mut replicas = 0;
        while let Some(joined) = stores.join_next().await {
            if let Ok(Ok(DhtMessage::StoreAck(ack))) = joined {
                if ack.stored {
                    replicas += 1;
                }
            }
        }
        replicas
    }

    /// Fetch the value published under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::NotFound`] if no reachable node holds an
    /// unexpired value.
    pub async fn lookup(&self, key: &[u8]) -> Result<Vec<u8>, DirectoryError> {
        self.ensure_running()?;
        let key_id = NodeId::for_record_key(key);

        if let Some(value) = self.inner.node.read().await.get(&key_id) {
            return Ok(value);
        }

        match self.iterative_lookup(key_id, LookupGoal::Value).await {
            LookupOutcome::Value(value) => Ok(value),
            LookupOutcome::Nodes(_) => Err(DirectoryError::NotFound),
        }
    }

    /// Resolve the current addresses of `peer_id`.
    ///
    /// Runs an iterative lookup towards the peer; the peer must either answer
    /// during the lookup or be reported by a node that did.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::PeerUnreachable`] if the peer was not found
    /// within the lookup bounds.
    pub async fn find_peer(&self, peer_id: &NodeId) -> Result<PeerRecord, DirectoryError> {
        self.ensure_running()?;

        if *peer_id == self.inner.local_id {
            return Ok(PeerRecord::new(*peer_id, self.inner.advertise.clone()));
        }

        let LookupOutcome::Nodes(lookup) = self.iterative_lookup(*peer_id, LookupGoal::Node).await
        else {
            return Err(DirectoryError::PeerUnreachable(*peer_id));
        };

        match lookup.find(peer_id) {
            Some(peer) => {
                tracing::debug!(peer = %peer_id, addrs = ?peer.addrs, "Resolved peer");
                Ok(PeerRecord::new(peer.id, peer.addrs.clone()))
            }
            None => Err(DirectoryError::PeerUnreachable(*peer_id)),
        }
    }

    /// Number of routing table contacts.
    pub async fn peer_count(&self) -> usize {
        self.inner.node.read().await.routing_table().len()
    }

    /// Current routing and store health.
    pub async fn routing_health(&self) -> RoutingHealth {
        self.inner.health().await
    }

    /// Subscribe to the health snapshots published by the maintenance task.
    #[must_use]
    pub fn subscribe_health(&self) -> watch::Receiver<RoutingHealth> {
        self.inner.health_tx.subscribe()
    }

    /// Stop the maintenance task and RPC server.
    pub fn shutdown(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.inner.shutdown.send(true);
        tracing::info!(node_id = %self.inner.local_id, "Overlay directory stopped");
    }

    /// True once [`OverlayDirectory::shutdown`] has been called.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    async fn iterative_lookup(&self, target: NodeId, goal: LookupGoal) -> LookupOutcome {
        self.inner.iterative_lookup(target, goal).await
    }
}

impl DirectoryInner {
    async fn health(&self) -> RoutingHealth {
        let published_records = self.published.read().await.len();
        let node = self.node.read().await;
        RoutingHealth {
            peer_count: node.routing_table().len(),
            non_empty_buckets: node.routing_table().non_empty_buckets(),
            stored_values: node.stored_count(),
            published_records,
            lookups: self.lookups.load(Ordering::Relaxed),
        }
    }

    fn request_for(&self, target: NodeId, goal: &LookupGoal) -> DhtMessage {
        match goal {
            LookupGoal::Node => DhtMessage::FindNode(FindNodeRequest {
                sender_id: self.local_id,
                sender_addrs: self.advertise.clone(),
                target_id: target,
            }),
            LookupGoal::Value => DhtMessage::FindValue(FindValueRequest {
                sender_id: self.local_id,
                sender_addrs: self.advertise.clone(),
                key: target,
            }),
        }
    }

    async fn iterative_lookup(&self, target: NodeId, goal: LookupGoal) -> LookupOutcome {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + self.config.lookup_timeout;

        let initial = self
            .node
            .read()
            .await
            .routing_table()
            .closest_peers(&target, crate::dht::K);
        let mut lookup = Lookup::new(self.local_id, target, initial);
        let request = self.request_for(target, &goal);

        loop {
            if Instant::now() >= deadline {
                tracing::debug!(%target, rounds = lookup.rounds(), "Lookup deadline reached");
                break;
            }

            let batch = lookup.next_batch();
            if batch.is_empty() {
                break;
            }

            let mut queries = JoinSet::new();
            for peer in batch {
                let rpc = self.rpc.clone();
                let request = request.clone();
                queries.spawn(async move {
                    let result = rpc.request_peer(&peer, &request).await;
                    (peer, result)
                });
            }

            let mut found_value = None;
            let mut expired = false;
            loop {
                let joined = match timeout_at(deadline, queries.join_next()).await {
                    Ok(Some(joined)) => joined,
                    Ok(None) => break,
                    Err(_) => {
                        expired = true;
                        break;
                    }
                };
                let Ok((peer, result)) = joined else { continue };
                match result {
                    Ok(DhtMessage::FoundNodes(found)) => {
                        self.observe_live(&peer).await;
                        lookup.record_response(&peer.id, found.peers);
                    }
                    Ok(DhtMessage::FoundValue(FoundValueResponse::Peers { peers, .. })) => {
                        self.observe_live(&peer).await;
                        lookup.record_response(&peer.id, peers);
                    }
                    Ok(DhtMessage::FoundValue(FoundValueResponse::Value { value, .. })) => {
                        self.observe_live(&peer).await;
                        found_value = Some(value);
                    }
                    Ok(other) => {
                        tracing::debug!(peer = %peer.id, kind = other.kind(), "Unexpected lookup reply");
                        lookup.record_failure(&peer.id);
                    }
                    Err(e) => {
                        tracing::trace!(peer = %peer.id, error = %e, "Lookup query failed");
                        lookup.record_failure(&peer.id);
                        self.node.write().await.routing_table_mut().mark_failed(&peer.id);
                    }
                }
            }

            if let Some(value) = found_value {
                return LookupOutcome::Value(value);
            }
            if expired {
                queries.abort_all();
                tracing::debug!(%target, rounds = lookup.rounds(), "Lookup deadline reached mid-round");
                break;
            }

            let improved = lookup.end_round();
            if matches!(goal, LookupGoal::Node) && lookup.find(&target).is_some() {
                break;
            }
            if !improved && lookup.is_exhausted() {
                break;
            }
        }

        LookupOutcome::Nodes(lookup)
    }

    async fn observe_live(&self, peer: &DhtPeer) {
        let _ = self
            .node
            .write()
            .await
            .routing_table_mut()
            .insert(DhtPeer::new(peer.id, peer.addrs.clone()));
    }

    async fn maintain(&self) {
        let (expired, evicted) = {
            let mut node = self.node.write().await;
            let expired = node.purge_expired();
            let evicted = node
                .routing_table_mut()
                .evict_stale(self.config.stale_contact_age);
            (expired, evicted)
        };

        let health = self.health().await;
        let _ = self.health_tx.send(health);

        tracing::info!(
            node_id = %self.local_id,
            peers = health.peer_count,
            buckets = health.non_empty_buckets,
            stored = health.stored_values,
            published = health.published_records,
            expired,
            evicted,
            "Routing table health"
        );
    }

    async fn republish(self: &Arc<Self>) {
        let records: Vec<(NodeId, Vec<u8>)> = self
            .published
            .read()
            .await
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect();
        if records.is_empty() {
            return;
        }

        let directory = OverlayDirectory {
            inner: Arc::clone(self),
        };
        for (key_id, value) in records {
            let replicas = directory.replicate(key_id, value).await;
            tracing::debug!(key = %key_id, replicas, "Republished record");
        }
    }

    async fn refresh(&self) {
        if self.node.read().await.routing_table().is_empty() {
            return;
        }
        let _ = self.iterative_lookup(self.local_id, LookupGoal::Node).await;
    }
}

async fn maintenance_loop(inner: Weak<DirectoryInner>, mut shutdown: watch::Receiver<bool>) {
    let (health_every, republish_every, refresh_every) = match inner.upgrade() {
        Some(inner) => (
            inner.config.health_interval,
            inner.config.republish_interval,
            inner.config.refresh_interval,
        ),
        None => return,
    };

    let start = Instant::now();
    let mut health = interval_at(start + health_every, health_every);
    let mut republish = interval_at(start + republish_every, republish_every);
    let mut refresh = interval_at(start + refresh_every, refresh_every);
    for timer in [&mut health, &mut republish, &mut refresh] {
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    }

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = health.tick() => {
                let Some(inner) = inner.upgrade() else { break };
                inner.maintain().await;
            }
            _ = republish.tick() => {
                let Some(inner) = inner.upgrade() else { break };
                inner.republish().await;
            }
            _ = refresh.tick() => {
                let Some(inner) = inner.upgrade() else { break };
                inner.refresh().await;
            }
        }
    }

    tracing::debug!("Directory maintenance loop stopped");
}
