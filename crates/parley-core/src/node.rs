//! Node implementation - high-level messaging orchestrator
//!
//! The Node is the primary entry point for Parley applications. It owns the
//! identity, the overlay directory, the session manager, the peer address
//! cache and the open channels, and drives the messaging workflow:
//!
//! 1. join the overlay and publish the public key under the peer ID
//! 2. resolve a peer's addresses (and published key) through the directory
//! 3. open a channel, verifying the peer's identity in the hello
//! 4. derive or reuse the secure session and send sealed envelopes
//!
//! Inbound channels are served by independent tasks; decrypted payloads are
//! handed to the gateway receiver returned by [`Node::start`].
//!
//! # Example
//!
//! ```no_run
//! use parley_core::{Node, NodeConfig, PeerId};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let node = Node::new_random(NodeConfig::default()).await?;
//!     let mut inbound = node.start().await?;
//!     node.join().await?;
//!
//!     let peer: PeerId = "3b6a27bcceb6a42d62a3a8d02a6f0d73653215771de243a63ac048a18b59da29".parse()?;
//!     node.send_message(peer, b"hello").await?;
//!
//!     while let Some(message) = inbound.recv().await {
//!         println!("{}: {}", message.peer_id, String::from_utf8_lossy(&message.payload));
//!     }
//!     Ok(())
//! }
//! ```

use crate::PeerId;
use crate::channel::{Channel, ChannelListener};
use crate::config::NodeConfig;
use crate::error::{NodeError, Result};
use crate::identity::Identity;
use crate::security::{SecurityEvent, SecurityMetrics, SecurityStats};
use crate::session_manager::SessionManager;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parley_crypto::aead::Envelope;
use parley_crypto::x25519::PublicKey;
use parley_discovery::{OverlayDirectory, PeerRecord, RoutingHealth};
use parley_transport::{TcpTransport, Transport};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::{Mutex, mpsc, watch};

/// A decrypted message for the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Sender
    pub peer_id: PeerId,
    /// Plaintext payload
    pub payload: Vec<u8>,
}

/// Node inner state
pub(crate) struct NodeInner {
    /// Node identity
    identity: Arc<Identity>,
    /// Node configuration
    config: NodeConfig,
    /// Stream transport shared by channels and the directory
    transport: Arc<dyn Transport>,
    /// DHT-backed directory
    directory: OverlayDirectory,
    /// Secure sessions (peer_id -> session)
    sessions: SessionManager,
    /// Last resolved record per peer
    addresses: DashMap<PeerId, PeerRecord>,
    /// Open channels (peer_id -> channel)
    channels: DashMap<PeerId, Arc<Channel>>,
    /// Channel listener, taken by `start`
    listener: Mutex<Option<ChannelListener>>,
    /// Gateway sender, set by `start`
    gateway: OnceLock<mpsc::Sender<InboundMessage>>,
    /// Security counters
    security: Arc<SecurityStats>,
    /// Set while the node is serving
    running: AtomicBool,
    /// Shutdown signal for background tasks
    shutdown: watch::Sender<bool>,
}

/// Parley messaging node
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl Node {
    /// Create a node with a fresh random identity.
    ///
    /// # Errors
    ///
    /// See [`Node::new_from_identity`].
    pub async fn new_random(config: NodeConfig) -> Result<Self> {
        Self::new_from_identity(Identity::generate()?, config).await
    }

    /// Create a node, binding a TCP transport on the configured addresses.
    ///
    /// # Errors
    ///
    /// - [`NodeError::InvalidConfig`] if the configuration is invalid
    /// - [`NodeError::TransportInit`] if the listen addresses cannot be bound
    pub async fn new_from_identity(identity: Identity, config: NodeConfig) -> Result<Self> {
        config.validate()?;
        let transport = TcpTransport::bind(&config.listen_addrs, config.transport_config())
            .await
            .map_err(|e| NodeError::TransportInit(e.to_string().into()))?;
        Self::with_transport(identity, config, Arc::new(transport))
    }

    /// Create a node on an existing transport.
    ///
    /// # Errors
    ///
    /// - [`NodeError::InvalidConfig`] if the configuration is invalid
    /// - [`NodeError::Transport`] if the channel or DHT protocol is already
    ///   registered on `transport`
    pub fn with_transport(
        identity: Identity,
        config: NodeConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        config.validate()?;

        let identity = Arc::new(identity);
        let security = Arc::new(SecurityStats::new());
        let listener = ChannelListener::bind(
            transport.as_ref(),
            Arc::clone(&identity),
            config.channel.clone(),
            Arc::clone(&security),
        )?;
        let directory = OverlayDirectory::start(
            identity.peer_id(),
            Arc::clone(&transport),
            config.directory_config(),
        )?;
        let (shutdown, _) = watch::channel(false);

        tracing::info!(
            peer_id = %identity.peer_id(),
            addrs = ?transport.local_addrs(),
            "Node created"
        );

        Ok(Self {
            inner: Arc::new(NodeInner {
                sessions: SessionManager::new(Arc::clone(&identity), Arc::clone(&security)),
                identity,
                config,
                transport,
                directory,
                addresses: DashMap::new(),
                channels: DashMap::new(),
                listener: Mutex::new(Some(listener)),
                gateway: OnceLock::new(),
                security,
                running: AtomicBool::new(false),
                shutdown,
            }),
        })
    }

    /// Start accepting channels.
    ///
    /// Returns the gateway receiver carrying every decrypted inbound message.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::InvalidState`] if the node was already started.
    pub async fn start(&self) -> Result<mpsc::Receiver<InboundMessage>> {
        let listener = self
            .inner
            .listener
            .lock()
            .await
            .take()
            .ok_or(NodeError::invalid_state("node already started"))?;

        let (tx, rx) = mpsc::channel(self.inner.config.gateway_queue);
        self.inner
            .gateway
            .set(tx)
            .map_err(|_| NodeError::invalid_state("node already started"))?;
        self.inner.running.store(true, Ordering::SeqCst);

        tokio::spawn(accept_loop(
            Arc::clone(&self.inner),
            listener,
            self.inner.shutdown.subscribe(),
        ));

        tracing::info!(peer_id = %self.peer_id(), "Node started");
        Ok(rx)
    }

    /// Bootstrap from the configured seeds and publish this node's key.
    ///
    /// Returns the routing table size.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Bootstrap`] if seeds are configured and none
    /// answered.
    pub async fn join(&self) -> Result<usize> {
        let seeds = self.inner.config.bootstrap_nodes.clone();
        let peers = self.bootstrap(&seeds).await?;
        self.publish_identity().await?;
        Ok(peers)
    }

    /// Join the overlay through `seeds`.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Bootstrap`] if no seed answered.
    pub async fn bootstrap(&self, seeds: &[SocketAddr]) -> Result<usize> {
        Ok(self.inner.directory.bootstrap(seeds).await?)
    }

    /// Publish the hex public key under the raw peer ID bytes.
    ///
    /// Returns the number of remote replicas. The directory republishes the
    /// record until shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::InvalidState`] after shutdown.
    pub async fn publish_identity(&self) -> Result<usize> {
        let replicas = self
            .inner
            .directory
            .publish(
                self.peer_id().as_bytes(),
                self.public_key().to_hex().into_bytes(),
            )
            .await?;

        if replicas == 0 && self.inner.directory.peer_count().await > 0 {
            tracing::warn!(peer_id = %self.peer_id(), "Public key stored locally only");
        } else {
            tracing::info!(peer_id = %self.peer_id(), replicas, "Public key published");
        }
        Ok(replicas)
    }

    /// Fetch a peer's published public key and check it against the peer ID.
    ///
    /// # Errors
    ///
    /// - [`NodeError::RecordNotFound`] if the peer never published a key
    /// - [`NodeError::Handshake`] if the published key does not hash to `peer_id`
    /// - [`NodeError::Crypto`] if the record is not a hex public key
    pub async fn lookup_public_key(&self, peer_id: &PeerId) -> Result<PublicKey> {
        let value = self.inner.directory.lookup(peer_id.as_bytes()).await?;
        let text = std::str::from_utf8(&value)
            .map_err(|_| NodeError::handshake("published key is not text"))?;
        let key = PublicKey::from_hex(text)?;

        if !peer_id.matches_public_key(key.as_bytes()) {
            self.inner
                .security
                .record(SecurityEvent::IdentityMismatch, peer_id);
            return Err(NodeError::handshake("published key does not match peer id"));
        }
        Ok(key)
    }

    /// Resolve a peer's current addresses, using the cache unless `refresh`.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::PeerUnreachable`] if the directory cannot locate
    /// the peer.
    pub async fn resolve_peer(&self, peer_id: &PeerId, refresh: bool) -> Result<PeerRecord> {
        if !refresh {
            if let Some(record) = self.inner.addresses.get(peer_id) {
                return Ok(record.clone());
            }
        }

        let mut record = self.inner.directory.find_peer(peer_id).await?;
        match self.lookup_public_key(peer_id).await {
            Ok(key) => record = record.with_public_key(key.to_bytes()),
            Err(e) => {
                tracing::debug!(peer = %peer_id, error = %e, "No usable published key, hello will supply it");
            }
        }

        tracing::debug!(peer = %peer_id, addrs = ?record.addrs, "Peer resolved");
        self.inner.addresses.insert(*peer_id, record.clone());
        Ok(record)
    }

    /// Encrypt `payload` for `peer_id` and send it.
    ///
    /// Reuses an open channel and session when possible. If the send fails
    /// with a retryable error, the peer is re-resolved and the send retried
    /// once over a new channel.
    ///
    /// # Errors
    ///
    /// - [`NodeError::PeerUnreachable`] if the directory cannot locate the peer
    /// - [`NodeError::Unreachable`] if every address failed
    /// - [`NodeError::ChannelWrite`] if the write failed on the retry too
    pub async fn send_message(&self, peer_id: PeerId, payload: &[u8]) -> Result<()> {
        self.ensure_running()?;
        if peer_id == self.peer_id() {
            return Err(NodeError::invalid_state("cannot send to self"));
        }

        match self.try_send(peer_id, payload, false).await {
            Err(e) if e.should_retry() => {
                tracing::debug!(peer = %peer_id, error = %e, "Send failed, re-resolving peer");
                self.inner.addresses.remove(&peer_id);
                self.try_send(peer_id, payload, true).await
            }
            other => other,
        }
    }

    async fn try_send(&self, peer_id: PeerId, payload: &[u8], refresh: bool) -> Result<()> {
        let channel = self.channel_to(peer_id, refresh).await?;
        let session = self
            .inner
            .sessions
            .get_or_create(peer_id, channel.peer_public_key())
            .await?;
        let envelope = session.encrypt(payload)?;

        if let Err(e) = channel.send(&envelope).await {
            self.inner.drop_channel(&channel);
            return Err(e);
        }
        tracing::trace!(peer = %peer_id, bytes = payload.len(), "Message sent");
        Ok(())
    }

    async fn channel_to(&self, peer_id: PeerId, refresh: bool) -> Result<Arc<Channel>> {
        let cached = self
            .inner
            .channels
            .get(&peer_id)
            .map(|c| Arc::clone(c.value()));
        if let Some(channel) = cached {
            if !refresh && !channel.is_broken() {
                return Ok(channel);
            }
            self.inner.drop_channel(&channel);
        }

        let record = self.resolve_peer(&peer_id, refresh).await?;
        let channel = Arc::new(
            Channel::open(
                self.inner.transport.as_ref(),
                &self.inner.identity,
                &record,
                &self.inner.config.channel,
                Arc::clone(&self.inner.security),
            )
            .await?,
        );

        self.inner.channels.insert(peer_id, Arc::clone(&channel));
        tokio::spawn(serve_channel(Arc::clone(&self.inner), Arc::clone(&channel)));
        Ok(channel)
    }

    /// Stop background tasks, close channels and the transport.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Transport`] if the transport fails to close.
    pub async fn stop(&self) -> Result<()> {
        self.inner.running.store(false, Ordering::SeqCst);
        let _ = self.inner.shutdown.send(true);
        self.inner.directory.shutdown();

        let channels: Vec<Arc<Channel>> = self
            .inner
            .channels
            .iter()
            .map(|c| Arc::clone(c.value()))
            .collect();
        self.inner.channels.clear();
        for channel in channels {
            channel.close().await;
        }

        self.inner.sessions.clear();
        self.inner.addresses.clear();
        self.inner.transport.close().await?;

        tracing::info!(peer_id = %self.peer_id(), "Node stopped");
        Ok(())
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(NodeError::invalid_state("node is not running"))
        }
    }

    /// True between [`Node::start`] and [`Node::stop`].
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Local peer ID.
    #[must_use]
    pub fn peer_id(&self) -> PeerId {
        self.inner.identity.peer_id()
    }

    /// Local public key.
    #[must_use]
    pub fn public_key(&self) -> &PublicKey {
        self.inner.identity.public_key()
    }

    /// Node identity.
    #[must_use]
    pub fn identity(&self) -> &Arc<Identity> {
        &self.inner.identity
    }

    /// Addresses the transport listens on.
    #[must_use]
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.inner.transport.local_addrs()
    }

    /// The overlay directory.
    #[must_use]
    pub fn directory(&self) -> &OverlayDirectory {
        &self.inner.directory
    }

    /// The session manager.
    #[must_use]
    pub fn sessions(&self) -> &SessionManager {
        &self.inner.sessions
    }

    /// Security counters.
    #[must_use]
    pub fn security_stats(&self) -> SecurityMetrics {
        self.inner.security.snapshot()
    }

    /// Number of open channels.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.inner.channels.len()
    }

    /// Directory routing and store state.
    pub async fn routing_health(&self) -> RoutingHealth {
        self.inner.directory.routing_health().await
    }
}

impl NodeInner {
    /// Forget `channel` if it is still the cached one for its peer.
    fn drop_channel(&self, channel: &Arc<Channel>) {
        self.channels
            .remove_if(&channel.peer_id(), |_, cached| Arc::ptr_eq(cached, channel));
    }

    /// Forget a closed channel, and the peer's session if no channel to the
    /// peer remains.
    fn release_channel(&self, channel: &Arc<Channel>) {
        self.drop_channel(channel);
        let peer_id = channel.peer_id();
        if !self.channels.contains_key(&peer_id) {
            self.sessions.reset(&peer_id);
        }
    }

    async fn open_envelope(&self, channel: &Channel, envelope: &Envelope) -> Result<Vec<u8>> {
        let peer_id = channel.peer_id();
        self.sessions
            .get_or_create(peer_id, channel.peer_public_key())
            .await?;
        self.sessions.decrypt_from(&peer_id, envelope)
    }
}

async fn accept_loop(
    inner: Arc<NodeInner>,
    mut listener: ChannelListener,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            pending = listener.next_pending() => {
                let Some(pending) = pending else { break };
                let inner = Arc::clone(&inner);
                tokio::spawn(async move {
                    let remote_addr = pending.remote_addr();
                    match pending.complete().await {
                        Ok(channel) => {
                            let channel = Arc::new(channel);
                            match inner.channels.entry(channel.peer_id()) {
                                Entry::Occupied(mut entry) if entry.get().is_broken() => {
                                    entry.insert(Arc::clone(&channel));
                                }
                                Entry::Vacant(entry) => {
                                    entry.insert(Arc::clone(&channel));
                                }
                                Entry::Occupied(_) => {}
                            }
                            serve_channel(inner, channel).await;
                        }
                        Err(e) => {
                            tracing::debug!(%remote_addr, error = %e, "Inbound hello failed");
                        }
                    }
                });
            }
        }
    }
    tracing::debug!("Channel accept loop stopped");
}

/// Read envelopes from `channel` until it closes, delivering plaintext to
/// the gateway.
async fn serve_channel(inner: Arc<NodeInner>, channel: Arc<Channel>) {
    let peer_id = channel.peer_id();
    let mut shutdown = inner.shutdown.subscribe();

    loop {
        let next = tokio::select! {
            _ = shutdown.changed() => break,
            next = channel.recv() => next,
        };

        match next {
            Ok(Some(envelope)) => {
                let payload = match inner.open_envelope(&channel, &envelope).await {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::debug!(peer = %peer_id, error = %e, "Inbound message dropped");
                        continue;
                    }
                };

                let Some(gateway) = inner.gateway.get() else { break };
                if gateway
                    .send(InboundMessage { peer_id, payload })
                    .await
                    .is_err()
                {
                    tracing::debug!("Gateway receiver dropped");
                    break;
                }
            }
            Ok(None) => {
                tracing::debug!(peer = %peer_id, "Peer closed channel");
                break;
            }
            Err(e) => {
                tracing::debug!(peer = %peer_id, error = %e, "Channel read failed");
                break;
            }
        }
    }

    channel.close().await;
    inner.release_channel(&channel);
}
