//! Session management for Parley nodes
//!
//! This module provides session lifecycle management including:
//! - Session derivation (X25519 agreement with the peer's public key)
//! - Session lookup and reuse
//! - Invalidation when a peer's key changes, and explicit reset
//! - Encrypt/decrypt scoped to a peer
//!
//! # Architecture
//!
//! Sessions are stored in a concurrent DashMap keyed by peer ID. Derivation
//! for one peer is serialized by a per-peer async mutex so concurrent
//! callers collapse to a single derivation and share one `Arc`; callers for
//! different peers never contend.
//!
//! ```text
//! get_or_create(peer, key)
//!     |
//!     |-- session present with same key? --> return it
//!     |
//!     |-- lock(peer) ---------------------------+
//!     |     session present with same key? --> return it
//!     |     derive, insert                     |
//!     |-- unlock, drop lock if no waiters -------+
//! ```
//!
//! The node resets a peer's session once its last channel closes, so the
//! map only holds sessions for peers with a live channel.

use crate::PeerId;
use crate::error::{NodeError, Result};
use crate::identity::Identity;
use crate::security::{SecurityEvent, SecurityStats};
use crate::session::SecureSession;
use dashmap::DashMap;
use parley_crypto::aead::Envelope;
use parley_crypto::x25519::PublicKey;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

/// Session manager for Parley nodes
///
/// Coordinates session derivation, reuse and invalidation.
/// Thread-safe and designed for concurrent access.
pub struct SessionManager {
    /// Local identity used for every agreement
    identity: Arc<Identity>,

    /// Established sessions (peer_id -> session)
    sessions: DashMap<PeerId, Arc<SecureSession>>,

    /// Per-peer derivation locks
    locks: DashMap<PeerId, Arc<Mutex<()>>>,

    /// Number of key derivations performed
    derivations: AtomicU64,

    /// Shared security counters
    security: Arc<SecurityStats>,
}

impl SessionManager {
    /// Create a new session manager
    #[must_use]
    pub fn new(identity: Arc<Identity>, security: Arc<SecurityStats>) -> Self {
        Self {
            identity,
            sessions: DashMap::new(),
            locks: DashMap::new(),
            derivations: AtomicU64::new(0),
            security,
        }
    }

    fn existing(&self, peer_id: &PeerId, peer_public_key: &PublicKey) -> Option<Arc<SecureSession>> {
        self.sessions
            .get(peer_id)
            .filter(|s| s.matches_key(peer_public_key))
            .map(|s| Arc::clone(s.value()))
    }

    /// Return the session with `peer_id`, deriving it on first use.
    ///
    /// A stored session derived with a different public key is replaced.
    ///
    /// # Errors
    ///
    /// - [`NodeError::Handshake`] if `peer_public_key` does not hash to `peer_id`
    /// - [`NodeError::Crypto`] with `InvalidCurvePoint` for a degenerate key
    pub async fn get_or_create(
        &self,
        peer_id: PeerId,
        peer_public_key: &PublicKey,
    ) -> Result<Arc<SecureSession>> {
        if let Some(session) = self.existing(&peer_id, peer_public_key) {
            return Ok(session);
        }

        if !peer_id.matches_public_key(peer_public_key.as_bytes()) {
            self.security.record(SecurityEvent::IdentityMismatch, peer_id);
            return Err(NodeError::handshake("public key does not match peer id"));
        }

        let lock = Arc::clone(
            self.locks
                .entry(peer_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        let result = {
            let _guard = lock.lock().await;
            self.derive(peer_id, peer_public_key)
        };

        // Only waiters keep a lock alive
        drop(lock);
        self.locks
            .remove_if(&peer_id, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    /// Derive and store a session. Caller holds the peer's derivation lock.
    fn derive(&self, peer_id: PeerId, peer_public_key: &PublicKey) -> Result<Arc<SecureSession>> {
        if let Some(session) = self.existing(&peer_id, peer_public_key) {
            return Ok(session);
        }

        let key = self.identity.session_key(peer_public_key).inspect_err(|e| {
            if let NodeError::Crypto(err) = e {
                if let Some(event) = SecurityEvent::from_crypto_error(err) {
                    self.security.record(event, peer_id);
                }
            }
        })?;
        self.derivations.fetch_add(1, Ordering::Relaxed);

        let session = Arc::new(SecureSession::new(peer_id, *peer_public_key, key));
        if let Some(previous) = self.sessions.insert(peer_id, Arc::clone(&session)) {
            tracing::info!(
                peer = %peer_id,
                age_secs = previous.age().as_secs(),
                "Peer key changed, session replaced"
            );
        } else {
            tracing::debug!(peer = %peer_id, "Session established");
        }

        Ok(session)
    }

    /// Get the session with a peer, if any.
    #[must_use]
    pub fn get(&self, peer_id: &PeerId) -> Option<Arc<SecureSession>> {
        self.sessions.get(peer_id).map(|s| Arc::clone(s.value()))
    }

    /// Encrypt a payload for a peer.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::NoSession`] if no session exists.
    pub fn encrypt_for(&self, peer_id: &PeerId, plaintext: &[u8]) -> Result<Envelope> {
        let session = self.get(peer_id).ok_or(NodeError::NoSession(*peer_id))?;
        Ok(session.encrypt(plaintext)?)
    }

    /// Decrypt a payload from a peer.
    ///
    /// An authentication failure is counted and returned; the session stays
    /// in place.
    ///
    /// # Errors
    ///
    /// - [`NodeError::NoSession`] if no session exists
    /// - [`NodeError::Crypto`] with `AuthenticationFailed` for a tampered envelope
    pub fn decrypt_from(&self, peer_id: &PeerId, envelope: &Envelope) -> Result<Vec<u8>> {
        let session = self.get(peer_id).ok_or(NodeError::NoSession(*peer_id))?;
        session.decrypt(envelope).map_err(|e| {
            if let Some(event) = SecurityEvent::from_crypto_error(&e) {
                self.security.record(event, peer_id);
            }
            NodeError::Crypto(e)
        })
    }

    /// Drop the session with a peer. The next `get_or_create` re-derives.
    ///
    /// Returns true if a session existed.
    pub fn reset(&self, peer_id: &PeerId) -> bool {
        self.locks
            .remove_if(peer_id, |_, lock| Arc::strong_count(lock) == 1);
        let removed = self.sessions.remove(peer_id).is_some();
        if removed {
            tracing::debug!(peer = %peer_id, "Session reset");
        }
        removed
    }

    /// Check if a session exists with a peer.
    #[must_use]
    pub fn has_session(&self, peer_id: &PeerId) -> bool {
        self.sessions.contains_key(peer_id)
    }

    /// Number of established sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Peers with an established session.
    #[must_use]
    pub fn active_peers(&self) -> Vec<PeerId> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    /// Drop every session.
    pub fn clear(&self) {
        self.sessions.clear();
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    /// Number of key derivations performed since startup.
    #[must_use]
    pub fn derivation_count(&self) -> u64 {
        self.derivations.load(Ordering::Relaxed)
    }
}
