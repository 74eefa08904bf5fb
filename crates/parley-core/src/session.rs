//! Secure session with one peer

use crate::PeerId;
use parley_crypto::CryptoError;
use parley_crypto::aead::{AeadKey, Envelope};
use parley_crypto::x25519::PublicKey;
use std::time::{Duration, Instant};

/// A derived symmetric key bound to one peer.
///
/// Shared (behind an `Arc`) by every message exchanged with the peer for
/// the session's lifetime. Encryption draws a fresh random nonce per call,
/// so concurrent senders on one session never reuse a nonce.
pub struct SecureSession {
    peer_id: PeerId,
    peer_public_key: PublicKey,
    key: AeadKey,
    established_at: Instant,
}

impl SecureSession {
    /// Create a session from an already derived key.
    #[must_use]
    pub fn new(peer_id: PeerId, peer_public_key: PublicKey, key: AeadKey) -> Self {
        Self {
            peer_id,
            peer_public_key,
            key,
            established_at: Instant::now(),
        }
    }

    /// Remote peer.
    #[must_use]
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Remote public key the session was derived with.
    #[must_use]
    pub fn peer_public_key(&self) -> &PublicKey {
        &self.peer_public_key
    }

    /// When the key was derived.
    #[must_use]
    pub fn established_at(&self) -> Instant {
        self.established_at
    }

    /// Time since derivation.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.established_at.elapsed()
    }

    /// True if this session was derived with `public_key`.
    #[must_use]
    pub fn matches_key(&self, public_key: &PublicKey) -> bool {
        self.peer_public_key == *public_key
    }

    /// Seal a payload for the peer.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::RandomSource`] if no nonce could be drawn.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Envelope, CryptoError> {
        self.key.seal(plaintext)
    }

    /// Open a payload from the peer.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::AuthenticationFailed`] for a tampered envelope
    /// or one sealed under another key.
    pub fn decrypt(&self, envelope: &Envelope) -> Result<Vec<u8>, CryptoError> {
        self.key.open(envelope)
    }
}

impl std::fmt::Debug for SecureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureSession")
            .field("peer_id", &self.peer_id)
            .field("established_at", &self.established_at)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Identity;

    fn pair() -> (SecureSession, SecureSession) {
        let alice = Identity::generate().unwrap();
        let bob = Identity::generate().unwrap();

        let at_alice = SecureSession::new(
            bob.peer_id(),
            *bob.public_key(),
            alice.session_key(bob.public_key()).unwrap(),
        );
        let at_bob = SecureSession::new(
            alice.peer_id(),
            *alice.public_key(),
            bob.session_key(alice.public_key()).unwrap(),
        );
        (at_alice, at_bob)
    }

    #[test]
    fn test_session_round_trip() {
        let (at_alice, at_bob) = pair();

        let envelope = at_alice.encrypt(b"hello").unwrap();
        assert_eq!(at_bob.decrypt(&envelope).unwrap(), b"hello");
    }

    #[test]
    fn test_fresh_nonce_per_message() {
        let (at_alice, _) = pair();

        let a = at_alice.encrypt(b"same").unwrap();
        let b = at_alice.encrypt(b"same").unwrap();
        assert_ne!(a.nonce(), b.nonce());
        assert_ne!(a.ciphertext(), b.ciphertext());
    }

    #[test]
    fn test_matches_key() {
        let (at_alice, at_bob) = pair();
        assert!(at_alice.matches_key(at_alice.peer_public_key()));
        assert!(!at_alice.matches_key(at_bob.peer_public_key()));
    }

    #[test]
    fn test_debug_hides_key() {
        let (at_alice, _) = pair();
        let debug = format!("{at_alice:?}");
        assert!(debug.contains("peer_id"));
        assert!(!debug.contains("key:"));
    }
}
