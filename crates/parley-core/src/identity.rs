//! Identity management for Parley nodes
//!
//! A node's identity is a single X25519 keypair. The peer identifier is the
//! domain-separated BLAKE3 digest of the public key, so anyone who learns a
//! key can check it against the identifier it claims.
//!
//! # Example
//!
//! ```
//! use parley_core::Identity;
//!
//! let identity = Identity::generate().expect("Failed to generate identity");
//! println!("Peer ID: {}", identity.peer_id().to_hex());
//! ```

use crate::PeerId;
use crate::error::Result;
use parley_crypto::aead::AeadKey;
use parley_crypto::derive_session_key;
use parley_crypto::x25519::{PrivateKey, PublicKey};
use zeroize::Zeroizing;

/// Node identity: an X25519 keypair and the peer ID derived from it.
///
/// The private key never leaves the process except through
/// [`Identity::secret_bytes`], which the CLI uses to persist a key file on
/// request. It is zeroized on drop.
///
/// # Example
///
/// ```
/// use parley_core::Identity;
///
/// let identity = Identity::generate().expect("Failed to generate identity");
/// assert!(identity.peer_id().matches_public_key(identity.public_key().as_bytes()));
/// ```
#[derive(Clone)]
pub struct Identity {
    private_key: PrivateKey,
    public_key: PublicKey,
    peer_id: PeerId,
}

impl Identity {
    /// Generate a random identity from the OS CSPRNG.
    ///
    /// # Errors
    ///
    /// Returns [`crate::NodeError::Crypto`] wrapping `RandomSource` if the
    /// entropy source is unavailable.
    pub fn generate() -> Result<Self> {
        Ok(Self::from_private_key(PrivateKey::generate()?))
    }

    /// Restore an identity from a private key.
    #[must_use]
    pub fn from_private_key(private_key: PrivateKey) -> Self {
        let public_key = private_key.public_key();
        let peer_id = PeerId::from_public_key(public_key.as_bytes());
        Self {
            private_key,
            public_key,
            peer_id,
        }
    }

    /// Restore an identity from raw private key bytes.
    #[must_use]
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        let bytes = Zeroizing::new(bytes);
        Self::from_private_key(PrivateKey::from_bytes(*bytes))
    }

    /// Peer identifier.
    #[must_use]
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// X25519 public key.
    #[must_use]
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Raw private key bytes, wiped when the returned buffer drops.
    #[must_use]
    pub fn secret_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.private_key.to_bytes())
    }

    /// Derive the symmetric session key shared with `remote`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::NodeError::Crypto`] with `InvalidCurvePoint` for an
    /// all-zero or low-order remote key.
    pub fn session_key(&self, remote: &PublicKey) -> Result<AeadKey> {
        let shared = self.private_key.exchange(remote)?;
        Ok(derive_session_key(&shared, &self.public_key, remote))
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("peer_id", &self.peer_id.short())
            .field("public_key", &self.public_key.to_hex())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NodeError;
    use parley_crypto::CryptoError;

    #[test]
    fn test_identity_generation() {
        let identity = Identity::generate().unwrap();
        assert_eq!(
            identity.peer_id(),
            PeerId::from_public_key(identity.public_key().as_bytes())
        );
    }

    #[test]
    fn test_identity_unique() {
        let id1 = Identity::generate().unwrap();
        let id2 = Identity::generate().unwrap();

        assert_ne!(id1.peer_id(), id2.peer_id());
        assert_ne!(id1.public_key(), id2.public_key());
    }

    #[test]
    fn test_identity_restore() {
        let identity = Identity::generate().unwrap();
        let restored = Identity::from_secret_bytes(*identity.secret_bytes());

        assert_eq!(restored.peer_id(), identity.peer_id());
        assert_eq!(restored.public_key(), identity.public_key());
    }

    #[test]
    fn test_session_key_agreement() {
        let alice = Identity::generate().unwrap();
        let bob = Identity::generate().unwrap();

        let k1 = alice.session_key(bob.public_key()).unwrap();
        let k2 = bob.session_key(alice.public_key()).unwrap();
        assert_eq!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn test_session_key_rejects_zero_point() {
        let identity = Identity::generate().unwrap();
        let zero = PublicKey::from_bytes([0u8; 32]);
        assert!(matches!(
            identity.session_key(&zero),
            Err(NodeError::Crypto(CryptoError::InvalidCurvePoint))
        ));
    }

    #[test]
    fn test_identity_debug_redacts_secret() {
        let identity = Identity::generate().unwrap();
        let debug = format!("{identity:?}");
        let secret = hex::encode(*identity.secret_bytes());

        assert!(debug.contains("Identity"));
        assert!(debug.contains("peer_id"));
        assert!(!debug.contains(&secret));
    }
}
