//! # Parley Crypto
//!
//! Cryptographic primitives for the Parley messaging node.
//!
//! This crate provides:
//! - X25519 identity keypairs and Diffie-Hellman agreement
//! - AES-256-GCM sealed envelopes with random per-message nonces
//! - Session key derivation bound to both peer identities
//! - Canonical hex encoding of public keys for directory publication
//!
//! ## Cryptographic Suite
//!
//! | Function | Algorithm | Security Level |
//! |----------|-----------|----------------|
//! | Key Exchange | X25519 | 128-bit |
//! | AEAD | AES-256-GCM | 256-bit key |
//! | KDF | BLAKE3 `derive_key` | 128-bit |
//! | Peer Identifier | BLAKE3 | 128-bit collision |

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aead;
pub mod constant_time;
pub mod error;
pub mod random;
pub mod x25519;

pub use error::CryptoError;

/// X25519 public key size
pub const X25519_PUBLIC_KEY_SIZE: usize = 32;

/// X25519 secret key size
pub const X25519_SECRET_KEY_SIZE: usize = 32;

/// Hex-encoded public key length
pub const PUBLIC_KEY_HEX_LEN: usize = X25519_PUBLIC_KEY_SIZE * 2;

/// AES-256-GCM key size
pub const AES_KEY_SIZE: usize = 32;

/// AES-256-GCM nonce size
pub const AES_NONCE_SIZE: usize = 12;

/// AES-256-GCM tag size
pub const AES_TAG_SIZE: usize = 16;

/// Context string for session key derivation.
const SESSION_KEY_CONTEXT: &str = "parley 2024 session key v1";

/// Derive the symmetric session key for a pair of peers.
///
/// Mixes the raw X25519 output with both public keys in canonical
/// (sorted) order so either side computes the same key.
#[must_use]
pub fn derive_session_key(
    shared: &x25519::SharedSecret,
    local: &x25519::PublicKey,
    remote: &x25519::PublicKey,
) -> aead::AeadKey {
    let (first, second) = if local.as_bytes() <= remote.as_bytes() {
        (local, remote)
    } else {
        (remote, local)
    };

    let mut hasher = blake3::Hasher::new_derive_key(SESSION_KEY_CONTEXT);
    hasher.update(shared.as_bytes());
    hasher.update(first.as_bytes());
    hasher.update(second.as_bytes());
    aead::AeadKey::new(*hasher.finalize().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::x25519::PrivateKey;

    #[test]
    fn test_session_key_symmetric() {
        let alice = PrivateKey::generate().unwrap();
        let bob = PrivateKey::generate().unwrap();

        let alice_shared = alice.exchange(&bob.public_key()).unwrap();
        let bob_shared = bob.exchange(&alice.public_key()).unwrap();

        let k1 = derive_session_key(&alice_shared, &alice.public_key(), &bob.public_key());
        let k2 = derive_session_key(&bob_shared, &bob.public_key(), &alice.public_key());

        assert_eq!(k1.as_bytes(), k2.as_bytes());
        assert_ne!(k1.as_bytes(), alice_shared.as_bytes());
    }

    #[test]
    fn test_session_key_bound_to_identities() {
        let alice = PrivateKey::generate().unwrap();
        let bob = PrivateKey::generate().unwrap();
        let mallory = PrivateKey::generate().unwrap();

        let shared = alice.exchange(&bob.public_key()).unwrap();
        let honest = derive_session_key(&shared, &alice.public_key(), &bob.public_key());
        let forged = derive_session_key(&shared, &alice.public_key(), &mallory.public_key());

        assert_ne!(honest.as_bytes(), forged.as_bytes());
    }
}
