//! X25519 Diffie-Hellman key exchange (RFC 7748).
//!
//! Provides the node's identity keypair with:
//! - OS-entropy key generation that reports an unavailable source
//! - Low-order point rejection on both input and output
//! - Automatic key clamping (RFC 7748)
//! - Canonical hex encoding for directory publication
//! - Zeroization of sensitive data

use crate::constant_time::ct_is_zero;
use crate::random::random_32;
use crate::{CryptoError, PUBLIC_KEY_HEX_LEN, X25519_PUBLIC_KEY_SIZE};
use rand_core::{CryptoRng, RngCore};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// X25519 private key (32 bytes).
#[derive(Clone, ZeroizeOnDrop, Zeroize)]
pub struct PrivateKey(x25519_dalek::StaticSecret);

/// X25519 public key (32 bytes).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey(x25519_dalek::PublicKey);

/// X25519 shared secret (32 bytes).
#[derive(ZeroizeOnDrop, Zeroize)]
pub struct SharedSecret(x25519_dalek::SharedSecret);

impl PrivateKey {
    /// Generate a new private key from the OS CSPRNG.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::RandomSource`] if the entropy source is unavailable.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut bytes = random_32()?;
        let key = Self(x25519_dalek::StaticSecret::from(bytes));
        bytes.zeroize();
        Ok(key)
    }

    /// Generate a private key from a caller-supplied RNG.
    pub fn generate_from_rng<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self(x25519_dalek::StaticSecret::random_from_rng(rng))
    }

    /// Derive the public key from this private key.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey(x25519_dalek::PublicKey::from(&self.0))
    }

    /// Perform Diffie-Hellman key exchange.
    ///
    /// The result is identical for both parties: `DH(a, B) == DH(b, A)`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidCurvePoint`] if the peer key is all zero
    /// or the agreement produces the all-zero value (low-order input).
    pub fn exchange(&self, peer_public: &PublicKey) -> Result<SharedSecret, CryptoError> {
        if ct_is_zero(peer_public.as_bytes()) {
            return Err(CryptoError::InvalidCurvePoint);
        }

        let shared = self.0.diffie_hellman(&peer_public.0);

        if ct_is_zero(shared.as_bytes()) {
            return Err(CryptoError::InvalidCurvePoint);
        }

        Ok(SharedSecret(shared))
    }

    /// Export as bytes (for serialization).
    ///
    /// # Security
    ///
    /// The returned bytes contain the raw private key. Handle with care.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// Import from bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(x25519_dalek::StaticSecret::from(bytes))
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey([REDACTED])")
    }
}

impl PublicKey {
    /// Export public key as bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        *self.0.as_bytes()
    }

    /// Import public key from bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(x25519_dalek::PublicKey::from(bytes))
    }

    /// Import public key from a slice.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKeyLength`] if the slice is not 32 bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; X25519_PUBLIC_KEY_SIZE] =
            slice.try_into().map_err(|_| CryptoError::InvalidKeyLength {
                expected: X25519_PUBLIC_KEY_SIZE,
                actual: slice.len(),
            })?;
        Ok(Self::from_bytes(bytes))
    }

    /// Get bytes as a slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    /// Canonical text form: 64 lowercase hex characters.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }

    /// Parse the canonical text form.
    ///
    /// Accepts upper or lower case and surrounding whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidPublicKeyEncoding`] if the text is not
    /// exactly 64 hex characters.
    pub fn from_hex(text: &str) -> Result<Self, CryptoError> {
        let text = text.trim();
        if text.len() != PUBLIC_KEY_HEX_LEN {
            return Err(CryptoError::InvalidPublicKeyEncoding(format!(
                "expected {PUBLIC_KEY_HEX_LEN} hex characters, got {}",
                text.len()
            )));
        }

        let mut bytes = [0u8; X25519_PUBLIC_KEY_SIZE];
        hex::decode_to_slice(text, &mut bytes)
            .map_err(|e| CryptoError::InvalidPublicKeyEncoding(e.to_string()))?;
        Ok(Self::from_bytes(bytes))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(&self.as_bytes()[..8]))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl SharedSecret {
    /// Get shared secret as bytes.
    ///
    /// # Security
    ///
    /// Feed this through [`crate::derive_session_key`] before using it as an
    /// encryption key.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    fn from_hex32(s: &str) -> [u8; 32] {
        let mut out = [0u8; 32];
        hex::decode_to_slice(s, &mut out).unwrap();
        out
    }

    #[test]
    fn test_x25519_key_generation() {
        let private = PrivateKey::generate().unwrap();
        let public = private.public_key();

        // Public key should not be all zeros
        assert_ne!(public.to_bytes(), [0u8; 32]);
    }

    #[test]
    fn test_x25519_key_exchange() {
        let alice_private = PrivateKey::generate().unwrap();
        let alice_public = alice_private.public_key();

        let bob_private = PrivateKey::generate_from_rng(&mut OsRng);
        let bob_public = bob_private.public_key();

        // Both parties compute the same shared secret
        let alice_shared = alice_private.exchange(&bob_public).unwrap();
        let bob_shared = bob_private.exchange(&alice_public).unwrap();

        assert_eq!(alice_shared.as_bytes(), bob_shared.as_bytes());
    }

    #[test]
    fn test_reject_zero_public_key() {
        let private = PrivateKey::generate().unwrap();

        let zero_public = PublicKey::from_bytes([0u8; 32]);
        assert_eq!(
            private.exchange(&zero_public).err(),
            Some(CryptoError::InvalidCurvePoint)
        );
    }

    #[test]
    fn test_reject_low_order_points() {
        let private = PrivateKey::generate().unwrap();

        // u = 1 has order 4; the clamped scalar is a multiple of 8
        let mut one = [0u8; 32];
        one[0] = 1;
        assert!(private.exchange(&PublicKey::from_bytes(one)).is_err());

        // Order-8 point from the curve25519 low-order list
        let order8 =
            from_hex32("e0eb7a7c3b41b8ae1656e3faf19fc46ada098deb9c32b1fd866205165f49b800");
        assert!(private.exchange(&PublicKey::from_bytes(order8)).is_err());
    }

    #[test]
    fn test_key_serialization_roundtrip() {
        let original = PrivateKey::generate().unwrap();
        let bytes = original.to_bytes();
        let restored = PrivateKey::from_bytes(bytes);

        // Verify by comparing public keys
        assert_eq!(
            original.public_key().to_bytes(),
            restored.public_key().to_bytes()
        );
    }

    #[test]
    fn test_public_key_hex() {
        let public = PrivateKey::generate().unwrap().public_key();
        let text = public.to_hex();

        assert_eq!(text.len(), 64);
        assert!(text.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(PublicKey::from_hex(&text).unwrap(), public);
        assert_eq!(PublicKey::from_hex(&text.to_uppercase()).unwrap(), public);
    }

    #[test]
    fn test_public_key_hex_rejects_bad_input() {
        assert!(matches!(
            PublicKey::from_hex("abcd"),
            Err(CryptoError::InvalidPublicKeyEncoding(_))
        ));
        let not_hex = "zz".repeat(32);
        assert!(matches!(
            PublicKey::from_hex(&not_hex),
            Err(CryptoError::InvalidPublicKeyEncoding(_))
        ));
    }

    #[test]
    fn test_public_key_from_slice() {
        assert!(PublicKey::from_slice(&[7u8; 32]).is_ok());
        assert_eq!(
            PublicKey::from_slice(&[7u8; 31]).err(),
            Some(CryptoError::InvalidKeyLength {
                expected: 32,
                actual: 31
            })
        );
    }

    #[test]
    fn test_debug_redacts_private_key() {
        let private = PrivateKey::generate().unwrap();
        assert_eq!(format!("{private:?}"), "PrivateKey([REDACTED])");
    }

    #[test]
    fn test_rfc7748_vector() {
        // RFC 7748 Section 6.1
        let alice_sk =
            from_hex32("77076d0a7318a57d3c16c17251b26645df4c2f87ebc0992ab177fba51db92c2a");
        let alice_pk =
            from_hex32("8520f0098930a754748b7ddcb43ef75a0dbf3a0d26381af4eba4a98eaa9b4e6a");
        let bob_sk =
            from_hex32("5dab087e624a8a4b79e17f8b83800ee66f3bb1292618b6fd1c2f8b27ff88e0eb");
        let bob_pk =
            from_hex32("de9edb7d7b7dc1b4d35b61c2ece435373f8343c85b78674dadfc7e146f882b4f");
        let expected =
            from_hex32("4a5d9d5ba4ce2de1728e3bf480350f25e07e21c947d19e3376f09b3c1e161742");

        let alice = PrivateKey::from_bytes(alice_sk);
        let bob = PrivateKey::from_bytes(bob_sk);

        assert_eq!(alice.public_key().to_bytes(), alice_pk);
        assert_eq!(bob.public_key().to_bytes(), bob_pk);

        let shared = alice.exchange(&PublicKey::from_bytes(bob_pk)).unwrap();
        assert_eq!(shared.as_bytes(), &expected);
    }
}
