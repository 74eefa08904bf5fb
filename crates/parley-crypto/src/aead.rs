//! AES-256-GCM sealed envelopes.
//!
//! Every message is sealed under the session key with a fresh random
//! 96-bit nonce and no associated data:
//!
//! ```text
//! envelope := nonce (12) || ciphertext || tag (16)
//! ```
//!
//! ## Security Properties
//!
//! - Confidentiality: AES-256 in counter mode
//! - Integrity: GHASH tag, verified in constant time by `aes-gcm`
//! - Nonce uniqueness: drawn from the OS CSPRNG on every call, never derived
//!   from shared state, so concurrent senders on one key cannot collide
//!   except with random-collision probability
//!
//! ## Usage
//!
//! ```ignore
//! use parley_crypto::aead::AeadKey;
//!
//! let key = AeadKey::generate()?;
//! let envelope = key.seal(b"secret")?;
//! let plaintext = key.open(&envelope)?;
//! ```

use crate::random::{random_12, random_32};
use crate::{AES_KEY_SIZE, AES_NONCE_SIZE, AES_TAG_SIZE, CryptoError};
use aes_gcm::{
    Aes256Gcm, Key,
    aead::{Aead, KeyInit, Payload},
};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Authentication tag size (16 bytes / 128 bits).
pub const TAG_SIZE: usize = AES_TAG_SIZE;

/// AES-GCM nonce size (12 bytes / 96 bits).
pub const NONCE_SIZE: usize = AES_NONCE_SIZE;

/// AEAD key size (32 bytes / 256 bits).
pub const KEY_SIZE: usize = AES_KEY_SIZE;

/// Smallest valid serialized envelope (empty plaintext).
pub const MIN_ENVELOPE_SIZE: usize = NONCE_SIZE + TAG_SIZE;

/// AES-GCM nonce (12 bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Nonce([u8; NONCE_SIZE]);

impl Nonce {
    /// Create a nonce from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; NONCE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create a nonce from a slice.
    #[must_use]
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        let bytes: [u8; NONCE_SIZE] = slice.try_into().ok()?;
        Some(Self(bytes))
    }

    /// Generate a random nonce from the OS CSPRNG.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::RandomSource`] if the entropy source is unavailable.
    pub fn generate() -> Result<Self, CryptoError> {
        Ok(Self(random_12()?))
    }

    /// Get raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }
}

/// An encrypted message: nonce plus ciphertext with the tag appended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    nonce: Nonce,
    ciphertext: Vec<u8>,
}

impl Envelope {
    /// Assemble an envelope from its parts.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::MalformedCiphertext`] if `ciphertext` cannot
    /// hold a tag.
    pub fn new(nonce: Nonce, ciphertext: Vec<u8>) -> Result<Self, CryptoError> {
        if ciphertext.len() < TAG_SIZE {
            return Err(CryptoError::MalformedCiphertext {
                len: NONCE_SIZE + ciphertext.len(),
                min: MIN_ENVELOPE_SIZE,
            });
        }
        Ok(Self { nonce, ciphertext })
    }

    /// The nonce this envelope was sealed with.
    #[must_use]
    pub fn nonce(&self) -> &Nonce {
        &self.nonce
    }

    /// Ciphertext including the trailing tag.
    #[must_use]
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Serialized length: `12 + len(ciphertext_with_tag)`.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        NONCE_SIZE + self.ciphertext.len()
    }

    /// Serialize as `nonce || ciphertext || tag`.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(self.nonce.as_bytes());
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Parse `nonce || ciphertext || tag`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::MalformedCiphertext`] if `bytes` is shorter than
    /// nonce + tag.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() < MIN_ENVELOPE_SIZE {
            return Err(CryptoError::MalformedCiphertext {
                len: bytes.len(),
                min: MIN_ENVELOPE_SIZE,
            });
        }

        let (nonce, ciphertext) = bytes.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce).ok_or(CryptoError::MalformedCiphertext {
            len: bytes.len(),
            min: MIN_ENVELOPE_SIZE,
        })?;

        Ok(Self {
            nonce,
            ciphertext: ciphertext.to_vec(),
        })
    }
}

/// AEAD encryption key (32 bytes).
///
/// Wraps the raw key material and provides sealing/opening methods.
/// Key is zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AeadKey([u8; KEY_SIZE]);

impl AeadKey {
    /// Create a key from raw bytes.
    #[must_use]
    pub fn new(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create a key from a slice.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKeyLength`] if the slice is not exactly 32 bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; KEY_SIZE] = slice.try_into().map_err(|_| CryptoError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: slice.len(),
        })?;
        Ok(Self(bytes))
    }

    /// Generate a random key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::RandomSource`] if the entropy source is unavailable.
    pub fn generate() -> Result<Self, CryptoError> {
        Ok(Self(random_32()?))
    }

    /// Get raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }

    /// Seal `plaintext` under a fresh random nonce.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::RandomSource`] if no nonce could be drawn.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Envelope, CryptoError> {
        self.seal_with_nonce(Nonce::generate()?, plaintext)
    }

    /// Seal `plaintext` under a caller-chosen nonce.
    ///
    /// Deterministic; intended for known-answer tests. Reusing a nonce under
    /// the same key destroys confidentiality.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::EncryptionFailed`] if the plaintext exceeds the
    /// AES-GCM length limit.
    pub fn seal_with_nonce(&self, nonce: Nonce, plaintext: &[u8]) -> Result<Envelope, CryptoError> {
        let ciphertext = self
            .cipher()
            .encrypt(
                aes_gcm::Nonce::from_slice(nonce.as_bytes()),
                Payload {
                    msg: plaintext,
                    aad: &[],
                },
            )
            .map_err(|_| CryptoError::EncryptionFailed)?;

        Ok(Envelope { nonce, ciphertext })
    }

    /// Verify and decrypt an envelope.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::MalformedCiphertext`] if the ciphertext cannot
    /// hold a tag, or [`CryptoError::AuthenticationFailed`] if verification
    /// fails. No plaintext is produced on either path.
    pub fn open(&self, envelope: &Envelope) -> Result<Vec<u8>, CryptoError> {
        if envelope.ciphertext.len() < TAG_SIZE {
            return Err(CryptoError::MalformedCiphertext {
                len: envelope.encoded_len(),
                min: MIN_ENVELOPE_SIZE,
            });
        }

        self.cipher()
            .decrypt(
                aes_gcm::Nonce::from_slice(envelope.nonce.as_bytes()),
                Payload {
                    msg: &envelope.ciphertext,
                    aad: &[],
                },
            )
            .map_err(|_| CryptoError::AuthenticationFailed)
    }
}

/// Encrypt `plaintext` under a raw 32-byte key with a fresh nonce.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidKeyLength`] for a key that is not 32 bytes
/// and [`CryptoError::RandomSource`] if no nonce could be drawn.
pub fn encrypt(key: &[u8], plaintext: &[u8]) -> Result<Envelope, CryptoError> {
    AeadKey::from_slice(key)?.seal(plaintext)
}

/// Encrypt under a raw key and a caller-chosen nonce. Test use only.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidKeyLength`] for a key that is not 32 bytes.
pub fn encrypt_with_nonce(
    key: &[u8],
    nonce: Nonce,
    plaintext: &[u8],
) -> Result<Envelope, CryptoError> {
    AeadKey::from_slice(key)?.seal_with_nonce(nonce, plaintext)
}

/// Decrypt an envelope under a raw 32-byte key.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidKeyLength`], [`CryptoError::MalformedCiphertext`]
/// or [`CryptoError::AuthenticationFailed`].
pub fn decrypt(key: &[u8], envelope: &Envelope) -> Result<Vec<u8>, CryptoError> {
    AeadKey::from_slice(key)?.open(envelope)
}
