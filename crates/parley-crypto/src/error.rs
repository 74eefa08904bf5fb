//! Cryptographic error types.

use thiserror::Error;

/// Cryptographic errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// The OS entropy source could not supply random bytes
    #[error("random source unavailable: {0}")]
    RandomSource(String),

    /// Peer public key is degenerate or produced an all-zero shared secret
    #[error("invalid curve point: peer public key is low-order")]
    InvalidCurvePoint,

    /// Invalid key length
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Envelope too short to hold a nonce and a tag
    #[error("malformed ciphertext: {len} bytes is shorter than the {min} byte minimum")]
    MalformedCiphertext {
        /// Received length
        len: usize,
        /// Minimum valid length
        min: usize,
    },

    /// AEAD tag verification failed (tampered data or wrong key)
    #[error("authentication failed")]
    AuthenticationFailed,

    /// AEAD encryption failed
    #[error("encryption failed")]
    EncryptionFailed,

    /// Public key text is not 64 hex characters
    #[error("invalid public key encoding: {0}")]
    InvalidPublicKeyEncoding(String),
}

impl CryptoError {
    /// Returns true for errors caused by a misbehaving or malicious peer.
    #[must_use]
    pub fn is_security(&self) -> bool {
        matches!(
            self,
            Self::InvalidCurvePoint | Self::MalformedCiphertext { .. } | Self::AuthenticationFailed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CryptoError::InvalidKeyLength {
            expected: 32,
            actual: 16,
        };
        assert_eq!(err.to_string(), "invalid key length: expected 32, got 16");

        let err = CryptoError::MalformedCiphertext { len: 3, min: 28 };
        assert!(err.to_string().contains("3 bytes"));
    }

    #[test]
    fn test_security_classification() {
        assert!(CryptoError::AuthenticationFailed.is_security());
        assert!(CryptoError::InvalidCurvePoint.is_security());
        assert!(CryptoError::MalformedCiphertext { len: 0, min: 28 }.is_security());
        assert!(!CryptoError::RandomSource("unavailable".into()).is_security());
        assert!(
            !CryptoError::InvalidKeyLength {
                expected: 32,
                actual: 31
            }
            .is_security()
        );
    }
}
