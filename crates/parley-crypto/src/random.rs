//! Secure random number generation.
//!
//! All randomness comes from the operating system CSPRNG. Failures are
//! surfaced as [`CryptoError::RandomSource`] instead of panicking so a node
//! can refuse to start when entropy is unavailable.

use crate::CryptoError;
use rand_core::{OsRng, RngCore};

/// Fill a buffer with random bytes from the OS CSPRNG.
///
/// # Errors
///
/// Returns [`CryptoError::RandomSource`] if the underlying OS CSPRNG fails.
pub fn fill_random(buf: &mut [u8]) -> Result<(), CryptoError> {
    OsRng
        .try_fill_bytes(buf)
        .map_err(|e| CryptoError::RandomSource(e.to_string()))
}

/// Generate a random 32-byte array.
///
/// # Errors
///
/// Returns [`CryptoError::RandomSource`] if the underlying OS CSPRNG fails.
pub fn random_32() -> Result<[u8; 32], CryptoError> {
    let mut buf = [0u8; 32];
    fill_random(&mut buf)?;
    Ok(buf)
}

/// Generate a random 12-byte array (AES-GCM nonce width).
///
/// # Errors
///
/// Returns [`CryptoError::RandomSource`] if the underlying OS CSPRNG fails.
pub fn random_12() -> Result<[u8; 12], CryptoError> {
    let mut buf = [0u8; 12];
    fill_random(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_32_distinct() {
        let a = random_32().unwrap();
        let b = random_32().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_fill_random_empty() {
        let mut buf = [];
        fill_random(&mut buf).unwrap();
    }
}
