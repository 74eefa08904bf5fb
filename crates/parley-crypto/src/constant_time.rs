//! Constant-time helpers.
//!
//! Comparisons on key material and DH outputs go through `subtle` so timing
//! does not depend on where two values differ.

use subtle::ConstantTimeEq;

/// Constant-time comparison of byte slices.
///
/// Returns `true` if slices are equal, `false` otherwise.
/// Execution time depends only on slice length, not content.
#[must_use]
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.ct_eq(b).into()
}

/// Constant-time check that every byte is zero.
#[must_use]
#[inline(never)]
pub fn ct_is_zero(bytes: &[u8]) -> bool {
    let acc = bytes.iter().fold(0u8, |acc, b| acc | b);
    acc.ct_eq(&0u8).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ct_eq() {
        assert!(ct_eq(b"parley", b"parley"));
        assert!(!ct_eq(b"parley", b"parlex"));
        assert!(!ct_eq(b"short", b"longer"));
        assert!(ct_eq(b"", b""));
    }

    #[test]
    fn test_ct_is_zero() {
        assert!(ct_is_zero(&[0u8; 32]));
        assert!(ct_is_zero(&[]));

        let mut bytes = [0u8; 32];
        bytes[31] = 1;
        assert!(!ct_is_zero(&bytes));
    }
}
