//! Fuzz target for envelope parsing
//!
//! Arbitrary bytes must parse to an error or an envelope that fails to open.

#![no_main]

use libfuzzer_sys::fuzz_target;
use parley_crypto::aead::{AeadKey, Envelope};

fuzz_target!(|data: &[u8]| {
    if let Ok(envelope) = Envelope::from_bytes(data) {
        assert_eq!(envelope.to_bytes(), data);
        let key = AeadKey::new([7u8; 32]);
        assert!(key.open(&envelope).is_err());
    }
});
