//! Fuzz target for AEAD sealing and key agreement
//!
//! Tests that seal/open and X25519 handle arbitrary keys and payloads.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use parley_crypto::aead::{AeadKey, Nonce};
use parley_crypto::x25519::{PrivateKey, PublicKey};

#[derive(Debug, Arbitrary)]
struct CryptoInput {
    key: [u8; 32],
    nonce: [u8; 12],
    plaintext: Vec<u8>,
    private: [u8; 32],
    peer: [u8; 32],
}

fuzz_target!(|input: CryptoInput| {
    let key = AeadKey::new(input.key);
    let nonce = Nonce::from_bytes(input.nonce);

    if let Ok(envelope) = key.seal_with_nonce(nonce, &input.plaintext) {
        assert_eq!(key.open(&envelope).unwrap(), input.plaintext);
    }

    // Low-order peer keys are refused, never turned into an all-zero secret
    let private = PrivateKey::from_bytes(input.private);
    if let Ok(shared) = private.exchange(&PublicKey::from_bytes(input.peer)) {
        assert!(shared.as_bytes().iter().any(|b| *b != 0));
    }
});
