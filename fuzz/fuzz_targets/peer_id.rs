//! Fuzz test for peer ID and public key parsing
//!
//! Tests that arbitrary text doesn't cause panics when parsed as identifiers.

#![no_main]

use libfuzzer_sys::fuzz_target;
use parley_crypto::x25519::PublicKey;
use parley_discovery::NodeId;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(id) = text.parse::<NodeId>() {
        assert_eq!(id.to_hex().parse::<NodeId>().unwrap(), id);
    }

    if let Ok(key) = PublicKey::from_hex(text) {
        let id = NodeId::from_public_key(key.as_bytes());
        assert!(id.matches_public_key(key.as_bytes()));
    }
});
