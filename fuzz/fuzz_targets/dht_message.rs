//! Fuzz target for DHT message decoding
//!
//! Tests that the DHT message decoder handles arbitrary input without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use parley_discovery::dht::DhtMessage;

fuzz_target!(|data: &[u8]| {
    if let Ok(message) = DhtMessage::from_bytes(data) {
        // Anything accepted must re-encode
        let _ = message.to_bytes().unwrap();
    }
});
