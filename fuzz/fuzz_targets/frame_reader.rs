//! Fuzz target for the length-prefixed frame reader
//!
//! The reader must never return a payload past the limit.

#![no_main]

use libfuzzer_sys::fuzz_target;
use parley_transport::read_frame;

const MAX_FRAME: usize = 4096;

fuzz_target!(|data: &[u8]| {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();

    let mut reader = data;
    runtime.block_on(async {
        while let Ok(Some(frame)) = read_frame(&mut reader, MAX_FRAME).await {
            assert!(frame.len() <= MAX_FRAME);
        }
    });
});
