//! Fuzz target for preference duration strings such as "1m30s".
//!
//! Run with: cargo +nightly fuzz run fuzz_duration_parser

#![no_main]

use libfuzzer_sys::fuzz_target;
use webmesh_core::preferences::parse_duration;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = parse_duration(s);
    }
});
