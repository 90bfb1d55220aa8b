//! Fuzz target for the daemon's request and error body decoding.
//!
//! Run with: cargo +nightly fuzz run fuzz_connect_request

#![no_main]

use libfuzzer_sys::fuzz_target;
use webmesh_core::ipc::{ConnectRequest, ErrorResponse};

fuzz_target!(|data: &[u8]| {
    if let Ok(req) = serde_json::from_slice::<ConnectRequest>(data) {
        let timeout = req.options.connect_timeout();
        assert!(!timeout.is_zero());
    }
    if let Ok(resp) = serde_json::from_slice::<ErrorResponse>(data) {
        let _ = resp.is_not_connected();
    }
});
