//! Fuzz target for the profile file parser.
//!
//! Run with: cargo +nightly fuzz run fuzz_profile_parser
//!
//! Parses arbitrary input as a profile file, then resolves every profile it
//! names so the lookup path is exercised on whatever survived parsing.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(config) = webmesh_config::ProfileConfig::parse(s) else {
        return;
    };
    let _ = config.resolve("");
    for name in config.profile_names() {
        let _ = config.resolve(&name);
    }
});
