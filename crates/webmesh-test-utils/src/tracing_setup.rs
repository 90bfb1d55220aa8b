//! Tracing initialisation helpers for tests.
//!
//! The subscriber is installed at most once per process, so every test may
//! call [`init_test_tracing`].

use tracing_subscriber::EnvFilter;

/// Install a subscriber writing to the test harness, honouring `RUST_LOG`
/// and defaulting to `info`.
pub fn init_test_tracing() {
    init_test_tracing_with("info");
}

/// Like [`init_test_tracing`] with a different fallback filter, e.g.
/// `"webmesh_core=debug"`.
pub fn init_test_tracing_with(default_filter: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_test_writer()
        .try_init();
}
