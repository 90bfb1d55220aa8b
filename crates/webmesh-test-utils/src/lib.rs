#![deny(unsafe_code)]

//! Shared test utilities for the webmesh workspace.
//!
//! Provides a scriptable mesh engine, profile file builders, a throwaway
//! daemon, and tracing helpers so individual crate tests stay concise.
//!
//! Add this crate as a `[dev-dependency]` in any workspace member:
//!
//! ```toml
//! [dev-dependencies]
//! webmesh-test-utils = { workspace = true }
//! ```

#[cfg(unix)]
pub mod daemon;
pub mod engine;
pub mod profile;
pub mod tracing_setup;

#[cfg(unix)]
pub use daemon::TestDaemon;
pub use engine::{EngineEvent, StubEngineProvider};
pub use profile::{TestProfile, TestProfileBuilder};
