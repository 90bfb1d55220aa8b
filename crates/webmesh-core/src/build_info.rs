//! Build-time metadata embedded by the build script.

use chrono::{DateTime, Utc};

/// Short git commit hash, or `unknown` outside a checkout.
pub const GIT_HASH: &str = env!("WEBMESH_GIT_HASH");

/// Build time as Unix epoch seconds.
pub const BUILD_TIMESTAMP: &str = env!("WEBMESH_BUILD_TIMESTAMP");

/// Cargo profile (`debug` or `release`).
pub const BUILD_PROFILE: &str = env!("WEBMESH_BUILD_PROFILE");

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// `"0.1.0 (abc1234, debug)"`
pub fn version_string() -> String {
    format!("{VERSION} ({GIT_HASH}, {BUILD_PROFILE})")
}

/// When this binary was built, if the build script could tell.
pub fn built_at() -> Option<DateTime<Utc>> {
    BUILD_TIMESTAMP
        .parse::<i64>()
        .ok()
        .filter(|secs| *secs > 0)
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}

/// Multi-line version block for `--version`.
pub fn long_version() -> String {
    let built = built_at()
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "unknown".to_string());
    format!("{VERSION}\ncommit: {GIT_HASH}\nprofile: {BUILD_PROFILE}\nbuilt: {built}")
}
