//! Opening a mesh connection with a bounded ready wait.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{EngineError, EngineOptions, EngineProvider, MeshEngine};
use crate::ipc::InterfaceMetrics;

/// Errors from [`open_connection`].
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("new mesh: {0}")]
    Build(#[source] EngineError),

    #[error("open mesh: {0}")]
    Open(#[source] EngineError),

    #[error("wait for store ready: timed out after {0:?}")]
    ReadyTimeout(Duration),

    #[error("connect cancelled")]
    Cancelled,
}

/// A live, ready mesh connection.
pub struct MeshConnection {
    engine: Box<dyn MeshEngine>,
    profile: String,
    connected_at: Instant,
}

impl std::fmt::Debug for MeshConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshConnection")
            .field("profile", &self.profile)
            .field("uptime", &self.connected_at.elapsed())
            .finish_non_exhaustive()
    }
}

impl MeshConnection {
    /// Profile this connection was opened with.
    pub fn profile(&self) -> &str {
        &self.profile
    }

    /// Time since the engine reported ready.
    pub fn uptime(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Current interface counters.
    pub async fn metrics(&self) -> Result<InterfaceMetrics, EngineError> {
        self.engine.interface().metrics().await
    }

    /// Close the underlying engine.
    ///
    /// The caller decides what happens to the handle afterwards; a failed
    /// close leaves the engine in whatever state it reported.
    pub async fn close(&self) -> Result<(), EngineError> {
        info!(profile = %self.profile, "closing mesh connection");
        self.engine.close().await
    }
}

/// Build, open, and wait for a mesh engine to become ready.
///
/// The open and ready phases together are bounded by `timeout`. When the
/// bound elapses, or `cancel` fires, the engine is closed before returning
/// so no half-open connection is left behind. A failing close on that path
/// is logged and does not replace the original error.
pub async fn open_connection(
    provider: &dyn EngineProvider,
    options: EngineOptions,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<MeshConnection, ConnectError> {
    let profile = options.profile.clone();
    info!(
        profile = %profile,
        provider = provider.name(),
        join = %options.mesh.join_address,
        interface = %options.wireguard.interface_name,
        timeout_secs = timeout.as_secs(),
        "opening mesh connection"
    );

    let engine = provider.new_engine(options).map_err(ConnectError::Build)?;
    let deadline = tokio::time::Instant::now() + timeout;

    let opened = tokio::select! {
        res = engine.open() => res.map_err(ConnectError::Open),
        _ = tokio::time::sleep_until(deadline) => Err(ConnectError::ReadyTimeout(timeout)),
        _ = cancel.cancelled() => Err(ConnectError::Cancelled),
    };
    if let Err(e) = opened {
        if !matches!(e, ConnectError::Open(_)) {
            close_abandoned(engine.as_ref(), &profile).await;
        }
        return Err(e);
    }
    debug!(profile = %profile, "mesh engine open, waiting for ready");

    let ready = tokio::select! {
        _ = engine.ready() => Ok(()),
        _ = tokio::time::sleep_until(deadline) => Err(ConnectError::ReadyTimeout(timeout)),
        _ = cancel.cancelled() => Err(ConnectError::Cancelled),
    };
    if let Err(e) = ready {
        warn!(profile = %profile, error = %e, "mesh connection did not become ready");
        close_abandoned(engine.as_ref(), &profile).await;
        return Err(e);
    }

    info!(profile = %profile, "mesh connection ready");
    Ok(MeshConnection {
        engine,
        profile,
        connected_at: Instant::now(),
    })
}

async fn close_abandoned(engine: &dyn MeshEngine, profile: &str) {
    if let Err(e) = engine.close().await {
        error!(profile = %profile, error = %e, "error closing abandoned mesh engine");
    }
}
