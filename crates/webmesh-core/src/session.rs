//! The single mesh session slot.
//!
//! A [`Session`] holds at most one [`MeshConnection`]. Every operation takes
//! the same async lock for its whole duration, including the ready-wait of a
//! connect, so a concurrent disconnect or metrics call observes either the
//! state before the connect or the state after it, never a half-open one.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use webmesh_config::{ConfigError, ProfileConfig};

use crate::ipc::{ConnectOptions, ErrorKind, InterfaceMetrics};
use crate::mesh::{ConnectError, EngineError, EngineOptions, EngineProvider, MeshConnection};

/// Errors from session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("not connected")]
    NotConnected,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("close existing connection: {0}")]
    CloseExisting(#[source] EngineError),

    #[error("close connection: {0}")]
    Close(#[source] EngineError),

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("get interface metrics: {0}")]
    Metrics(#[source] EngineError),
}

impl SessionError {
    /// Wire category for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::NotConnected => ErrorKind::NotConnected,
            SessionError::Config(_) => ErrorKind::Config,
            SessionError::Connect(ConnectError::ReadyTimeout(_)) => ErrorKind::Timeout,
            SessionError::Connect(ConnectError::Cancelled) => ErrorKind::Internal,
            SessionError::Connect(_)
            | SessionError::CloseExisting(_)
            | SessionError::Close(_)
            | SessionError::Metrics(_) => ErrorKind::Engine,
        }
    }
}

/// Owner of the one active mesh connection.
pub struct Session {
    provider: Arc<dyn EngineProvider>,
    slot: Mutex<Option<MeshConnection>>,
}

impl Session {
    pub fn new(provider: Arc<dyn EngineProvider>) -> Self {
        Self {
            provider,
            slot: Mutex::new(None),
        }
    }

    /// Name of the engine provider backing this session.
    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Connect using a profile from `config`, replacing any active connection.
    ///
    /// The profile is resolved before anything is torn down, so a bad profile
    /// leaves the current connection in place. If closing the current
    /// connection fails, it stays in the slot and the new one is not opened.
    /// If opening the new one fails after the old one was closed, the session
    /// ends up disconnected.
    pub async fn connect(
        &self,
        config: &ProfileConfig,
        opts: &ConnectOptions,
        cancel: &CancellationToken,
    ) -> Result<(), SessionError> {
        let mut slot = self.slot.lock().await;

        let profile = config.resolve(&opts.profile)?;
        let engine_options = EngineOptions::build(&profile, opts);

        if let Some(existing) = slot.as_ref() {
            info!(profile = existing.profile(), "replacing active mesh connection");
            existing.close().await.map_err(SessionError::CloseExisting)?;
            *slot = None;
        }

        let conn = crate::mesh::open_connection(
            self.provider.as_ref(),
            engine_options,
            opts.connect_timeout(),
            cancel,
        )
        .await?;
        *slot = Some(conn);
        Ok(())
    }

    /// Close the active connection.
    ///
    /// The handle is dropped only after a successful close.
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        let mut slot = self.slot.lock().await;
        let conn = slot.as_ref().ok_or(SessionError::NotConnected)?;
        conn.close().await.map_err(SessionError::Close)?;
        *slot = None;
        Ok(())
    }

    /// Counters of the active connection's interface.
    pub async fn metrics(&self) -> Result<InterfaceMetrics, SessionError> {
        let slot = self.slot.lock().await;
        let conn = slot.as_ref().ok_or(SessionError::NotConnected)?;
        conn.metrics().await.map_err(SessionError::Metrics)
    }

    /// Whether a connection is currently held. Waits for in-flight operations.
    pub async fn is_connected(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    /// Profile of the active connection, if any.
    pub async fn active_profile(&self) -> Option<String> {
        self.slot
            .lock()
            .await
            .as_ref()
            .map(|c| c.profile().to_string())
    }

    /// Close any active connection. Errors are logged, not returned.
    pub async fn shutdown(&self) {
        let mut slot = self.slot.lock().await;
        if let Some(conn) = slot.take() {
            warn!(profile = conn.profile(), uptime = ?conn.uptime(), "closing mesh connection on shutdown");
            if let Err(e) = conn.close().await {
                error!(error = %e, "error closing mesh connection on shutdown");
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("provider", &self.provider.name())
            .finish_non_exhaustive()
    }
}
