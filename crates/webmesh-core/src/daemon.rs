//! Helper daemon process: bind the socket, serve, and shut down cleanly.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::ipc::server::{self, DEFAULT_SHUTDOWN_GRACE, DaemonState, ServerError};
use crate::ipc::socket::{self, SocketError};
use crate::mesh::EngineProvider;
use crate::session::Session;

/// Shutdown signal sent via broadcast channel.
#[derive(Debug, Clone)]
pub struct ShutdownSignal;

/// Daemon settings taken from the command line.
#[derive(Debug, Clone)]
pub struct DaemonOptions {
    pub socket_path: PathBuf,
    /// Leave the socket world-accessible.
    pub insecure: bool,
    pub shutdown_grace: Duration,
}

impl Default for DaemonOptions {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(socket::DEFAULT_SOCKET_PATH),
            insecure: false,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

/// The privileged helper daemon.
pub struct Daemon {
    options: DaemonOptions,
    session: Arc<Session>,
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
    _shutdown_rx: broadcast::Receiver<ShutdownSignal>,
}

impl Daemon {
    pub fn new(options: DaemonOptions, provider: Arc<dyn EngineProvider>) -> Self {
        let (shutdown_tx, _shutdown_rx) = broadcast::channel(1);
        Self {
            options,
            session: Arc::new(Session::new(provider)),
            shutdown_tx,
            _shutdown_rx,
        }
    }

    /// Serve until SIGINT, SIGTERM, or [`shutdown`](Self::shutdown).
    pub async fn run(&self) -> Result<(), DaemonError> {
        let path = &self.options.socket_path;
        info!(
            socket = %path.display(),
            insecure = self.options.insecure,
            provider = self.session.provider_name(),
            version = %crate::build_info::version_string(),
            "webmesh daemon starting"
        );
        if self.options.insecure {
            warn!("insecure mode: the daemon socket is accessible to every local user");
        }

        let listener = socket::listen(path, self.options.insecure)?;
        let state = Arc::new(DaemonState::new(Arc::clone(&self.session)));

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let shutdown_tx = self.shutdown_tx.clone();
        let stop = async move {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping daemon");
                }
                _ = tokio::signal::ctrl_c() => {
                    warn!("Ctrl-C received, initiating graceful shutdown");
                    let _ = shutdown_tx.send(ShutdownSignal);
                }
                _ = terminate() => {
                    warn!("SIGTERM received, initiating graceful shutdown");
                    let _ = shutdown_tx.send(ShutdownSignal);
                }
            }
        };

        server::serve(listener, path, state, stop, self.options.shutdown_grace).await?;
        info!("Daemon stopped");
        Ok(())
    }

    /// Request a graceful shutdown of the daemon.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(ShutdownSignal);
    }

    pub fn socket_path(&self) -> &Path {
        &self.options.socket_path
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sig) => {
            sig.recv().await;
        }
        Err(e) => {
            warn!(error = %e, "failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}

/// Errors from the daemon runtime.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("listen: {0}")]
    Listen(#[from] SocketError),

    #[error(transparent)]
    Serve(ServerError),

    #[error("shutdown timed out: in-flight requests still running after {0:?}")]
    ShutdownTimeout(Duration),
}

impl From<ServerError> for DaemonError {
    fn from(e: ServerError) -> Self {
        match e {
            ServerError::ShutdownTimeout(grace) => DaemonError::ShutdownTimeout(grace),
            other => DaemonError::Serve(other),
        }
    }
}
