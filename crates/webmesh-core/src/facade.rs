//! Client facade: one API whether the mesh runs in-process or in the daemon.
//!
//! [`MeshClient`] picks its [`ClientMode`] once at construction. In relay
//! mode each call becomes one request to the daemon socket; in in-process
//! mode the client owns a [`Session`] with the same invariants the daemon
//! enforces. A single lock serializes every operation in both modes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use webmesh_config::ProfileConfig;

use crate::ipc::{ClientError, ConnectOptions, ConnectRequest, DaemonClient, InterfaceMetrics};
use crate::mesh::EngineProvider;
use crate::privilege::{ClientMode, PrivilegeCheck, platform_privilege_check};
use crate::session::Session;

enum Backend {
    InProcess(Session),
    Relay(DaemonClient),
}

#[derive(Default)]
struct ClientState {
    config_path: Option<PathBuf>,
    config: Option<ProfileConfig>,
}

/// Entry point for user-facing code.
pub struct MeshClient {
    backend: Backend,
    state: Mutex<ClientState>,
    connected: AtomicBool,
}

impl MeshClient {
    /// Build a client for this process, selecting the mode from the
    /// platform privilege check and the presence of `socket_path`.
    pub fn new(provider: Arc<dyn EngineProvider>, socket_path: impl Into<PathBuf>) -> Self {
        Self::with_privilege_check(provider, socket_path, platform_privilege_check().as_ref())
    }

    pub fn with_privilege_check(
        provider: Arc<dyn EngineProvider>,
        socket_path: impl Into<PathBuf>,
        check: &dyn PrivilegeCheck,
    ) -> Self {
        let socket_path = socket_path.into();
        match ClientMode::select(check, &socket_path) {
            ClientMode::InProcess => Self::in_process(provider),
            ClientMode::Relay => Self::relay(socket_path),
        }
    }

    /// A client that runs the mesh itself.
    pub fn in_process(provider: Arc<dyn EngineProvider>) -> Self {
        info!(provider = provider.name(), "running mesh in-process");
        Self::from_backend(Backend::InProcess(Session::new(provider)))
    }

    /// A client that forwards every call to the daemon at `socket_path`.
    pub fn relay(socket_path: impl Into<PathBuf>) -> Self {
        let client = DaemonClient::new(socket_path);
        info!(socket = %client.socket_path().display(), "relaying mesh calls to daemon");
        Self::from_backend(Backend::Relay(client))
    }

    fn from_backend(backend: Backend) -> Self {
        Self {
            backend,
            state: Mutex::new(ClientState::default()),
            connected: AtomicBool::new(false),
        }
    }

    pub fn mode(&self) -> ClientMode {
        match self.backend {
            Backend::InProcess(_) => ClientMode::InProcess,
            Backend::Relay(_) => ClientMode::Relay,
        }
    }

    /// Load the profile file at `path`.
    ///
    /// The path is remembered even when loading fails, and a failed load
    /// clears any previously loaded config.
    pub async fn load_config(&self, path: impl AsRef<Path>) -> Result<(), ClientError> {
        let path = path.as_ref();
        let mut state = self.state.lock().await;
        state.config_path = Some(path.to_path_buf());
        state.config = None;
        let config = ProfileConfig::load(path).await?;
        debug!(path = %path.display(), profiles = config.contexts.len(), "loaded profile config");
        state.config = Some(config);
        Ok(())
    }

    /// Write the loaded config to `path`. Does nothing when none is loaded.
    pub async fn save_config(&self, path: impl AsRef<Path>) -> Result<(), ClientError> {
        let state = self.state.lock().await;
        match &state.config {
            Some(config) => Ok(config.write_to(path.as_ref()).await?),
            None => Ok(()),
        }
    }

    /// A copy of the loaded config, if any.
    pub async fn config(&self) -> Option<ProfileConfig> {
        self.state.lock().await.config.clone()
    }

    /// Replace the in-memory config without touching disk.
    pub async fn set_config(&self, config: ProfileConfig) {
        self.state.lock().await.config = Some(config);
    }

    /// Whether the last operation left a connection up.
    pub async fn connected(&self) -> bool {
        let _state = self.state.lock().await;
        self.connected.load(Ordering::SeqCst)
    }

    /// Connect with `opts`, replacing any active connection.
    ///
    /// `cancel` aborts the attempt: in-process it aborts the engine open or
    /// ready-wait; in relay mode it abandons the request.
    pub async fn connect(
        &self,
        opts: &ConnectOptions,
        cancel: &CancellationToken,
    ) -> Result<(), ClientError> {
        let state = self.state.lock().await;
        let result = match &self.backend {
            Backend::InProcess(session) => {
                let config = state.config.as_ref().ok_or(ClientError::NoConfig)?;
                let result = session.connect(config, opts, cancel).await;
                self.connected
                    .store(session.is_connected().await, Ordering::SeqCst);
                result.map_err(ClientError::from)
            }
            Backend::Relay(client) => {
                let config_path = state.config_path.as_ref().ok_or(ClientError::NoConfig)?;
                let req = ConnectRequest {
                    config_file: config_path.display().to_string(),
                    options: opts.clone(),
                };
                let result = tokio::select! {
                    res = client.connect(&req) => res,
                    _ = cancel.cancelled() => Err(ClientError::Cancelled),
                };
                self.connected.store(result.is_ok(), Ordering::SeqCst);
                result
            }
        };
        if result.is_ok() {
            info!(profile = %opts.profile, mode = ?self.mode(), "connected to mesh");
        }
        result
    }

    /// Close the active connection.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        let _state = self.state.lock().await;
        let result = match &self.backend {
            Backend::InProcess(session) => session.disconnect().await.map_err(ClientError::from),
            Backend::Relay(client) => client.disconnect().await,
        };
        match &result {
            Ok(()) => self.connected.store(false, Ordering::SeqCst),
            Err(e) if e.is_not_connected() => self.connected.store(false, Ordering::SeqCst),
            Err(_) => {}
        }
        result
    }

    /// Counters of the mesh interface.
    pub async fn interface_metrics(&self) -> Result<InterfaceMetrics, ClientError> {
        let _state = self.state.lock().await;
        match &self.backend {
            Backend::InProcess(session) => session.metrics().await.map_err(ClientError::from),
            Backend::Relay(client) => client.interface_metrics().await,
        }
    }

    /// Close-on-exit hook. In-process this tears down any active
    /// connection; in relay mode the daemon keeps its session.
    pub async fn shutdown(&self) {
        let _state = self.state.lock().await;
        if let Backend::InProcess(session) = &self.backend {
            session.shutdown().await;
            self.connected.store(false, Ordering::SeqCst);
        }
    }
}

impl std::fmt::Debug for MeshClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshClient")
            .field("mode", &self.mode())
            .field("connected", &self.connected.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}
