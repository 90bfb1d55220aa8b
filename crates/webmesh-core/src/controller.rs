//! Background connection control for interactive front ends.
//!
//! The controller runs connects and disconnects on spawned tasks and
//! publishes what happened through `watch` channels, so a UI thread never
//! blocks on the mesh. While connected it polls interface metrics.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::facade::MeshClient;
use crate::ipc::{ClientError, ConnectOptions, InterfaceMetrics};

/// How often interface counters are refreshed while connected.
pub const METRICS_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Bound on a user-initiated disconnect.
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Observable connection state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting {
        profile: String,
    },
    Connected {
        profile: String,
    },
    Failed {
        message: String,
    },
}

/// Latest interface counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub device_name: String,
    pub total_transmit_bytes: u64,
    pub total_receive_bytes: u64,
}

impl MetricsSnapshot {
    pub fn sent(&self) -> String {
        format_bytes(self.total_transmit_bytes)
    }

    pub fn received(&self) -> String {
        format_bytes(self.total_receive_bytes)
    }
}

impl From<InterfaceMetrics> for MetricsSnapshot {
    fn from(m: InterfaceMetrics) -> Self {
        Self {
            device_name: m.device_name,
            total_transmit_bytes: m.total_transmit_bytes,
            total_receive_bytes: m.total_receive_bytes,
        }
    }
}

/// Human-readable byte count, truncated to whole units.
pub fn format_bytes(n: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    match n {
        n if n < KB => format!("{n} B"),
        n if n < MB => format!("{} KB", n / KB),
        n if n < GB => format!("{} MB", n / MB),
        n => format!("{} GB", n / GB),
    }
}

#[derive(Default)]
struct Tasks {
    generation: u64,
    connect: Option<CancellationToken>,
    poller: Option<CancellationToken>,
}

struct Shared {
    client: Arc<MeshClient>,
    status: watch::Sender<ConnectionStatus>,
    metrics: watch::Sender<Option<MetricsSnapshot>>,
    tasks: Mutex<Tasks>,
}

impl Shared {
    fn tasks(&self) -> std::sync::MutexGuard<'_, Tasks> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stop_poller(&self) {
        if let Some(token) = self.tasks().poller.take() {
            token.cancel();
        }
        self.metrics.send_replace(None);
    }
}

/// Drives a [`MeshClient`] from background tasks.
#[derive(Clone)]
pub struct ConnectionController {
    shared: Arc<Shared>,
}

impl ConnectionController {
    pub fn new(client: Arc<MeshClient>) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        let (metrics, _) = watch::channel(None);
        Self {
            shared: Arc::new(Shared {
                client,
                status,
                metrics,
                tasks: Mutex::new(Tasks::default()),
            }),
        }
    }

    pub fn client(&self) -> &Arc<MeshClient> {
        &self.shared.client
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status.subscribe()
    }

    pub fn subscribe_metrics(&self) -> watch::Receiver<Option<MetricsSnapshot>> {
        self.shared.metrics.subscribe()
    }

    /// Whether a connect task is in flight.
    pub fn is_connecting(&self) -> bool {
        self.shared.tasks().connect.is_some()
    }

    /// Start connecting in the background. A connect already in flight is
    /// cancelled first.
    pub fn start_connect(&self, opts: ConnectOptions) -> JoinHandle<()> {
        let token = CancellationToken::new();
        let generation = {
            let mut tasks = self.shared.tasks();
            if let Some(previous) = tasks.connect.replace(token.clone()) {
                previous.cancel();
            }
            tasks.generation += 1;
            tasks.generation
        };

        let profile = opts.profile.clone();
        self.shared.status.send_replace(ConnectionStatus::Connecting {
            profile: profile.clone(),
        });
        info!(profile = %profile, "connecting to mesh");

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let result = shared.client.connect(&opts, &token).await;

            let current = {
                let mut tasks = shared.tasks();
                let current = tasks.generation == generation;
                if current {
                    tasks.connect = None;
                }
                current
            };
            if !current {
                debug!(profile = %profile, "superseded connect finished");
                return;
            }

            match result {
                Ok(()) => {
                    shared
                        .status
                        .send_replace(ConnectionStatus::Connected { profile });
                    start_poller(&shared);
                }
                Err(e) if token.is_cancelled() || matches!(e, ClientError::Cancelled) => {
                    info!(profile = %profile, "connect cancelled");
                    shared.status.send_replace(ConnectionStatus::Disconnected);
                }
                Err(e) => {
                    error!(profile = %profile, error = %e, "error connecting to mesh");
                    shared.status.send_replace(ConnectionStatus::Failed {
                        message: e.to_string(),
                    });
                }
            }
        })
    }

    /// Cancel an in-flight connect. Returns whether there was one.
    pub fn cancel_connect(&self) -> bool {
        match self.shared.tasks().connect.take() {
            Some(token) => {
                info!("cancelling in-progress connection");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Disconnect in the background.
    ///
    /// An in-flight connect is cancelled instead and `None` is returned.
    /// "Not connected" from the backend is treated as success.
    pub fn start_disconnect(&self) -> Option<JoinHandle<()>> {
        self.shared.stop_poller();
        if self.cancel_connect() {
            return None;
        }

        let shared = Arc::clone(&self.shared);
        Some(tokio::spawn(async move {
            info!("disconnecting from mesh");
            let result =
                tokio::time::timeout(DISCONNECT_TIMEOUT, shared.client.disconnect()).await;
            let status = match result {
                Ok(Ok(())) => ConnectionStatus::Disconnected,
                Ok(Err(e)) if e.is_not_connected() => ConnectionStatus::Disconnected,
                Ok(Err(e)) => {
                    error!(error = %e, "error disconnecting from mesh");
                    ConnectionStatus::Failed {
                        message: format!("error disconnecting from mesh: {e}"),
                    }
                }
                Err(_) => {
                    error!(timeout = ?DISCONNECT_TIMEOUT, "disconnect timed out");
                    ConnectionStatus::Failed {
                        message: format!("disconnect timed out after {DISCONNECT_TIMEOUT:?}"),
                    }
                }
            };
            shared.status.send_replace(status);
        }))
    }

    /// Stop all background work and run the client's close-on-exit hook.
    pub async fn shutdown(&self) {
        self.cancel_connect();
        self.shared.stop_poller();
        self.shared.client.shutdown().await;
        self.shared.status.send_replace(ConnectionStatus::Disconnected);
    }
}

fn start_poller(shared: &Arc<Shared>) {
    let token = CancellationToken::new();
    if let Some(previous) = shared.tasks().poller.replace(token.clone()) {
        previous.cancel();
    }

    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(METRICS_POLL_INTERVAL);
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = ticker.tick() => {}
            }
            match shared.client.interface_metrics().await {
                Ok(metrics) => {
                    if token.is_cancelled() {
                        return;
                    }
                    shared.metrics.send_replace(Some(metrics.into()));
                }
                Err(e) if e.is_not_connected() => {
                    warn!("connection went away, stopping metrics poller");
                    if !token.is_cancelled() {
                        shared.metrics.send_replace(None);
                        shared.status.send_replace(ConnectionStatus::Disconnected);
                    }
                    return;
                }
                Err(e) => error!(error = %e, "error getting interface metrics"),
            }
        }
    });
}

impl std::fmt::Debug for ConnectionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionController")
            .field("status", &*self.shared.status.borrow())
            .finish_non_exhaustive()
    }
}
