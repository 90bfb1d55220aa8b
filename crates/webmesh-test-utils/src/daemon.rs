//! Daemon test helpers.
//!
//! [`TestDaemon`] runs a real [`Daemon`] on a socket inside a temp
//! directory, backed by whatever engine provider the test supplies.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;
use tokio::task::JoinHandle;
use webmesh_core::daemon::DaemonError;
use webmesh_core::ipc::DaemonClient;
use webmesh_core::mesh::EngineProvider;
use webmesh_core::{Daemon, DaemonOptions};

/// A running daemon with an owned temp directory for its socket.
///
/// The directory is deleted when this value is dropped, even on panic.
pub struct TestDaemon {
    daemon: Arc<Daemon>,
    handle: Mutex<Option<JoinHandle<Result<(), DaemonError>>>>,
    socket_path: PathBuf,
    _temp_dir: TempDir,
}

impl TestDaemon {
    /// Start a daemon and wait until its socket is accepting.
    pub async fn start(provider: Arc<dyn EngineProvider>) -> Self {
        Self::start_with_grace(provider, Duration::from_secs(5)).await
    }

    pub async fn start_with_grace(provider: Arc<dyn EngineProvider>, grace: Duration) -> Self {
        crate::tracing_setup::init_test_tracing();
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let socket_path = temp_dir.path().join("run").join("webmesh.sock");
        let daemon = Arc::new(Daemon::new(
            DaemonOptions {
                socket_path: socket_path.clone(),
                insecure: false,
                shutdown_grace: grace,
            },
            provider,
        ));

        let runner = Arc::clone(&daemon);
        let handle = tokio::spawn(async move { runner.run().await });

        for _ in 0..100 {
            if tokio::net::UnixStream::connect(&socket_path).await.is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        Self {
            daemon,
            handle: Mutex::new(Some(handle)),
            socket_path,
            _temp_dir: temp_dir,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn client(&self) -> DaemonClient {
        DaemonClient::new(&self.socket_path)
    }

    pub fn daemon(&self) -> &Arc<Daemon> {
        &self.daemon
    }

    /// Request shutdown and wait for the daemon to exit.
    ///
    /// The temp directory survives until this value is dropped, so tests can
    /// check what the daemon left behind.
    pub async fn stop(&self) -> Result<(), DaemonError> {
        self.daemon.shutdown();
        let handle = self
            .handle
            .lock()
            .expect("daemon handle poisoned")
            .take()
            .expect("daemon already stopped");
        handle.await.expect("daemon task panicked")
    }
}
