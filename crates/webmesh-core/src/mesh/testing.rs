//! In-crate fake engine for unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{EngineError, EngineOptions, EngineProvider, MeshEngine, NetworkInterface};
use crate::BoxFuture;
use crate::ipc::InterfaceMetrics;

#[derive(Debug, Default, Clone)]
pub(crate) struct FakeProvider {
    pub fail_open: bool,
    pub fail_close: bool,
    pub never_ready: bool,
    pub opened: Arc<AtomicUsize>,
    pub closed: Arc<AtomicUsize>,
}

impl FakeProvider {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl EngineProvider for FakeProvider {
    fn name(&self) -> &str {
        "fake"
    }

    fn new_engine(&self, options: EngineOptions) -> Result<Box<dyn MeshEngine>, EngineError> {
        Ok(Box::new(FakeEngine {
            provider: self.clone(),
            device: options.wireguard.interface_name,
        }))
    }
}

struct FakeEngine {
    provider: FakeProvider,
    device: String,
}

impl MeshEngine for FakeEngine {
    fn open(&self) -> BoxFuture<'_, Result<(), EngineError>> {
        Box::pin(async move {
            if self.provider.fail_open {
                return Err(EngineError::Engine("join refused".to_string()));
            }
            self.provider.opened.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn ready(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if self.provider.never_ready {
                std::future::pending::<()>().await;
            }
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), EngineError>> {
        Box::pin(async move {
            if self.provider.fail_close {
                return Err(EngineError::Engine("close failed".to_string()));
            }
            self.provider.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn interface(&self) -> &dyn NetworkInterface {
        self
    }
}

impl NetworkInterface for FakeEngine {
    fn metrics(&self) -> BoxFuture<'_, Result<InterfaceMetrics, EngineError>> {
        Box::pin(async move {
            Ok(InterfaceMetrics {
                device_name: self.device.clone(),
                total_transmit_bytes: 100,
                total_receive_bytes: 200,
            })
        })
    }
}

/// A one-profile config file body pointing at a fake server.
pub(crate) const PROFILE_TOML: &str = r#"
current_context = "home"

[[clusters]]
name = "lab"
server = "mesh.example.com:8443"

[[contexts]]
name = "home"
cluster = "lab"
"#;
