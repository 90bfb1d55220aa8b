//! A scriptable mesh engine that records what happens to it.
//!
//! Every engine built by a [`StubEngineProvider`] gets a sequential id, and
//! every build, open, ready, and close is appended to a shared event log so
//! tests can assert on ordering as well as counts.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use webmesh_core::BoxFuture;
use webmesh_core::ipc::InterfaceMetrics;
use webmesh_core::mesh::{EngineError, EngineOptions, EngineProvider, MeshEngine, NetworkInterface};

/// One recorded engine lifecycle step, tagged with the engine id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    Built(usize),
    Opened(usize),
    Ready(usize),
    Closed(usize),
}

#[derive(Default)]
struct Script {
    events: Mutex<Vec<EngineEvent>>,
    options: Mutex<Vec<EngineOptions>>,
    next_id: AtomicUsize,
    ready_delay: Mutex<Option<Duration>>,
    never_ready: AtomicBool,
    fail_open: AtomicBool,
    fail_close: AtomicBool,
    hang_close: AtomicBool,
    close_calls: AtomicUsize,
}

impl Script {
    fn record(&self, event: EngineEvent) {
        self.events.lock().expect("event log poisoned").push(event);
    }
}

/// Provider whose engines follow a script set by the test.
#[derive(Clone, Default)]
pub struct StubEngineProvider {
    script: Arc<Script>,
}

impl StubEngineProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engines become ready `delay` after being asked.
    pub fn with_ready_delay(self, delay: Duration) -> Self {
        *self.script.ready_delay.lock().expect("script poisoned") = Some(delay);
        self
    }

    /// Engines never become ready.
    pub fn never_ready(self) -> Self {
        self.script.never_ready.store(true, Ordering::SeqCst);
        self
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.script.fail_open.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_close(&self, fail: bool) {
        self.script.fail_close.store(fail, Ordering::SeqCst);
    }

    /// Closes never resolve, so whoever awaits one stays in flight.
    pub fn set_hang_close(&self, hang: bool) {
        self.script.hang_close.store(hang, Ordering::SeqCst);
    }

    pub fn set_never_ready(&self, never: bool) {
        self.script.never_ready.store(never, Ordering::SeqCst);
    }

    /// All events so far, in order.
    pub fn events(&self) -> Vec<EngineEvent> {
        self.script.events.lock().expect("event log poisoned").clone()
    }

    /// Options each engine was built with, in build order.
    pub fn built_options(&self) -> Vec<EngineOptions> {
        self.script.options.lock().expect("script poisoned").clone()
    }

    /// Close attempts so far, including failed and hanging ones.
    pub fn close_calls(&self) -> usize {
        self.script.close_calls.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> usize {
        self.count(|e| matches!(e, EngineEvent::Opened(_)))
    }

    pub fn closed(&self) -> usize {
        self.count(|e| matches!(e, EngineEvent::Closed(_)))
    }

    /// Engines opened and not yet successfully closed.
    pub fn live(&self) -> usize {
        self.opened() - self.closed()
    }

    fn count(&self, pred: impl Fn(&EngineEvent) -> bool) -> usize {
        self.events().iter().filter(|e| pred(e)).count()
    }
}

impl EngineProvider for StubEngineProvider {
    fn name(&self) -> &str {
        "stub"
    }

    fn new_engine(&self, options: EngineOptions) -> Result<Box<dyn MeshEngine>, EngineError> {
        let id = self.script.next_id.fetch_add(1, Ordering::SeqCst);
        self.script.record(EngineEvent::Built(id));
        let device = options.wireguard.interface_name.clone();
        self.script
            .options
            .lock()
            .expect("script poisoned")
            .push(options);
        Ok(Box::new(StubEngine {
            id,
            device,
            script: Arc::clone(&self.script),
        }))
    }
}

struct StubEngine {
    id: usize,
    device: String,
    script: Arc<Script>,
}

impl MeshEngine for StubEngine {
    fn open(&self) -> BoxFuture<'_, Result<(), EngineError>> {
        Box::pin(async move {
            if self.script.fail_open.load(Ordering::SeqCst) {
                return Err(EngineError::Engine("stub open failure".to_string()));
            }
            self.script.record(EngineEvent::Opened(self.id));
            Ok(())
        })
    }

    fn ready(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if self.script.never_ready.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            let delay = *self.script.ready_delay.lock().expect("script poisoned");
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.script.record(EngineEvent::Ready(self.id));
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<(), EngineError>> {
        Box::pin(async move {
            self.script.close_calls.fetch_add(1, Ordering::SeqCst);
            if self.script.hang_close.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            if self.script.fail_close.load(Ordering::SeqCst) {
                return Err(EngineError::Engine("stub close failure".to_string()));
            }
            self.script.record(EngineEvent::Closed(self.id));
            Ok(())
        })
    }

    fn interface(&self) -> &dyn NetworkInterface {
        self
    }
}

impl NetworkInterface for StubEngine {
    fn metrics(&self) -> BoxFuture<'_, Result<InterfaceMetrics, EngineError>> {
        Box::pin(async move {
            Ok(InterfaceMetrics {
                device_name: self.device.clone(),
                total_transmit_bytes: 1024 * (self.id as u64 + 1),
                total_receive_bytes: 2048 * (self.id as u64 + 1),
            })
        })
    }
}
