//! Mesh engine abstraction and connection factory.
//!
//! The mesh engine itself (Raft, WireGuard, gRPC mesh protocol) lives
//! outside this crate. It is reached through three object-safe traits:
//!
//! - [`EngineProvider`] builds an engine from [`EngineOptions`].
//! - [`MeshEngine`] is one engine instance: open, ready, close.
//! - [`NetworkInterface`] reports counters of the engine's interface.
//!
//! [`open_connection`] drives an engine from construction to ready under a
//! bounded timeout and hands back a [`MeshConnection`].

pub mod connection;
pub mod node;
pub mod options;
#[cfg(test)]
pub(crate) mod testing;

use crate::BoxFuture;
use crate::ipc::InterfaceMetrics;

pub use connection::{ConnectError, MeshConnection, open_connection};
pub use node::NodeProcessProvider;
pub use options::{Credentials, EngineOptions, TlsPolicy};

/// Errors reported by a mesh engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid engine options: {0}")]
    Options(String),

    #[error("{0}")]
    Engine(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Builds mesh engines. One provider serves every connect attempt.
pub trait EngineProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Construct a closed engine. Nothing is started until [`MeshEngine::open`].
    fn new_engine(&self, options: EngineOptions) -> Result<Box<dyn MeshEngine>, EngineError>;
}

/// One mesh engine instance.
pub trait MeshEngine: Send + Sync {
    /// Start the engine and begin joining the mesh.
    fn open(&self) -> BoxFuture<'_, Result<(), EngineError>>;

    /// Resolves once the engine's store is ready to serve. Never errors;
    /// callers bound it with a timeout.
    fn ready(&self) -> BoxFuture<'_, ()>;

    /// Leave the mesh and release the interface.
    fn close(&self) -> BoxFuture<'_, Result<(), EngineError>>;

    /// The engine's WireGuard interface.
    fn interface(&self) -> &dyn NetworkInterface;
}

/// The network interface owned by an engine.
pub trait NetworkInterface: Send + Sync {
    /// Device name and cumulative transmit/receive byte counters.
    fn metrics(&self) -> BoxFuture<'_, Result<InterfaceMetrics, EngineError>>;
}
