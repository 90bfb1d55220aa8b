#![deny(unsafe_code)]

//! Webmesh client core: privileged helper daemon, its socket protocol, and
//! the client facade.
//!
//! The daemon owns the single mesh session and brokers interface-altering
//! operations for unprivileged clients over a local socket. A client that is
//! already privileged, with no daemon running, runs the same session
//! in-process instead.

use std::future::Future;
use std::pin::Pin;

/// A type-erased, `Send`-safe, boxed future, the return type for async
/// trait methods that require dynamic dispatch (`dyn Trait`).
///
/// Native `async fn` in traits produces opaque return types that are not
/// object-safe. Traits consumed via `Box<dyn Trait>` or `&dyn Trait` return
/// a concrete `Pin<Box<dyn Future>>` instead.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Compile-time build metadata (version, git hash, profile).
pub mod build_info;
/// Campfire chat room key layout.
pub mod campfire;
/// Background connect/disconnect with observable state.
pub mod controller;
/// Helper daemon runtime and shutdown handling.
pub mod daemon;
/// Client facade over in-process and relay modes.
pub mod facade;
/// Socket transport, server, client, and wire types.
pub mod ipc;
/// Mesh engine traits and the connection factory.
pub mod mesh;
/// User-editable connection preferences.
pub mod preferences;
/// Privilege detection and client mode selection.
pub mod privilege;
/// The single mesh session slot.
pub mod session;

pub use controller::{ConnectionController, ConnectionStatus};
pub use daemon::{Daemon, DaemonOptions};
pub use facade::MeshClient;
pub use ipc::{ClientError, ConnectOptions, InterfaceMetrics};
pub use mesh::{EngineProvider, NodeProcessProvider};
pub use preferences::ConnectPreferences;
pub use privilege::ClientMode;
pub use session::{Session, SessionError};
