//! Daemon IPC: HTTP/JSON over a local socket.
//!
//! The privileged daemon owns the mesh session and exposes it over a Unix
//! socket (a named pipe on Windows). Unprivileged clients relay their
//! connect, disconnect, and metrics calls through it.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐       local socket       ┌──────────────┐
//! │ MeshClient   │─────────────────────────▶│ Daemon server│
//! │ (relay mode) │  HTTP/1.1 + JSON         │ (axum)       │
//! └──────────────┘                          └──────┬───────┘
//!                                                  │
//!                                           ┌──────▼───────┐
//!                                           │   Session    │
//!                                           │ (one slot)   │
//!                                           └──────────────┘
//! ```

pub mod client;
pub mod server;
pub mod socket;
pub mod types;

pub use client::{ClientError, DaemonClient};
pub use server::{DaemonState, ServerError};
pub use socket::{DEFAULT_SOCKET_PATH, SocketError};
pub use types::*;
