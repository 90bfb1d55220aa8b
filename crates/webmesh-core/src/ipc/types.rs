//! Shared request/response types for the helper daemon protocol.
//!
//! These types are serialized as JSON over the local socket. Field names
//! are part of the wire contract with older clients and daemons and must
//! not change.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Connect timeout used when [`ConnectOptions::connect_timeout`] is not positive.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Message carried by every "not connected" error.
pub const NOT_CONNECTED_MESSAGE: &str = "not connected";

/// Everything needed to establish one mesh connection.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectOptions {
    /// Profile (context) name; empty selects the file's current context.
    #[serde(default)]
    pub profile: String,
    /// Name for the WireGuard interface.
    #[serde(default)]
    pub interface_name: String,
    /// Force a userspace TUN device instead of a kernel interface.
    #[serde(default, rename = "forceTUN")]
    pub force_tun: bool,
    /// WireGuard listen port.
    #[serde(default)]
    pub listen_port: u16,
    /// Raft transport port.
    #[serde(default)]
    pub raft_port: u16,
    /// gRPC control-plane port.
    #[serde(default)]
    pub grpc_port: u16,
    #[serde(default, rename = "noIPv4")]
    pub no_ipv4: bool,
    #[serde(default, rename = "noIPv6")]
    pub no_ipv6: bool,
    /// Start a local MeshDNS server.
    #[serde(default, rename = "localDNS")]
    pub local_dns: bool,
    #[serde(default, rename = "localDNSPort")]
    pub local_dns_port: u16,
    /// Connect timeout in seconds. Zero or negative means 30 seconds.
    #[serde(default)]
    pub connect_timeout: i64,
}

impl ConnectOptions {
    /// The effective bound on the open + ready phase.
    pub fn connect_timeout(&self) -> Duration {
        match u64::try_from(self.connect_timeout) {
            Ok(secs) if secs > 0 => Duration::from_secs(secs),
            _ => DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Body of `POST /connect`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    /// Profile file the daemon loads on the caller's behalf.
    pub config_file: String,
    #[serde(default)]
    pub options: ConnectOptions,
}

/// Generic success acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

impl OkResponse {
    pub const fn ok() -> Self {
        Self { ok: true }
    }
}

/// Current counters of the mesh network interface.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceMetrics {
    pub device_name: String,
    pub total_transmit_bytes: u64,
    pub total_receive_bytes: u64,
}

/// Closed set of error categories carried next to the message.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No mesh connection is active.
    NotConnected,
    /// The profile file could not be loaded or resolved.
    Config,
    /// The mesh engine failed to open, close, or report.
    Engine,
    /// The engine did not become ready in time.
    Timeout,
    /// The request itself was malformed.
    BadRequest,
    /// Sent by daemons that predate error kinds, or for anything else.
    #[default]
    #[serde(other)]
    Internal,
}

/// Error body of every non-200 response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
}

impl ErrorResponse {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: Some(kind),
        }
    }

    pub fn not_connected() -> Self {
        Self::new(ErrorKind::NotConnected, NOT_CONNECTED_MESSAGE)
    }

    /// Whether this error means "no active connection".
    ///
    /// Bodies without a `kind` come from older daemons and are matched on
    /// the fixed message text instead.
    pub fn is_not_connected(&self) -> bool {
        match self.kind {
            Some(kind) => kind == ErrorKind::NotConnected,
            None => self.message == NOT_CONNECTED_MESSAGE,
        }
    }
}
