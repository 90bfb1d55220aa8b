//! Relay client: one HTTP/1.1 request per call over the daemon socket.
//!
//! Uses `hyper` directly on top of the local stream so the same code runs
//! over a Unix socket or a Windows named pipe.

use std::path::{Path, PathBuf};
use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::{ACCEPT, CONTENT_TYPE, HOST};
use hyper::{Method, StatusCode};
use hyper_util::rt::TokioIo;
use tracing::{debug, warn};

use webmesh_config::ConfigError;

use super::socket;
use super::types::*;
use crate::session::SessionError;

/// Bound on establishing the socket connection.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

const JSON: &str = "application/json";

/// Errors surfaced by the client facade and the relay client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("not connected")]
    NotConnected,

    #[error("{message}")]
    Daemon { kind: ErrorKind, message: String },

    #[error("dial daemon socket {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("dial daemon socket {path}: timed out after {timeout:?}")]
    DialTimeout { path: PathBuf, timeout: Duration },

    #[error("request failed: {0}")]
    Request(String),

    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("no configuration loaded")]
    NoConfig,

    #[error("connect cancelled")]
    Cancelled,

    #[error(transparent)]
    Session(SessionError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ClientError {
    /// Whether the error only means no connection is active.
    pub fn is_not_connected(&self) -> bool {
        matches!(
            self,
            ClientError::NotConnected | ClientError::Session(SessionError::NotConnected)
        )
    }

    /// Wire category, for callers that branch on it.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::NotConnected => ErrorKind::NotConnected,
            ClientError::Daemon { kind, .. } => *kind,
            ClientError::Session(e) => e.kind(),
            ClientError::Config(_) | ClientError::NoConfig => ErrorKind::Config,
            _ => ErrorKind::Internal,
        }
    }
}

impl From<SessionError> for ClientError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::NotConnected => ClientError::NotConnected,
            SessionError::Connect(crate::mesh::ConnectError::Cancelled) => ClientError::Cancelled,
            other => ClientError::Session(other),
        }
    }
}

impl From<ErrorResponse> for ClientError {
    fn from(resp: ErrorResponse) -> Self {
        if resp.is_not_connected() {
            ClientError::NotConnected
        } else {
            ClientError::Daemon {
                kind: resp.kind.unwrap_or_default(),
                message: resp.message,
            }
        }
    }
}

/// Client for the helper daemon's socket API.
#[derive(Debug, Clone)]
pub struct DaemonClient {
    socket_path: PathBuf,
    dial_timeout: Duration,
}

impl DaemonClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            dial_timeout: DIAL_TIMEOUT,
        }
    }

    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Send one request and return the body of a 200 response.
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<Bytes, ClientError> {
        let stream = tokio::time::timeout(self.dial_timeout, socket::dial(&self.socket_path))
            .await
            .map_err(|_| ClientError::DialTimeout {
                path: self.socket_path.clone(),
                timeout: self.dial_timeout,
            })?
            .map_err(|source| ClientError::Connect {
                path: self.socket_path.clone(),
                source,
            })?;

        let (mut sender, conn) =
            hyper::client::conn::http1::handshake::<_, Full<Bytes>>(TokioIo::new(stream))
                .await
                .map_err(|e| ClientError::Request(format!("HTTP handshake failed: {e}")))?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                warn!(error = %e, "daemon connection error");
            }
        });

        debug!(%method, path, "daemon request");

        let req = hyper::Request::builder()
            .method(method)
            .uri(path)
            .header(HOST, "localhost")
            .header(CONTENT_TYPE, JSON)
            .header(ACCEPT, JSON)
            .body(Full::new(body.map(Bytes::from).unwrap_or_default()))
            .map_err(|e| ClientError::Request(format!("failed to build request: {e}")))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| ClientError::Request(e.to_string()))?;

        let status = resp.status();
        let resp_body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| ClientError::Request(format!("failed to read response body: {e}")))?
            .to_bytes();

        if status != StatusCode::OK {
            return match serde_json::from_slice::<ErrorResponse>(&resp_body) {
                Ok(err) => Err(err.into()),
                Err(_) => Err(ClientError::Request(format!("unexpected status: {status}"))),
            };
        }
        Ok(resp_body)
    }

    /// Ask the daemon to connect, loading `req.config_file` on its side.
    pub async fn connect(&self, req: &ConnectRequest) -> Result<(), ClientError> {
        let body = serde_json::to_vec(req)
            .map_err(|e| ClientError::Parse(format!("failed to serialize request: {e}")))?;
        let body = self.request(Method::POST, "/connect", Some(body)).await?;
        parse_ok(&body)
    }

    /// Ask the daemon to close its active connection.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        let body = self.request(Method::POST, "/disconnect", None).await?;
        parse_ok(&body)
    }

    /// Interface counters of the daemon's active connection.
    pub async fn interface_metrics(&self) -> Result<InterfaceMetrics, ClientError> {
        let body = self.request(Method::GET, "/interface-metrics", None).await?;
        serde_json::from_slice(&body)
            .map_err(|e| ClientError::Parse(format!("interface metrics: {e}")))
    }
}

fn parse_ok(body: &[u8]) -> Result<(), ClientError> {
    let resp: OkResponse =
        serde_json::from_slice(body).map_err(|e| ClientError::Parse(format!("ok response: {e}")))?;
    if resp.ok {
        Ok(())
    } else {
        Err(ClientError::Request("daemon did not acknowledge the request".to_string()))
    }
}
