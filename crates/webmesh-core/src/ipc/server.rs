//! Daemon server: an axum router over the local socket.
//!
//! Every handler goes through the daemon's [`Session`], whose lock
//! serializes connect, disconnect, and metrics. Errors are always returned
//! as a JSON [`ErrorResponse`], including for unknown paths, wrong verbs,
//! and undecodable bodies.

use std::future::{Future, IntoFuture};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use webmesh_config::ProfileConfig;

use super::socket::SocketListener;
use super::types::*;
use crate::session::{Session, SessionError};

/// How long in-flight requests may run after shutdown is requested.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Shared state accessible to all route handlers.
pub struct DaemonState {
    pub session: Arc<Session>,
    /// Cancelled when the daemon stops; aborts in-flight connects.
    pub shutdown: CancellationToken,
    pub started_at: Instant,
}

impl DaemonState {
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            shutdown: CancellationToken::new(),
            started_at: Instant::now(),
        }
    }
}

/// Errors from running the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("serve: {0}")]
    Io(#[from] std::io::Error),

    #[error("in-flight requests did not finish within {0:?}")]
    ShutdownTimeout(Duration),
}

/// A JSON error with its HTTP status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    fn new(status: StatusCode, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorResponse::new(kind, message),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ErrorKind::BadRequest, message)
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, e.kind(), e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Build the router with all daemon routes.
pub fn router(state: Arc<DaemonState>) -> axum::Router {
    axum::Router::new()
        .route("/connect", post(handle_connect))
        .route("/disconnect", post(handle_disconnect))
        .route("/interface-metrics", get(handle_interface_metrics))
        .method_not_allowed_fallback(handle_method_not_allowed)
        .fallback(handle_not_found)
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}

/// Serve `listener` until `shutdown` resolves.
///
/// After shutdown is requested, in-flight requests get `grace` to finish;
/// pending connects are cancelled right away. Then any active connection is
/// closed and, on Unix, the socket file at `socket_path` is removed.
pub async fn serve(
    listener: SocketListener,
    socket_path: &Path,
    state: Arc<DaemonState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
    grace: Duration,
) -> Result<(), ServerError> {
    let session = Arc::clone(&state.session);
    let cancel = state.shutdown.clone();
    let draining = cancel.clone();
    let started_at = state.started_at;

    let server = axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown.await;
            info!(uptime_secs = started_at.elapsed().as_secs(), "daemon server shutting down");
            cancel.cancel();
        })
        .into_future();
    tokio::pin!(server);

    let result = tokio::select! {
        res = &mut server => res.map_err(ServerError::Io),
        _ = draining.cancelled() => {
            match tokio::time::timeout(grace, &mut server).await {
                Ok(res) => res.map_err(ServerError::Io),
                Err(_) => Err(ServerError::ShutdownTimeout(grace)),
            }
        }
    };

    match &result {
        Err(ServerError::ShutdownTimeout(_)) => {
            warn!(grace_secs = grace.as_secs(), "drain timed out, leaving session to the OS");
        }
        _ => session.shutdown().await,
    }
    remove_socket(socket_path);
    result
}

#[cfg(unix)]
fn remove_socket(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed daemon socket"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => error!(path = %path.display(), error = %e, "error removing daemon socket"),
    }
}

#[cfg(not(unix))]
fn remove_socket(_path: &Path) {}

// ── Route handlers ──────────────────────────────────────────────────────

async fn handle_connect(
    State(state): State<Arc<DaemonState>>,
    body: Bytes,
) -> Result<Json<OkResponse>, ApiError> {
    let req: ConnectRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("decode request: {e}")))?;

    let config = ProfileConfig::load(Path::new(&req.config_file))
        .await
        .map_err(|e| {
            ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorKind::Config,
                format!("load config: {e}"),
            )
        })?;

    // Detached from the request; a dropped request cancels the connect
    // and the engine is closed on the cancel path.
    let cancel = state.shutdown.child_token();
    let _cancel_on_drop = cancel.clone().drop_guard();
    let session = Arc::clone(&state.session);
    let options = req.options;
    let task = tokio::spawn(async move {
        let result = session.connect(&config, &options, &cancel).await;
        if let Err(e) = &result {
            error!(error = %e, profile = %options.profile, "connect failed");
        }
        result
    });

    match task.await {
        Ok(result) => result?,
        Err(e) => {
            error!(error = %e, "connect task failed");
            return Err(ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorKind::Internal,
                format!("connect task failed: {e}"),
            ));
        }
    }
    Ok(Json(OkResponse::ok()))
}

async fn handle_disconnect(
    State(state): State<Arc<DaemonState>>,
) -> Result<Json<OkResponse>, ApiError> {
    state.session.disconnect().await?;
    Ok(Json(OkResponse::ok()))
}

async fn handle_interface_metrics(
    State(state): State<Arc<DaemonState>>,
) -> Result<Json<InterfaceMetrics>, ApiError> {
    Ok(Json(state.session.metrics().await?))
}

async fn handle_method_not_allowed() -> ApiError {
    ApiError::new(
        StatusCode::METHOD_NOT_ALLOWED,
        ErrorKind::BadRequest,
        "method not allowed",
    )
}

async fn handle_not_found() -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, ErrorKind::BadRequest, "not found")
}

async fn log_request(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let start = Instant::now();
    let resp = next.run(req).await;
    info!(
        %method,
        %path,
        status = resp.status().as_u16(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "handled request"
    );
    resp
}
