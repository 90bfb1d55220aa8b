//! Session lifecycle against a scripted engine.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;
use webmesh_config::ProfileConfig;
use webmesh_core::ipc::ConnectOptions;
use webmesh_core::mesh::ConnectError;
use webmesh_core::{Session, SessionError};
use webmesh_test_utils::{EngineEvent, StubEngineProvider, TestProfileBuilder};

fn profile() -> ProfileConfig {
    TestProfileBuilder::single().build()
}

fn opts() -> ConnectOptions {
    ConnectOptions {
        interface_name: "webmesh0".to_string(),
        ..Default::default()
    }
}

async fn connect(session: &Session) -> Result<(), SessionError> {
    session
        .connect(&profile(), &opts(), &CancellationToken::new())
        .await
}

#[test_log::test(tokio::test)]
async fn test_connect_replaces_existing_connection() {
    let stub = StubEngineProvider::new();
    let session = Session::new(Arc::new(stub.clone()));
    let config = TestProfileBuilder::new()
        .cluster("lab", "mesh.example.com:8443")
        .cluster("office", "office.example.com:8443")
        .context("home", "lab", "")
        .context("work", "office", "")
        .current("home")
        .build();
    let cancel = CancellationToken::new();

    session.connect(&config, &opts(), &cancel).await.unwrap();
    session
        .connect(
            &config,
            &ConnectOptions {
                profile: "work".to_string(),
                ..opts()
            },
            &cancel,
        )
        .await
        .unwrap();

    assert_eq!(
        stub.events(),
        vec![
            EngineEvent::Built(0),
            EngineEvent::Opened(0),
            EngineEvent::Ready(0),
            EngineEvent::Closed(0),
            EngineEvent::Built(1),
            EngineEvent::Opened(1),
            EngineEvent::Ready(1),
        ]
    );
    let built = stub.built_options();
    assert_eq!(built.len(), 2);
    assert_eq!(built[0].profile, "home");
    assert_eq!(built[1].profile, "work");
    assert_eq!(built[1].mesh.join_address, "office.example.com:8443");

    assert_eq!(stub.live(), 1);
    assert_eq!(session.active_profile().await.as_deref(), Some("work"));
}

#[tokio::test(start_paused = true)]
async fn test_replacement_timeout_leaves_disconnected() {
    let stub = StubEngineProvider::new();
    let session = Session::new(Arc::new(stub.clone()));
    connect(&session).await.unwrap();

    stub.set_never_ready(true);
    let err = session
        .connect(
            &profile(),
            &ConnectOptions {
                connect_timeout: 2,
                ..opts()
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, SessionError::Connect(ConnectError::ReadyTimeout(_))));
    assert!(stub.events().ends_with(&[
        EngineEvent::Closed(0),
        EngineEvent::Built(1),
        EngineEvent::Opened(1),
        EngineEvent::Closed(1),
    ]));
    assert_eq!(stub.live(), 0);
    assert!(!session.is_connected().await);
}

#[test_log::test(tokio::test)]
async fn test_idle_disconnect_and_metrics() {
    let stub = StubEngineProvider::new();
    let session = Session::new(Arc::new(stub.clone()));

    assert!(matches!(session.disconnect().await, Err(SessionError::NotConnected)));
    assert!(matches!(session.metrics().await, Err(SessionError::NotConnected)));
    assert!(stub.events().is_empty());
}

#[test_log::test(tokio::test)]
async fn test_disconnect_then_idle() {
    let stub = StubEngineProvider::new();
    let session = Session::new(Arc::new(stub.clone()));

    connect(&session).await.unwrap();
    let metrics = session.metrics().await.unwrap();
    assert_eq!(metrics.device_name, "webmesh0");

    session.disconnect().await.unwrap();
    assert!(matches!(session.disconnect().await, Err(SessionError::NotConnected)));
    assert_eq!(stub.live(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_ready_timeout_closes_engine() {
    let stub = StubEngineProvider::new().never_ready();
    let session = Session::new(Arc::new(stub.clone()));

    let err = session
        .connect(
            &profile(),
            &ConnectOptions {
                connect_timeout: 1,
                ..opts()
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SessionError::Connect(ConnectError::ReadyTimeout(d)) if d == Duration::from_secs(1)
    ));
    assert_eq!(err.to_string(), "wait for store ready: timed out after 1s");
    assert_eq!(
        stub.events(),
        vec![EngineEvent::Built(0), EngineEvent::Opened(0), EngineEvent::Closed(0)]
    );
    assert!(!session.is_connected().await);
}

#[tokio::test(start_paused = true)]
async fn test_default_timeout_allows_slow_ready() {
    let stub = StubEngineProvider::new().with_ready_delay(Duration::from_secs(29));
    let session = Session::new(Arc::new(stub.clone()));
    let start = tokio::time::Instant::now();

    connect(&session).await.unwrap();

    assert!(start.elapsed() >= Duration::from_secs(29));
    assert!(session.is_connected().await);
}

#[tokio::test(start_paused = true)]
async fn test_default_timeout_is_thirty_seconds() {
    let stub = StubEngineProvider::new().with_ready_delay(Duration::from_secs(31));
    let session = Session::new(Arc::new(stub.clone()));

    let err = connect(&session).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Connect(ConnectError::ReadyTimeout(d)) if d == Duration::from_secs(30)
    ));
    assert_eq!(stub.live(), 0);
}

#[test_log::test(tokio::test)]
async fn test_close_existing_failure_keeps_connection() {
    let stub = StubEngineProvider::new();
    let session = Session::new(Arc::new(stub.clone()));
    connect(&session).await.unwrap();

    stub.set_fail_close(true);
    let err = connect(&session).await.unwrap_err();
    assert!(matches!(err, SessionError::CloseExisting(_)));
    assert!(err.to_string().starts_with("close existing connection:"));

    // Old connection still serves metrics, and nothing new was built.
    assert_eq!(session.metrics().await.unwrap().total_transmit_bytes, 1024);
    assert!(!stub.events().contains(&EngineEvent::Built(1)));
}

#[test_log::test(tokio::test)]
async fn test_open_failure_after_close_leaves_disconnected() {
    let stub = StubEngineProvider::new();
    let session = Session::new(Arc::new(stub.clone()));
    connect(&session).await.unwrap();

    stub.set_fail_open(true);
    let err = connect(&session).await.unwrap_err();
    assert_eq!(err.to_string(), "open mesh: stub open failure");
    assert!(stub.events().contains(&EngineEvent::Closed(0)));
    assert!(matches!(session.metrics().await, Err(SessionError::NotConnected)));
}

#[test_log::test(tokio::test)]
async fn test_bad_profile_leaves_connection_in_place() {
    let stub = StubEngineProvider::new();
    let session = Session::new(Arc::new(stub.clone()));
    connect(&session).await.unwrap();

    let err = session
        .connect(
            &profile(),
            &ConnectOptions {
                profile: "missing".to_string(),
                ..opts()
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Config(_)));
    assert_eq!(session.active_profile().await.as_deref(), Some("home"));
    assert_eq!(stub.live(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_waits_for_inflight_connect() {
    let stub = StubEngineProvider::new().with_ready_delay(Duration::from_secs(2));
    let session = Arc::new(Session::new(Arc::new(stub.clone())));

    let connecting = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { connect(&session).await })
    };
    while !stub.events().contains(&EngineEvent::Opened(0)) {
        tokio::task::yield_now().await;
    }

    session.disconnect().await.unwrap();
    connecting.await.unwrap().unwrap();

    assert_eq!(
        stub.events(),
        vec![
            EngineEvent::Built(0),
            EngineEvent::Opened(0),
            EngineEvent::Ready(0),
            EngineEvent::Closed(0),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancel_aborts_connect() {
    let stub = StubEngineProvider::new().never_ready();
    let session = Arc::new(Session::new(Arc::new(stub.clone())));
    let cancel = CancellationToken::new();

    let connecting = {
        let session = Arc::clone(&session);
        let cancel = cancel.clone();
        tokio::spawn(async move { session.connect(&profile(), &opts(), &cancel).await })
    };
    while !stub.events().contains(&EngineEvent::Opened(0)) {
        tokio::task::yield_now().await;
    }
    cancel.cancel();

    let err = connecting.await.unwrap().unwrap_err();
    assert!(matches!(err, SessionError::Connect(ConnectError::Cancelled)));
    assert_eq!(stub.live(), 0);
}

#[test_log::test(tokio::test)]
async fn test_shutdown_closes_active_connection() {
    let stub = StubEngineProvider::new();
    let session = Session::new(Arc::new(stub.clone()));
    connect(&session).await.unwrap();

    session.shutdown().await;
    assert_eq!(stub.live(), 0);
    assert!(!session.is_connected().await);
}
