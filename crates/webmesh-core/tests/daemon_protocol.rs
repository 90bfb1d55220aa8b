//! End-to-end tests of the daemon socket protocol.
#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;
use webmesh_core::daemon::DaemonError;
use webmesh_core::ipc::{ConnectOptions, ConnectRequest, ErrorKind};
use webmesh_core::{ClientError, ClientMode, MeshClient};
use webmesh_test_utils::{EngineEvent, StubEngineProvider, TestDaemon, TestProfileBuilder};

fn opts(profile: &str) -> ConnectOptions {
    ConnectOptions {
        profile: profile.to_string(),
        interface_name: "webmesh0".to_string(),
        ..Default::default()
    }
}

#[test_log::test(tokio::test)]
async fn test_relay_client_full_cycle() {
    let stub = StubEngineProvider::new();
    let daemon = TestDaemon::start(Arc::new(stub.clone())).await;
    let profile = TestProfileBuilder::single().write();

    let client = MeshClient::relay(daemon.socket_path());
    assert_eq!(client.mode(), ClientMode::Relay);
    client.load_config(profile.path()).await.unwrap();

    client
        .connect(&opts("home"), &CancellationToken::new())
        .await
        .unwrap();
    assert!(client.connected().await);

    let metrics = client.interface_metrics().await.unwrap();
    assert_eq!(metrics.device_name, "webmesh0");
    assert_eq!(metrics.total_transmit_bytes, 1024);
    assert_eq!(metrics.total_receive_bytes, 2048);

    client.disconnect().await.unwrap();
    assert!(!client.connected().await);
    assert_eq!(stub.live(), 0);

    daemon.stop().await.unwrap();
}

#[test_log::test(tokio::test)]
async fn test_idle_daemon_reports_not_connected() {
    let daemon = TestDaemon::start(Arc::new(StubEngineProvider::new())).await;
    let client = daemon.client();

    let err = client.disconnect().await.unwrap_err();
    assert!(err.is_not_connected());
    assert_eq!(err.kind(), ErrorKind::NotConnected);

    let err = client.interface_metrics().await.unwrap_err();
    assert!(matches!(err, ClientError::NotConnected));

    daemon.stop().await.unwrap();
}

#[test_log::test(tokio::test)]
async fn test_unknown_profile_is_config_error() {
    let stub = StubEngineProvider::new();
    let daemon = TestDaemon::start(Arc::new(stub.clone())).await;
    let profile = TestProfileBuilder::single().write();

    let err = daemon
        .client()
        .connect(&ConnectRequest {
            config_file: profile.path_string(),
            options: opts("nope"),
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
    assert!(stub.events().is_empty());

    daemon.stop().await.unwrap();
}

#[test_log::test(tokio::test)]
async fn test_missing_profile_file_is_config_error() {
    let daemon = TestDaemon::start(Arc::new(StubEngineProvider::new())).await;

    let err = daemon
        .client()
        .connect(&ConnectRequest {
            config_file: "/nonexistent/webmesh.toml".to_string(),
            options: opts(""),
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
    assert!(err.to_string().starts_with("load config:"));

    daemon.stop().await.unwrap();
}

#[test_log::test(tokio::test)]
async fn test_reconnect_through_daemon_replaces_session() {
    let stub = StubEngineProvider::new();
    let daemon = TestDaemon::start(Arc::new(stub.clone())).await;
    let profile = TestProfileBuilder::single().write();
    let client = daemon.client();
    let req = ConnectRequest {
        config_file: profile.path_string(),
        options: opts("home"),
    };

    client.connect(&req).await.unwrap();
    client.connect(&req).await.unwrap();

    assert_eq!(stub.live(), 1);
    let events = stub.events();
    let closed_first = events.iter().position(|e| *e == EngineEvent::Closed(0));
    let built_second = events.iter().position(|e| *e == EngineEvent::Built(1));
    assert!(closed_first < built_second);

    // Counters now come from the second engine.
    let metrics = client.interface_metrics().await.unwrap();
    assert_eq!(metrics.total_transmit_bytes, 2048);

    daemon.stop().await.unwrap();
}

#[test_log::test(tokio::test)]
async fn test_shutdown_closes_session_and_removes_socket() {
    let stub = StubEngineProvider::new();
    let daemon = TestDaemon::start(Arc::new(stub.clone())).await;
    let profile = TestProfileBuilder::single().write();
    let socket_path = daemon.socket_path().to_path_buf();

    daemon
        .client()
        .connect(&ConnectRequest {
            config_file: profile.path_string(),
            options: opts(""),
        })
        .await
        .unwrap();
    assert_eq!(stub.live(), 1);

    daemon.stop().await.unwrap();
    assert_eq!(stub.live(), 0);
    assert!(!socket_path.exists());
}

#[test_log::test(tokio::test)]
async fn test_socket_permissions() {
    let daemon = TestDaemon::start(Arc::new(StubEngineProvider::new())).await;
    let socket_path = daemon.socket_path();

    let mode = std::fs::metadata(socket_path).unwrap().permissions().mode();
    assert_eq!(mode & 0o007, 0, "socket is world accessible: {mode:o}");

    let dir = socket_path.parent().unwrap();
    let dir_mode = std::fs::metadata(dir).unwrap().permissions().mode();
    assert_eq!(dir_mode & 0o777, 0o750);

    daemon.stop().await.unwrap();
}

#[test_log::test(tokio::test)]
async fn test_relay_connect_without_config_fails() {
    let daemon = TestDaemon::start(Arc::new(StubEngineProvider::new())).await;
    let client = MeshClient::relay(daemon.socket_path());

    let err = client
        .connect(&opts("home"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::NoConfig));
    assert!(!client.connected().await);

    daemon.stop().await.unwrap();
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[test_log::test(tokio::test)]
async fn test_cancelled_relay_connect_closes_engine() {
    let stub = StubEngineProvider::new().never_ready();
    let daemon = TestDaemon::start(Arc::new(stub.clone())).await;
    let profile = TestProfileBuilder::single().write();
    let client = MeshClient::relay(daemon.socket_path());
    client.load_config(profile.path()).await.unwrap();

    let cancel = CancellationToken::new();
    let canceller = {
        let stub = stub.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            wait_until(|| stub.opened() > 0).await;
            cancel.cancel();
        })
    };
    let err = client
        .connect(
            &ConnectOptions {
                connect_timeout: 3600,
                ..opts("home")
            },
            &cancel,
        )
        .await
        .unwrap_err();
    canceller.await.unwrap();
    assert!(matches!(err, ClientError::Cancelled));

    // The daemon closes the engine it had already opened.
    wait_until(|| stub.events().contains(&EngineEvent::Closed(0))).await;
    assert_eq!(stub.live(), 0);
    assert!(!daemon.daemon().session().is_connected().await);

    daemon.stop().await.unwrap();
}

#[test_log::test(tokio::test)]
async fn test_shutdown_drain_timeout_is_fatal() {
    let stub = StubEngineProvider::new();
    let daemon =
        TestDaemon::start_with_grace(Arc::new(stub.clone()), Duration::from_millis(300)).await;
    let profile = TestProfileBuilder::single().write();
    let socket_path = daemon.socket_path().to_path_buf();
    let client = daemon.client();

    client
        .connect(&ConnectRequest {
            config_file: profile.path_string(),
            options: opts("home"),
        })
        .await
        .unwrap();

    stub.set_hang_close(true);
    let disconnecting = tokio::spawn(async move { client.disconnect().await });
    wait_until(|| stub.close_calls() > 0).await;

    let result = daemon.stop().await;
    assert!(
        matches!(result, Err(DaemonError::ShutdownTimeout(grace)) if grace == Duration::from_millis(300)),
        "unexpected result: {result:?}"
    );
    assert!(!socket_path.exists());
    disconnecting.abort();
}
