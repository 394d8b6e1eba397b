//! E2E tests for automatic reconnection
//!
//! The mock server closes every connection after a few ticks; the session
//! must come back on its own with exponential backoff and stop once
//! disconnected.

use kodama_client::{ConnectionError, SessionConfig, SessionHandle, SessionState};
use kodama_client_net::mock_feed::{spawn_server, MockFeedConfig, MockFeedState};
use std::time::Duration;

fn fast_session() -> SessionConfig {
    SessionConfig {
        initial_backoff: Duration::from_millis(50),
        max_backoff: Duration::from_millis(200),
        origin: None,
    }
}

async fn wait_for<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Server-side closes trigger reconnects until disconnect
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reconnects_after_server_close() {
    let state = MockFeedState::new(MockFeedConfig {
        port: 0,
        cameras: 1,
        tick: Duration::from_millis(10),
        close_after_ticks: Some(3),
        ..Default::default()
    });
    let (addr, _task) = spawn_server(state.clone()).await.unwrap();

    let handle = SessionHandle::spawn(fast_session(), |_bus| {}).unwrap();
    handle
        .connect(Some(format!("ws://{addr}/ws")))
        .await
        .unwrap();

    let server = state.clone();
    assert!(
        wait_for(move || server.connections() >= 3, Duration::from_secs(5)).await,
        "expected at least 3 connections, got {}",
        state.connections()
    );

    let status = handle.status().await.unwrap();
    assert!(status.stats.reconnect_attempts >= 2);
    assert!(status.stats.disconnections().len() >= 2);
    // Every open resets the delay, so it never grows past one doubling
    assert!(status.backoff <= Duration::from_millis(100));

    handle.disconnect().await.unwrap();
    let status = handle.status().await.unwrap();
    assert_eq!(status.state, SessionState::Idle);
    assert_eq!(status.backoff, Duration::from_millis(50));

    let settled = state.connections();
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(state.connections(), settled, "no reconnect after disconnect");

    handle.shutdown().await;
}

/// A refused connection fails the connect call and keeps retrying with a
/// growing delay
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_refused_connection_backs_off() {
    // Bind then drop to get a port nothing listens on
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let url = format!("ws://127.0.0.1:{port}/ws");

    let handle = SessionHandle::spawn(fast_session(), |_bus| {}).unwrap();
    match handle.connect(Some(url.clone())).await {
        Err(ConnectionError::Failed { url: failed }) => assert_eq!(failed, url),
        other => panic!("expected failure, got {:?}", other),
    }

    tokio::time::sleep(Duration::from_millis(600)).await;
    let status = handle.status().await.unwrap();
    assert_ne!(status.state, SessionState::Open);
    assert!(status.stats.reconnect_attempts >= 2);
    assert_eq!(status.backoff, Duration::from_millis(200));
    assert!(status.stats.disconnections().is_empty());

    handle.shutdown().await;
}

/// A later connect to a live server recovers a session stuck retrying
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_connect_replaces_retrying_session() {
    let handle = SessionHandle::spawn(fast_session(), |_bus| {}).unwrap();
    let _ = handle.connect(Some("ws://127.0.0.1:9/ws".to_string())).await;

    let state = MockFeedState::new(MockFeedConfig {
        port: 0,
        ..Default::default()
    });
    let (addr, _task) = spawn_server(state).await.unwrap();
    handle
        .connect(Some(format!("ws://{addr}/ws")))
        .await
        .unwrap();

    let status = handle.status().await.unwrap();
    assert_eq!(status.state, SessionState::Open);
    assert_eq!(status.url.as_deref(), Some(format!("ws://{addr}/ws").as_str()));
    assert_eq!(status.backoff, Duration::from_millis(50));

    handle.shutdown().await;
}
