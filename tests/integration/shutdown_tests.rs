//! Lifecycle: state transitions, draining, and fatal startup errors.

use std::path::PathBuf;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};

use agent_bridge::models::Reply;
use agent_bridge::stream::frames::ResponseFrame;
use agent_bridge::{AppError, BridgeServer, ServerState};

use super::test_helpers::{raw_agent, spawn_bridge, spawn_bridge_with, test_config, wait_for_queued};

#[tokio::test]
async fn serve_moves_through_listening_to_stopped() {
    let bridge = spawn_bridge().await;
    let mut state = bridge.server.subscribe_state();

    state
        .wait_for(|s| *s == ServerState::Listening)
        .await
        .expect("listening");

    let server = std::sync::Arc::clone(&bridge.server);
    bridge.stop().await.expect("clean stop");
    assert_eq!(server.state(), ServerState::Stopped);
}

#[tokio::test]
async fn in_flight_batch_completes_while_draining() {
    let bridge = spawn_bridge().await;
    let client = bridge.server.client();
    let caller = tokio::spawn(async move {
        client
            .wait_for_result("work", Vec::<u8>::new(), Duration::from_secs(5))
            .await
    });
    wait_for_queued(bridge.registry(), 1).await;

    let mut agent = raw_agent(bridge.addr).await;
    agent.next().await.expect("frame").expect("io").expect("decodes");

    let mut state = bridge.server.subscribe_state();
    bridge.ct.cancel();
    state
        .wait_for(|s| *s == ServerState::Draining)
        .await
        .expect("draining");
    assert!(!bridge.handle.is_finished(), "waits for the in-flight batch");

    agent
        .send(ResponseFrame::from(Reply::new(200, b"finished".to_vec())))
        .await
        .expect("reply");

    assert_eq!(caller.await.expect("task").expect("reply").body_text(), "finished");
    let server = std::sync::Arc::clone(&bridge.server);
    bridge.handle.await.expect("serve task").expect("clean stop");
    assert_eq!(server.state(), ServerState::Stopped);
}

#[tokio::test]
async fn queued_callers_time_out_after_shutdown() {
    let server = BridgeServer::new(test_config());
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

    let client = server.client();
    let caller = tokio::spawn(async move {
        client
            .wait_for_result("never", Vec::<u8>::new(), Duration::from_millis(300))
            .await
    });
    wait_for_queued(server.registry(), 1).await;

    stop_tx.send(()).expect("signal shutdown");
    server
        .run(async move {
            let _ = stop_rx.await;
        })
        .await
        .expect("graceful stop");

    assert_eq!(server.state(), ServerState::Stopped);
    assert_eq!(caller.await.expect("task"), Err(AppError::DeadlineExceeded));
}

#[tokio::test]
async fn half_configured_tls_is_a_config_error() {
    let config = agent_bridge::BridgeConfig {
        cert_file: Some(PathBuf::from("/etc/bridge/cert.pem")),
        key_file: None,
        ..test_config()
    };
    let server = BridgeServer::new(config);

    let result = server.run(std::future::pending()).await;
    assert!(matches!(result, Err(AppError::Config(_))));
    assert_eq!(server.state(), ServerState::Stopped);
}

#[tokio::test]
async fn occupied_port_is_a_listen_error() {
    let occupied = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let port = occupied.local_addr().expect("addr").port();

    let config = agent_bridge::BridgeConfig {
        port,
        ..test_config()
    };
    let server = BridgeServer::new(config);

    let result = server.run(std::future::pending()).await;
    assert!(matches!(result, Err(AppError::Listen(_))));
}

#[tokio::test]
async fn stalled_batch_is_aborted_after_shutdown_grace() {
    let bridge = spawn_bridge_with(agent_bridge::BridgeConfig {
        reply_timeout_seconds: 60,
        shutdown_grace_seconds: 1,
        ..test_config()
    })
    .await;
    let client = bridge.server.client();
    let caller = tokio::spawn(async move {
        client
            .wait_for_result("work", Vec::<u8>::new(), Duration::from_secs(10))
            .await
    });
    wait_for_queued(bridge.registry(), 1).await;

    // Takes the request and never answers.
    let mut agent = raw_agent(bridge.addr).await;
    agent.next().await.expect("frame").expect("io").expect("decodes");

    let server = std::sync::Arc::clone(&bridge.server);
    let stopped = tokio::time::timeout(Duration::from_secs(3), bridge.stop()).await;
    assert!(matches!(stopped, Ok(Ok(()))), "shutdown finishes after the grace period");
    assert_eq!(server.state(), ServerState::Stopped);

    let result = caller.await.expect("task");
    assert!(matches!(result, Err(AppError::Transport(ref m)) if m == "dispatch aborted"));
    drop(agent);
}
