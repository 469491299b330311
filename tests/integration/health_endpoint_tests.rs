//! HTTP health and status endpoint.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use agent_bridge::health::{serve_health, HealthState};
use agent_bridge::BridgeServer;

use super::test_helpers::{test_config, wait_for_queued};

async fn spawn_health(
    server: &BridgeServer,
) -> (String, CancellationToken, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let base = format!("http://{}", listener.local_addr().expect("addr"));
    let state = HealthState {
        registry: Arc::clone(server.registry()),
        server_state: server.subscribe_state(),
    };
    let ct = CancellationToken::new();
    let handle = {
        let ct = ct.clone();
        tokio::spawn(async move {
            serve_health(listener, state, ct).await.expect("health serves");
        })
    };
    (base, ct, handle)
}

#[tokio::test]
async fn health_answers_ok() {
    let server = BridgeServer::new(test_config());
    let (base, ct, handle) = spawn_health(&server).await;

    let response = reqwest::get(format!("{base}/health")).await.expect("request");
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.text().await.expect("body"), "OK");

    ct.cancel();
    handle.await.expect("health task");
}

#[tokio::test]
async fn status_reports_state_and_pending_requests() {
    let server = BridgeServer::new(test_config());
    let (base, ct, handle) = spawn_health(&server).await;

    let client = server.client();
    let _caller = tokio::spawn(async move {
        client
            .wait_for_result("ping", Vec::<u8>::new(), Duration::from_secs(5))
            .await
    });
    wait_for_queued(server.registry(), 1).await;

    let body = reqwest::get(format!("{base}/status"))
        .await
        .expect("request")
        .text()
        .await
        .expect("body");
    let status: serde_json::Value = serde_json::from_str(&body).expect("json body");
    assert_eq!(status["state"], "stopped");
    assert_eq!(status["pending"], 1);

    ct.cancel();
    handle.await.expect("health task");
}
