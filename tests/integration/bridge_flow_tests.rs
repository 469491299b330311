//! End-to-end tests: callers block on `wait_for_result`, a worker services
//! the batch over TCP.

use std::time::Duration;

use agent_bridge::models::{Reply, WorkUnit};
use agent_bridge::worker::{ping_handler, WorkerClient};
use agent_bridge::AppError;

use super::test_helpers::{spawn_bridge, wait_for_queued};

#[tokio::test]
async fn ping_round_trip() {
    let bridge = spawn_bridge().await;
    let client = bridge.server.client();

    let caller = tokio::spawn(async move {
        client
            .wait_for_result("ping", Vec::<u8>::new(), Duration::from_secs(5))
            .await
    });
    wait_for_queued(bridge.registry(), 1).await;

    let mut handler = |unit: WorkUnit| async move { ping_handler(&unit) };
    let served = WorkerClient::new(bridge.addr.to_string())
        .invoke(&mut handler)
        .await
        .expect("invocation succeeds");

    assert_eq!(served, 1);
    let reply = caller.await.expect("caller task").expect("reply");
    assert_eq!(reply, Reply::new(200, b"Pong".to_vec()));

    bridge.stop().await.expect("clean stop");
}

#[tokio::test]
async fn empty_invocation_returns_immediately() {
    let bridge = spawn_bridge().await;

    let mut handler = |unit: WorkUnit| async move { ping_handler(&unit) };
    let served = tokio::time::timeout(
        Duration::from_secs(2),
        WorkerClient::new(bridge.addr.to_string()).invoke(&mut handler),
    )
    .await
    .expect("bridge closes an empty invocation promptly")
    .expect("invocation succeeds");

    assert_eq!(served, 0);
    bridge.stop().await.expect("clean stop");
}

#[tokio::test]
async fn concurrent_callers_each_get_their_own_reply() {
    let bridge = spawn_bridge().await;

    let callers: Vec<_> = (0..20)
        .map(|i| {
            let client = bridge.server.client();
            tokio::spawn(async move {
                let path = format!("job-{i}");
                let reply = client
                    .wait_for_result(path.clone(), format!("payload-{i}"), Duration::from_secs(5))
                    .await;
                (path, reply)
            })
        })
        .collect();
    wait_for_queued(bridge.registry(), 20).await;

    let mut handler = |unit: WorkUnit| async move {
        let mut body = unit.path.into_bytes();
        body.extend_from_slice(b":");
        body.extend_from_slice(&unit.body);
        Reply::new(200, body)
    };
    let served = WorkerClient::new(bridge.addr.to_string())
        .invoke(&mut handler)
        .await
        .expect("invocation succeeds");
    assert_eq!(served, 20);

    for caller in callers {
        let (path, reply) = caller.await.expect("caller task");
        let index = path.trim_start_matches("job-");
        assert_eq!(
            reply.expect("reply").body_text(),
            format!("{path}:payload-{index}")
        );
    }

    bridge.stop().await.expect("clean stop");
}

#[tokio::test]
async fn work_queued_after_a_batch_waits_for_next_invocation() {
    let bridge = spawn_bridge().await;
    let worker = WorkerClient::new(bridge.addr.to_string());
    let mut handler = |unit: WorkUnit| async move { ping_handler(&unit) };

    for round in 0..3 {
        let client = bridge.server.client();
        let caller = tokio::spawn(async move {
            client
                .wait_for_result("ping", Vec::<u8>::new(), Duration::from_secs(5))
                .await
        });
        wait_for_queued(bridge.registry(), 1).await;

        let served = worker.invoke(&mut handler).await.expect("invocation");
        assert_eq!(served, 1, "round {round}");
        assert_eq!(caller.await.expect("task").expect("reply").status, 200);
    }

    bridge.stop().await.expect("clean stop");
}

/// Caller times out at 200ms while the agent takes 500ms; the late answer
/// is discarded and the caller sees a deadline error.
#[tokio::test]
async fn slow_agent_loses_the_race_against_the_deadline() {
    let bridge = spawn_bridge().await;
    let client = bridge.server.client();

    let caller = tokio::spawn(async move {
        let started = tokio::time::Instant::now();
        let result = client
            .wait_for_result("slow", Vec::<u8>::new(), Duration::from_millis(200))
            .await;
        (result, started.elapsed())
    });
    wait_for_queued(bridge.registry(), 1).await;

    let mut handler = |_unit: WorkUnit| async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        Reply::new(200, b"too late".to_vec())
    };
    let served = WorkerClient::new(bridge.addr.to_string())
        .invoke(&mut handler)
        .await
        .expect("invocation completes");

    let (result, elapsed) = caller.await.expect("caller task");
    assert_eq!(result, Err(AppError::DeadlineExceeded));
    assert!(elapsed < Duration::from_millis(500));
    assert_eq!(served, 1, "the agent still answered");

    bridge.stop().await.expect("clean stop");
}

/// A request larger than the worker's frame limit is answered with 400 and
/// the caller gets that answer instead of waiting out its deadline.
#[tokio::test]
async fn oversized_request_is_rejected_by_worker_frame_limit() {
    let bridge = spawn_bridge().await;
    let client = bridge.server.client();

    let caller = tokio::spawn(async move {
        client
            .wait_for_result("ping", vec![b'x'; 4096], Duration::from_secs(5))
            .await
    });
    wait_for_queued(bridge.registry(), 1).await;

    let mut handler = |unit: WorkUnit| async move { ping_handler(&unit) };
    let served = WorkerClient::new(bridge.addr.to_string())
        .with_max_frame_bytes(256)
        .invoke(&mut handler)
        .await
        .expect("invocation succeeds");

    assert_eq!(served, 1);
    let reply = caller.await.expect("caller task").expect("reply");
    assert_eq!(reply.status, 400);
    assert!(reply.body_text().contains("line too long"), "{}", reply.body_text());

    bridge.stop().await.expect("clean stop");
}
