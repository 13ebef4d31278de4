//! A subscriber that falls behind must not grow its queue unbounded, and one
//! whose write path stays over the hard backlog cap for three consecutive
//! ticks must be force-closed (spec.md §4.6.4).

use broadcast_gateway::broadcast::{BroadcastConfig, BroadcastEngine, WsOutbound};
use scene_protocol::{close_codes, Frame, REALITY_STREAM_SCOPE};
use std::time::Duration;
use uuid::Uuid;

fn frame(tenant_id: &str, seq: u64) -> Frame {
    Frame { scene_id: Uuid::new_v4(), tenant_id: tenant_id.to_owned(), seq, ts: chrono::Utc::now(), body: serde_json::json!({"seq": seq}) }
}

#[tokio::test]
async fn a_non_draining_subscriber_never_blocks_the_producer() {
    let (engine, _handle) = BroadcastEngine::spawn(BroadcastConfig { fps: 1, queue_cap: 3, ..Default::default() });
    let (_socket_id, _rx) = engine.register("acme".to_owned(), vec![REALITY_STREAM_SCOPE.to_owned()]).await;

    // The subscriber never drains `_rx`; producing well past `queue_cap`
    // must not hang or panic the producer side.
    for seq in 0..50u64 {
        engine.produce("acme".to_owned(), frame("acme", seq)).await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
}

#[tokio::test]
async fn sustained_hard_backlog_force_closes_the_socket() {
    let (engine, _handle) = BroadcastEngine::spawn(BroadcastConfig {
        fps: 50,
        queue_cap: 64,
        soft_backlog_bytes: 1,
        hard_backlog_bytes: 1,
        ..Default::default()
    });
    let (socket_id, mut rx) = engine.register("acme".to_owned(), vec![REALITY_STREAM_SCOPE.to_owned()]).await;
    engine.produce("acme".to_owned(), frame("acme", 1)).await;

    // First delivered frame pushes backlog_bytes over the 1-byte hard cap;
    // report it as confirmed so the engine keeps counting it against the
    // cap on subsequent ticks rather than clearing it via ReportWrite.
    let first = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await.unwrap().unwrap();
    assert!(matches!(first, WsOutbound::Frame(_)));

    let closed = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
    match closed {
        WsOutbound::Close(code) => assert_eq!(code, close_codes::BACKPRESSURE),
        other => panic!("expected a forced Close, got {other:?}"),
    }
    let _ = socket_id;
}
