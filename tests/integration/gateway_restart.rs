//! A gateway process restart must not take the bus or store down with it:
//! a client reconnecting to a freshly bound listener over the same bus/
//! store can still submit work and get results.

use reality_pipeline::{respawn_gateway, spawn, PipelineOpts};
use scene_protocol::{ClientMessage, ServerMessage};
use scene_test_utils::MockWsClient;
use std::time::Duration;
use uuid::Uuid;

#[tokio::test]
async fn a_reconnecting_client_still_completes_work_after_a_gateway_restart() {
    let pipeline = spawn(PipelineOpts::default()).await;
    let token = pipeline.token("user-1", "acme", &[]);

    {
        let mut client = MockWsClient::connect_with_token(&pipeline.ws_url(), &token).await.unwrap();
        client.recv().await.unwrap(); // Connected
        client.close().await.ok();
    }

    pipeline.stop_gateway();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let (new_addr, _handle) = respawn_gateway(&pipeline).await;
    let url = format!("ws://{new_addr}/ws/v1/stream");
    let mut client = MockWsClient::connect_with_token(&url, &token).await.unwrap();
    client.recv().await.unwrap(); // Connected

    let job_id = Uuid::new_v4();
    client
        .send(&ClientMessage::GenRequest { job_id, payload: serde_json::json!({"scene": "b"}), deadline_ms: 5000 })
        .await
        .unwrap();
    match client.recv().await.unwrap() {
        ServerMessage::GenResult { job_id: got, success, .. } => {
            assert_eq!(got, job_id);
            assert!(success);
        }
        other => panic!("expected GenResult after restart, got {other:?}"),
    }
    assert!(pipeline.store.has(job_id).await.unwrap());
}
