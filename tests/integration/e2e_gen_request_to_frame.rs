//! S1: a client submits a gen_request over the WebSocket gateway and gets
//! back both a GenResult and a Frame, end to end through the real bus,
//! worker, store, and broadcast engine -- no process boundary except the
//! in-memory doubles.

use reality_pipeline::{spawn, PipelineOpts};
use scene_protocol::{ClientMessage, ServerMessage, REALITY_STREAM_CHANNEL};
use scene_test_utils::MockWsClient;
use uuid::Uuid;

#[tokio::test]
async fn gen_request_round_trips_to_a_frame_and_a_result() {
    let pipeline = spawn(PipelineOpts::default()).await;
    let token = pipeline.token("user-1", "acme", &["reality.stream"]);
    let mut client = MockWsClient::connect_with_token(&pipeline.ws_url(), &token).await.unwrap();

    match client.recv().await.unwrap() {
        ServerMessage::Connected { tenant_id, .. } => assert_eq!(tenant_id, "acme"),
        other => panic!("expected Connected, got {other:?}"),
    }

    client
        .send(&ClientMessage::Subscribe { channel: REALITY_STREAM_CHANNEL.to_owned() })
        .await
        .unwrap();

    let job_id = Uuid::new_v4();
    client
        .send(&ClientMessage::GenRequest {
            job_id,
            payload: serde_json::json!({"scene": "hallway"}),
            deadline_ms: 5000,
        })
        .await
        .unwrap();

    let mut saw_frame = false;
    let mut saw_result = false;
    for _ in 0..2 {
        match client.recv().await.unwrap() {
            ServerMessage::Frame { scene_id, .. } => {
                assert_eq!(scene_id, job_id);
                saw_frame = true;
            }
            ServerMessage::GenResult { job_id: got, success, scene_id, .. } => {
                assert_eq!(got, job_id);
                assert!(success);
                assert_eq!(scene_id, Some(job_id));
                saw_result = true;
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }
    assert!(saw_frame && saw_result);

    let stored = pipeline.store.get(job_id).await.unwrap().unwrap();
    assert_eq!(stored.tenant_id, "acme");
}
