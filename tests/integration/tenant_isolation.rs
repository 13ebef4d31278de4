//! A frame produced for one tenant must never reach another tenant's
//! subscriber, even when both are connected to the same gateway process at
//! once (spec.md §4.6: `Frame{tenant_id}` is a per-tenant subject).

use reality_pipeline::{spawn, PipelineOpts};
use scene_protocol::{ClientMessage, ServerMessage, REALITY_STREAM_CHANNEL};
use scene_test_utils::MockWsClient;
use std::time::Duration;
use uuid::Uuid;

#[tokio::test]
async fn a_tenants_frame_never_reaches_another_tenants_socket() {
    let pipeline = spawn(PipelineOpts::default()).await;

    let token_acme = pipeline.token("user-1", "acme", &["reality.stream"]);
    let token_globex = pipeline.token("user-2", "globex", &["reality.stream"]);

    let mut acme = MockWsClient::connect_with_token(&pipeline.ws_url(), &token_acme).await.unwrap();
    acme.recv().await.unwrap(); // Connected
    acme.send(&ClientMessage::Subscribe { channel: REALITY_STREAM_CHANNEL.to_owned() }).await.unwrap();

    let mut globex = MockWsClient::connect_with_token(&pipeline.ws_url(), &token_globex).await.unwrap();
    globex.recv().await.unwrap(); // Connected
    globex.send(&ClientMessage::Subscribe { channel: REALITY_STREAM_CHANNEL.to_owned() }).await.unwrap();

    let job_id = Uuid::new_v4();
    acme.send(&ClientMessage::GenRequest { job_id, payload: serde_json::json!({"scene": "vault"}), deadline_ms: 5000 })
        .await
        .unwrap();

    let mut acme_saw_frame = false;
    let mut acme_saw_result = false;
    for _ in 0..2 {
        match acme.recv().await.unwrap() {
            ServerMessage::Frame { scene_id, .. } => {
                assert_eq!(scene_id, job_id);
                acme_saw_frame = true;
            }
            ServerMessage::GenResult { job_id: got, success, .. } => {
                assert_eq!(got, job_id);
                assert!(success);
                acme_saw_result = true;
            }
            other => panic!("unexpected message on acme's socket: {other:?}"),
        }
    }
    assert!(acme_saw_frame && acme_saw_result);

    // globex subscribed to the same channel name but a different tenant;
    // nothing acme produced should ever cross over.
    let leaked = tokio::time::timeout(Duration::from_millis(200), globex.recv()).await;
    assert!(leaked.is_err(), "globex must not receive acme's frame");
}
