//! A generator that never returns must still produce a bounded GenResult --
//! the worker's deadline/generator_max_ms budget cancels it and reports
//! ErrorKind::Timeout rather than hanging the caller forever.

use reality_pipeline::{spawn, PipelineOpts};
use scene_generator::MockGenerator;
use scene_protocol::{ClientMessage, ServerMessage};
use scene_test_utils::MockWsClient;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[tokio::test]
async fn a_hung_generator_yields_a_bounded_timeout_result() {
    let mut opts = PipelineOpts::default();
    opts.generator = Arc::new(MockGenerator::hang());
    opts.generator_max_ms = Duration::from_millis(100);
    let pipeline = spawn(opts).await;

    let token = pipeline.token("user-1", "acme", &[]);
    let mut client = MockWsClient::connect_with_token(&pipeline.ws_url(), &token).await.unwrap();
    client.recv().await.unwrap(); // Connected

    let job_id = Uuid::new_v4();
    client
        .send(&ClientMessage::GenRequest { job_id, payload: serde_json::json!({}), deadline_ms: 2000 })
        .await
        .unwrap();

    let result = tokio::time::timeout(Duration::from_secs(3), client.recv()).await;
    match result.unwrap().unwrap() {
        ServerMessage::GenResult { job_id: got, success, error, .. } => {
            assert_eq!(got, job_id);
            assert!(!success);
            assert!(error.unwrap().to_lowercase().contains("timeout"));
        }
        other => panic!("expected a bounded GenResult, got {other:?}"),
    }

    assert!(!pipeline.store.has(job_id).await.unwrap(), "a timed-out job must not be persisted");
}
