//! At-least-once delivery on the bus means a `SceneRequest` can arrive
//! twice. The worker's idempotent persistence must keep exactly one
//! `SceneRecord` per `jobID` regardless of how many times it's redelivered.

use reality_pipeline::{spawn, PipelineOpts};
use scene_protocol::{Envelope, SceneRequest, Subject};
use uuid::Uuid;

#[tokio::test]
async fn redelivering_the_same_job_id_persists_exactly_once() {
    let pipeline = spawn(PipelineOpts::default()).await;

    let job_id = Uuid::new_v4();
    let now = chrono::Utc::now();
    let request = SceneRequest {
        job_id,
        tenant_id: "acme".to_owned(),
        payload: serde_json::json!({"scene": "atrium"}),
        deadline: now + chrono::Duration::seconds(5),
        submitted_at: now,
    };
    let bytes = Envelope::new(&Subject::GenRequest, request.clone()).encode().unwrap();

    // Redeliver the identical envelope bytes three times in quick succession,
    // the way a reconnecting bus client might.
    for _ in 0..3 {
        pipeline.bus.publish(&Subject::GenRequest, bytes.clone()).await.unwrap();
    }

    let mut persisted = false;
    for _ in 0..50 {
        if pipeline.store.has(job_id).await.unwrap() {
            persisted = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert!(persisted);

    // Give any redundant deliveries time to be processed before asserting.
    tokio::time::sleep(std::time::Duration::from_millis(150)).await;
    let all = pipeline.store.all().await.unwrap();
    assert_eq!(all.iter().filter(|r| r.scene_id == job_id).count(), 1);
}
