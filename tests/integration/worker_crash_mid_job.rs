//! If a worker replica goes away before it can finish a job, a surviving
//! (or freshly started) replica in the same queue group must still pick up
//! and complete the work, and repeated redelivery of the same jobID must
//! never produce more than one persisted record.

use reality_pipeline::{spawn, PipelineOpts};
use scene_generator::PlaceholderGenerator;
use scene_protocol::{Envelope, SceneRequest, Subject};
use scene_store::StoreBackend;
use scene_worker::Worker;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[tokio::test]
async fn a_replacement_worker_completes_the_job_after_the_original_goes_away() {
    let pipeline = spawn(PipelineOpts { worker_count: 1, ..PipelineOpts::default() }).await;

    // The original replica "crashes": stop it before it can ever see work.
    pipeline.stop_worker();
    tokio::time::sleep(Duration::from_millis(20)).await;

    // A replacement replica starts against the same bus/store, the way a
    // supervisor would restart a crashed worker process. The original's
    // queue-group slot is still present on the mock bus (there is no
    // explicit unsubscribe), so deliveries alternate between it and this
    // new replica; redelivering the request is what eventually lands it on
    // a live consumer, the same way a real at-least-once bus keeps
    // redelivering until an active consumer acks.
    let replacement = Arc::new(Worker::new(
        pipeline.bus.clone(),
        pipeline.store.clone(),
        Arc::new(PlaceholderGenerator),
        "replacement-worker",
        Duration::from_secs(5),
    ));
    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(replacement.run(4, shutdown_rx));

    let job_id = Uuid::new_v4();
    let now = chrono::Utc::now();
    let request = SceneRequest {
        job_id,
        tenant_id: "acme".to_owned(),
        payload: serde_json::json!({"scene": "corridor"}),
        deadline: now + chrono::Duration::seconds(5),
        submitted_at: now,
    };
    let bytes = Envelope::new(&Subject::GenRequest, request).encode().unwrap();

    let mut persisted = false;
    for _ in 0..10 {
        pipeline.bus.publish(&Subject::GenRequest, bytes.clone()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        if pipeline.store.has(job_id).await.unwrap() {
            persisted = true;
            break;
        }
    }
    assert!(persisted, "replacement worker should eventually have completed the crashed job");

    // A few more redeliveries of the identical request must not double-persist
    // regardless of which queue-group member happens to receive them.
    for _ in 0..3 {
        pipeline.bus.publish(&Subject::GenRequest, bytes.clone()).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    let all = pipeline.store.all().await.unwrap();
    assert_eq!(all.iter().filter(|r| r.scene_id == job_id).count(), 1);
}
