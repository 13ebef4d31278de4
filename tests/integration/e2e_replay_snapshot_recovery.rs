//! S2: after scenes are generated and persisted, the snapshotter dumps the
//! store to object storage under the stable key, gzip/NDJSON-encoded, so a
//! fresh process can replay it to recover scene state.

use flate2::read::GzDecoder;
use reality_pipeline::{spawn, PipelineOpts};
use scene_protocol::{ClientMessage, ServerMessage};
use scene_snapshotter::{ObjectStore, STABLE_KEY};
use scene_test_utils::MockWsClient;
use std::io::Read;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

#[derive(Default)]
struct RecordingTarget {
    puts: Mutex<Vec<(String, Vec<u8>)>>,
}

#[async_trait::async_trait]
impl ObjectStore for RecordingTarget {
    async fn put_object(&self, key: &str, body: Vec<u8>) -> Result<(), String> {
        self.puts.lock().unwrap().push((key.to_owned(), body));
        Ok(())
    }
}

#[tokio::test]
async fn snapshot_contains_every_scene_the_worker_persisted() {
    let target = Arc::new(RecordingTarget::default());
    let mut opts = PipelineOpts::default();
    opts.object_store = Some(target.clone() as Arc<dyn ObjectStore>);
    opts.snapshot_interval = Duration::from_millis(50);
    let pipeline = spawn(opts).await;

    let token = pipeline.token("user-1", "acme", &[]);
    let mut client = MockWsClient::connect_with_token(&pipeline.ws_url(), &token).await.unwrap();
    client.recv().await.unwrap(); // Connected

    let job_id = Uuid::new_v4();
    client
        .send(&ClientMessage::GenRequest { job_id, payload: serde_json::json!({"scene": "a"}), deadline_ms: 5000 })
        .await
        .unwrap();
    match client.recv().await.unwrap() {
        ServerMessage::GenResult { success, .. } => assert!(success),
        other => panic!("expected GenResult, got {other:?}"),
    }

    // Wait out a couple of snapshot ticks.
    tokio::time::sleep(Duration::from_millis(250)).await;

    let puts = target.puts.lock().unwrap();
    assert!(!puts.is_empty(), "snapshotter should have taken at least one tick");
    let (_, body) = puts.iter().find(|(key, _)| key == STABLE_KEY).unwrap();

    let mut decoder = GzDecoder::new(&body[..]);
    let mut out = String::new();
    decoder.read_to_string(&mut out).unwrap();
    assert!(out.contains(&job_id.to_string()), "dump should contain the persisted scene's id");
}
