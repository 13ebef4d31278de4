//! Periodic snapshotter (spec's C3): dumps the scene store to object storage
//! as gzip-compressed newline-delimited JSON, under a stable key plus a
//! timestamped archival key. A thin `ObjectStore` trait stands in for the
//! bucket so tests don't need real AWS credentials, grounded in the
//! `Storage` trait + `PutObject` shape of the teacher-adjacent `aws_s3`
//! adapter, simplified to the single operation this spec needs.

mod s3;

pub use s3::S3ObjectStore;

use flate2::write::GzEncoder;
use flate2::Compression;
use scene_protocol::SceneRecord;
use scene_store::StoreBackend;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

pub const STABLE_KEY: &str = "snapshots/scene/latest.dump.gz";
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(300);

#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    async fn put_object(&self, key: &str, body: Vec<u8>) -> Result<(), String>;
}

/// No-op target used when `BUCKET`/credentials are unconfigured (spec.md §4.3).
pub struct NullObjectStore;

#[async_trait::async_trait]
impl ObjectStore for NullObjectStore {
    async fn put_object(&self, _key: &str, _body: Vec<u8>) -> Result<(), String> {
        Ok(())
    }
}

pub struct Snapshotter {
    store: Arc<dyn StoreBackend>,
    target: Option<Arc<dyn ObjectStore>>,
    interval: Duration,
    in_progress: Arc<AtomicBool>,
}

impl Snapshotter {
    /// `target = None` makes every tick a no-op, per spec.md §4.3.
    pub fn new(store: Arc<dyn StoreBackend>, target: Option<Arc<dyn ObjectStore>>, interval: Duration) -> Self {
        Self { store, target, interval, in_progress: Arc::new(AtomicBool::new(false)) }
    }

    /// Runs the tick loop until `shutdown` resolves. Intended to be spawned
    /// as its own task by the Supervisor; stopping it is simply dropping the
    /// task (spec.md §4.9 step 4: "snapshotter is stopped").
    pub async fn run(self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let Some(target) = self.target.clone() else {
            tracing::info!("snapshotter has no configured bucket, running as a no-op");
            return;
        };
        let mut ticker = tokio::time::interval(self.interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick(target.clone()).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    async fn tick(&self, target: Arc<dyn ObjectStore>) {
        if self.in_progress.swap(true, Ordering::SeqCst) {
            warn!("snapshot already in progress, skipping this tick");
            return;
        }
        let store = self.store.clone();
        let in_progress = self.in_progress.clone();
        tokio::spawn(async move {
            if let Err(e) = run_snapshot(store, target).await {
                error!(error = %e, "snapshot failed, will retry next interval");
            }
            in_progress.store(false, Ordering::SeqCst);
        });
    }
}

async fn run_snapshot(store: Arc<dyn StoreBackend>, target: Arc<dyn ObjectStore>) -> Result<(), String> {
    let records = store.all().await.map_err(|e| e.to_string())?;
    let body = encode_dump(&records)?;
    target.put_object(STABLE_KEY, body.clone()).await?;
    let archival_key = format!("snapshots/scene/{}.dump.gz", chrono::Utc::now().format("%Y%m%dT%H%M%SZ"));
    target.put_object(&archival_key, body).await?;
    Ok(())
}

fn encode_dump(records: &[SceneRecord]) -> Result<Vec<u8>, String> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    for record in records {
        let line = serde_json::to_vec(record).map_err(|e| e.to_string())?;
        encoder.write_all(&line).map_err(|e| e.to_string())?;
        encoder.write_all(b"\n").map_err(|e| e.to_string())?;
    }
    encoder.finish().map_err(|e| e.to_string())
}
