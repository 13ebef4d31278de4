//! scene-worker: consumes `SceneRequest`s from `reality.gen.request`, calls
//! the generator, persists successful results, and publishes a `SceneResult`
//! (plus a `Frame` on success) back onto the bus.
//!
//! Implements the state machine of spec.md §4.4 -- `DECODE → CHECK_DEADLINE →
//! GENERATE → PERSIST → PUBLISH_RESULT`, branching into `PUBLISH_ERROR` on
//! any failure -- as an explicit `JobOutcome` returned from `handle_message`,
//! mirroring `repo::events::IngestResult`'s enum-driven branching in the
//! teacher: a small enum the caller matches on, not exceptions.

use chrono::Utc;
use scene_bus::Bus;
use scene_error::ErrorKind;
use scene_generator::Generator;
use scene_protocol::{Envelope, Frame, SceneRecord, SceneRequest, SceneResult, Subject};
use scene_store::StoreBackend;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub const QUEUE_GROUP: &str = "scene-worker";

/// Outcome of processing one inbound `SceneRequest`. `None` means the
/// message was dropped before a result could be formed (e.g. undecodable
/// envelope) and nothing should be published.
#[derive(Debug, PartialEq)]
pub enum JobOutcome {
    Completed(SceneResult),
}

pub struct Worker {
    pub bus: Arc<dyn Bus>,
    pub store: Arc<dyn StoreBackend>,
    pub generator: Arc<dyn Generator>,
    pub worker_id: String,
    pub generator_max_ms: Duration,
}

impl Worker {
    pub fn new(
        bus: Arc<dyn Bus>,
        store: Arc<dyn StoreBackend>,
        generator: Arc<dyn Generator>,
        worker_id: impl Into<String>,
        generator_max_ms: Duration,
    ) -> Self {
        Self { bus, store, generator, worker_id: worker_id.into(), generator_max_ms }
    }

    /// Runs the consume loop until the bus subscription ends or `shutdown`
    /// flips true, processing up to `concurrency` messages in parallel via a
    /// `Semaphore` -- the teacher's bounded-concurrency idiom (capped `mpsc`
    /// buffers in `state.rs`/`ws_forwarder.rs`), here bounding task fan-out
    /// instead of a channel. In-flight jobs are tracked in a `JoinSet` so
    /// the caller can bound the drain on shutdown (spec.md §4.9 step 3).
    pub async fn run(self: Arc<Self>, concurrency: usize, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut sub = match self.bus.subscribe(&Subject::GenRequest, Some(QUEUE_GROUP)).await {
            Ok(sub) => sub,
            Err(e) => {
                tracing::error!(error = %e, "failed to subscribe to reality.gen.request");
                return;
            }
        };
        let semaphore = Arc::new(tokio::sync::Semaphore::new(concurrency));
        let mut in_flight = tokio::task::JoinSet::new();
        loop {
            tokio::select! {
                msg = sub.next() => {
                    let Some(msg) = msg else { break; };
                    let permit = semaphore.clone().acquire_owned().await.expect("semaphore is never closed");
                    let worker = self.clone();
                    in_flight.spawn(async move {
                        let _permit = permit;
                        worker.handle_raw(msg.payload).await;
                    });
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
            }
        }
        // Drain whatever is still in flight; the caller bounds this with
        // its own timeout and force-exits on overrun.
        while in_flight.join_next().await.is_some() {}
    }

    async fn handle_raw(&self, payload: Vec<u8>) {
        let envelope = match Envelope::<SceneRequest>::decode(&payload) {
            Ok(env) => env,
            Err(e) => {
                warn!(error = %e, "dropping undecodable reality.gen.request message");
                return;
            }
        };
        let JobOutcome::Completed(result) = self.handle_message(envelope.body).await;
        self.publish_result(result).await;
    }

    /// CHECK_DEADLINE → GENERATE → PERSIST → result construction. The
    /// message has already been decoded by the time this is called.
    #[instrument(
        name = "scene.generate",
        skip(self, request),
        fields(job_id = %request.job_id, tenant_id = %request.tenant_id, worker_id = %self.worker_id)
    )]
    pub async fn handle_message(&self, request: SceneRequest) -> JobOutcome {
        let start = Instant::now();

        if let Err(e) = request.validate() {
            return JobOutcome::Completed(self.failure(&request, e.to_string(), start, Utc::now()));
        }

        let now = Utc::now();
        if request.is_expired(now) {
            return JobOutcome::Completed(self.failure(
                &request,
                "expired: deadline passed before generation".to_owned(),
                start,
                now,
            ));
        }

        let remaining = (request.deadline - now).to_std().unwrap_or(Duration::ZERO);
        let budget = remaining.min(self.generator_max_ms);
        let cancel = CancellationToken::new();
        let timer = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(budget).await;
                cancel.cancel();
            })
        };
        let gen_result = self.generator.generate(request.payload.clone(), cancel).await;
        timer.abort();

        let produced_at = Utc::now();
        let latency_ms = elapsed_ms(start);

        let result = match gen_result {
            Ok(scene) => {
                let scene_id = request.job_id;
                let record = SceneRecord {
                    scene_id,
                    tenant_id: request.tenant_id.clone(),
                    scene: scene.clone(),
                    created_at: produced_at,
                    produced_by: self.worker_id.clone(),
                };
                self.persist_idempotent(record).await;
                self.publish_frame(&request.tenant_id, scene_id, &scene).await;
                SceneResult::success(request.job_id, scene_id, scene, &self.worker_id, latency_ms, produced_at)
            }
            Err(e) if e.kind() == ErrorKind::Timeout => {
                SceneResult::failure(request.job_id, format!("timeout: {e}"), &self.worker_id, latency_ms, produced_at)
            }
            Err(e) => SceneResult::failure(request.job_id, e.to_string(), &self.worker_id, latency_ms, produced_at),
        };

        scene_telemetry::metrics::record_scene_gen(result.success, latency_ms);
        info!(success = result.success, latency_ms, "scene.generate complete");
        JobOutcome::Completed(result)
    }

    fn failure(
        &self,
        request: &SceneRequest,
        message: String,
        start: Instant,
        produced_at: chrono::DateTime<Utc>,
    ) -> SceneResult {
        let latency_ms = elapsed_ms(start);
        scene_telemetry::metrics::record_scene_gen(false, latency_ms);
        SceneResult::failure(request.job_id, message, &self.worker_id, latency_ms, produced_at)
    }

    /// Idempotency per spec.md §4.4: `Has(sceneID)` before `Put`, so a
    /// redelivered message (at-least-once bus) does not double-write. The
    /// worker derives `sceneID` from `jobID` so redeliveries land on the
    /// same key.
    #[instrument(name = "scene.persist", skip(self, record), fields(scene_id = %record.scene_id))]
    async fn persist_idempotent(&self, record: SceneRecord) {
        match self.store.has(record.scene_id).await {
            Ok(true) => {}
            Ok(false) => {
                if let Err(e) = self.store.put(record).await {
                    warn!(error = %e, "failed to persist scene record");
                }
            }
            Err(e) => warn!(error = %e, "failed to check scene record existence"),
        }
    }

    async fn publish_frame(&self, tenant_id: &str, scene_id: Uuid, scene: &serde_json::Value) {
        let frame = Frame {
            scene_id,
            tenant_id: tenant_id.to_owned(),
            seq: next_seq(),
            ts: Utc::now(),
            body: scene.clone(),
        };
        let subject = Subject::Frame { tenant_id: tenant_id.to_owned() };
        let envelope = Envelope::new(&subject, frame);
        match envelope.encode() {
            Ok(bytes) => {
                if let Err(e) = self.bus.publish(&subject, bytes).await {
                    scene_telemetry::metrics::record_bus_publish_error();
                    warn!(error = %e, "failed to publish frame");
                }
            }
            Err(e) => warn!(error = %e, "failed to encode frame"),
        }
    }

    async fn publish_result(&self, result: SceneResult) {
        let envelope = Envelope::new(&Subject::GenResult, result);
        match envelope.encode() {
            Ok(bytes) => {
                if let Err(e) = self.bus.publish(&Subject::GenResult, bytes).await {
                    scene_telemetry::metrics::record_bus_publish_error();
                    warn!(error = %e, "failed to publish gen result");
                }
            }
            Err(e) => warn!(error = %e, "failed to encode gen result"),
        }
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Monotonic per-process frame sequence. This worker is stateless and
/// replicated, so `seq` is only ordered within one replica's output, not
/// globally across the tenant -- acceptable per spec.md §3's framing of
/// `seq` as "assigned by the producer (the worker, today)".
fn next_seq() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static SEQ: AtomicU64 = AtomicU64::new(0);
    SEQ.fetch_add(1, Ordering::Relaxed)
}
