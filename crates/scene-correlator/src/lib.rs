//! Result correlator (spec's C6): on the submitting side, matches outgoing
//! `jobID`s against inbound `SceneResult`s on a single shared subscription to
//! `reality.gen.result`, the way `state.rs::ForwarderCommand` matches a
//! request id to a `oneshot::Sender<Reply>` on the teacher's gateway.

use scene_bus::Bus;
use scene_error::{ErrorKind, Result, ScenePipelineError};
use scene_protocol::{Envelope, SceneResult, Subject};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

type Waiters = Arc<Mutex<HashMap<Uuid, oneshot::Sender<SceneResult>>>>;

/// Default expiry for a waiter with no matching result (spec.md §4.5/§5).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Correlator {
    waiters: Waiters,
    timeout: Duration,
    _listener: tokio::task::JoinHandle<()>,
}

impl Correlator {
    /// Subscribes once to `reality.gen.result` and starts the dispatch loop.
    /// Cloning the bus handle is cheap; all callers share this one subscription.
    pub async fn new(bus: Arc<dyn Bus>, timeout: Duration) -> Result<Self> {
        let waiters: Waiters = Arc::new(Mutex::new(HashMap::new()));
        let mut sub = bus.subscribe(&Subject::GenResult, None).await?;

        let dispatch_waiters = waiters.clone();
        let listener = tokio::spawn(async move {
            while let Some(msg) = sub.next().await {
                let envelope = match Envelope::<SceneResult>::decode(&msg.payload) {
                    Ok(e) => e,
                    Err(e) => {
                        warn!(error = %e, "correlator discarding undecodable result envelope");
                        continue;
                    }
                };
                let result = envelope.body;
                let sender = dispatch_waiters.lock().await.remove(&result.job_id);
                match sender {
                    Some(tx) => {
                        let _ = tx.send(result);
                    }
                    None => {
                        debug!(job_id = %result.job_id, "no waiter for result, treating as stale/redelivered");
                    }
                }
            }
        });

        Ok(Self { waiters, timeout: timeout.max(Duration::from_millis(1)), _listener: listener })
    }

    /// Registers a waiter for `job_id` and blocks until a matching result
    /// arrives or the expiry clock fires. Only the first result for a given
    /// `jobID` is ever delivered (spec.md §5: first write wins).
    pub async fn wait_for(&self, job_id: Uuid) -> Result<SceneResult> {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().await.insert(job_id, tx);

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => {
                self.waiters.lock().await.remove(&job_id);
                Err(ScenePipelineError::new(ErrorKind::Fatal, "correlator dropped the waiter before delivery"))
            }
            Err(_) => {
                self.waiters.lock().await.remove(&job_id);
                Err(ScenePipelineError::timeout(format!(
                    "no result for job {job_id} within {:?}",
                    self.timeout
                )))
            }
        }
    }

    /// Cancels a waiter early (e.g. client disconnection). Per spec.md §5
    /// this does not affect generation already in flight -- the worker's
    /// result is simply discarded on arrival since no waiter remains.
    pub async fn cancel(&self, job_id: Uuid) {
        self.waiters.lock().await.remove(&job_id);
    }

    #[cfg(test)]
    async fn waiter_count(&self) -> usize {
        self.waiters.lock().await.len()
    }
}
