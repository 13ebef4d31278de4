//! The generator adapter (spec's C4): an opaque, CPU-bound `Generate(request,
//! state) -> (scene, success, err)` function. The "holographic reality
//! generator" algorithm itself is explicitly out of scope (spec.md §1) --
//! this crate only defines the capability boundary the worker calls through
//! and a cancellation-aware stand-in implementation.

use scene_error::{ErrorKind, Result, ScenePipelineError};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Capability the worker depends on. Chosen at wire-up by the Supervisor;
/// `real` for production, `mock` for tests (spec.md §9).
#[async_trait::async_trait]
pub trait Generator: Send + Sync + 'static {
    /// Produces a scene from `payload`. Must respect `cancel` -- once
    /// cancelled, the call should return promptly with `ErrorKind::Timeout`
    /// rather than keep running past the worker's deadline budget.
    async fn generate(&self, payload: serde_json::Value, cancel: CancellationToken) -> Result<serde_json::Value>;
}

/// Stand-in for the real generation algorithm, which spec.md treats as an
/// external collaborator. Deterministic given `payload` so tests and S1/S3
/// scenarios can assert on `sceneID`/`scene` without a real generator
/// backend wired in.
pub struct PlaceholderGenerator;

impl Default for PlaceholderGenerator {
    fn default() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl Generator for PlaceholderGenerator {
    async fn generate(&self, payload: serde_json::Value, cancel: CancellationToken) -> Result<serde_json::Value> {
        let fingerprint = fingerprint(&payload);
        let work = async move {
            serde_json::json!({
                "fingerprint": fingerprint,
                "source": payload,
            })
        };
        tokio::select! {
            scene = work => Ok(scene),
            () = cancel.cancelled() => Err(ScenePipelineError::timeout("generation cancelled before completion")),
        }
    }
}

fn fingerprint(payload: &serde_json::Value) -> String {
    let bytes = serde_json::to_vec(payload).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    hex::encode(digest)
}

/// Scriptable generator for worker tests: a fixed latency, an optional
/// forced outcome, and cancellation support so the timeout/expired paths of
/// the worker state machine (spec.md §4.4) can be exercised deterministically.
pub struct MockGenerator {
    pub delay: Duration,
    pub outcome: MockOutcome,
}

#[derive(Clone)]
pub enum MockOutcome {
    Success(serde_json::Value),
    Failure(ErrorKind, String),
    /// Never completes on its own; only cancellation resolves the call.
    Hang,
}

impl MockGenerator {
    pub fn success(delay: Duration, scene: serde_json::Value) -> Self {
        Self { delay, outcome: MockOutcome::Success(scene) }
    }

    pub fn failure(delay: Duration, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { delay, outcome: MockOutcome::Failure(kind, message.into()) }
    }

    pub fn hang() -> Self {
        Self { delay: Duration::MAX, outcome: MockOutcome::Hang }
    }
}

#[async_trait::async_trait]
impl Generator for MockGenerator {
    async fn generate(&self, _payload: serde_json::Value, cancel: CancellationToken) -> Result<serde_json::Value> {
        let sleep = async {
            if matches!(self.outcome, MockOutcome::Hang) {
                std::future::pending::<()>().await;
            } else {
                tokio::time::sleep(self.delay).await;
            }
        };
        tokio::select! {
            () = sleep => match &self.outcome {
                MockOutcome::Success(scene) => Ok(scene.clone()),
                MockOutcome::Failure(kind, message) => Err(ScenePipelineError::new(*kind, message.clone())),
                MockOutcome::Hang => unreachable!("hang never resolves the sleep branch"),
            },
            () = cancel.cancelled() => Err(ScenePipelineError::timeout("generation exceeded cap and was cancelled")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn placeholder_generator_is_deterministic_on_payload() {
        let gen = PlaceholderGenerator;
        let payload = serde_json::json!({"scene": "alpha"});
        let a = gen.generate(payload.clone(), CancellationToken::new()).await.unwrap();
        let b = gen.generate(payload, CancellationToken::new()).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn mock_generator_returns_scripted_success() {
        let gen = MockGenerator::success(Duration::from_millis(1), serde_json::json!({"x": 1}));
        let scene = gen.generate(serde_json::json!({}), CancellationToken::new()).await.unwrap();
        assert_eq!(scene, serde_json::json!({"x": 1}));
    }

    #[tokio::test]
    async fn mock_generator_respects_cancellation() {
        let gen = MockGenerator::hang();
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel2.cancel();
        });
        let err = gen.generate(serde_json::json!({}), cancel).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn mock_generator_surfaces_scripted_failure_kind() {
        let gen = MockGenerator::failure(Duration::from_millis(1), ErrorKind::InvalidRequest, "bad payload");
        let err = gen.generate(serde_json::json!({}), CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }
}
