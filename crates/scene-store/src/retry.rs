use rand::Rng;
use scene_error::{ErrorKind, ScenePipelineError};
use std::future::Future;
use std::time::Duration;

const BASE: Duration = Duration::from_millis(100);
const CAP: Duration = Duration::from_secs(5);
const MAX_ATTEMPTS: u32 = 5;

/// Retries `f` with exponential backoff (base 100ms, cap 5s, jitter ±20%,
/// max 5 attempts), but only while the error is `ErrorKind::Transient`.
/// Any other kind returns immediately.
pub async fn with_retry<T, F, Fut>(mut f: F) -> Result<T, ScenePipelineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ScenePipelineError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) if e.kind() == ErrorKind::Transient && attempt < MAX_ATTEMPTS => {
                let backoff = backoff_for(attempt);
                tracing::warn!(attempt, ?backoff, error = %e, "transient store error, retrying");
                tokio::time::sleep(backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}

fn backoff_for(attempt: u32) -> Duration {
    let exp = BASE.saturating_mul(1 << (attempt - 1).min(16));
    let capped = exp.min(CAP);
    let jitter_frac = rand::thread_rng().gen_range(-0.2..=0.2);
    let jittered_ms = (capped.as_millis() as f64) * (1.0 + jitter_frac);
    Duration::from_millis(jittered_ms.max(0.0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn succeeds_without_retry_on_first_ok() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result: Result<i32, ScenePipelineError> = with_retry(|| {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result: Result<i32, ScenePipelineError> = with_retry(|| {
            let calls = calls2.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(ScenePipelineError::transient("connection reset"))
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_non_transient_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result: Result<i32, ScenePipelineError> = with_retry(|| {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ScenePipelineError::invalid_request("bad input"))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let result: Result<i32, ScenePipelineError> = with_retry(|| {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ScenePipelineError::transient("still down"))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }
}
