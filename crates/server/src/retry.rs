//! Bounded retry with jittered backoff.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    /// Total number of attempts, including the first one.
    pub steps: u32,
    pub duration: Duration,
    pub factor: f64,
    pub jitter: f64,
}

impl Backoff {
    /// Short backoff used around read-modify-write cycles on stored objects.
    pub const CONFLICT: Backoff = Backoff {
        steps: 5,
        duration: Duration::from_millis(10),
        factor: 1.0,
        jitter: 0.1,
    };

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return delay;
        }
        let extra = rand::rng().random_range(0.0..=self.jitter);
        delay.mul_f64(1.0 + extra)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::CONFLICT
    }
}

/// Runs `op` until it succeeds, fails with an error `retriable` rejects, or
/// `backoff.steps` attempts have been made. The last error is returned.
pub async fn retry_on<T, E, P, F, Fut>(backoff: Backoff, retriable: P, mut op: F) -> Result<T, E>
where
    P: Fn(&E) -> bool,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut delay = backoff.duration;
    let mut attempt = 1;
    loop {
        match op().await {
            Err(err) if attempt < backoff.steps && retriable(&err) => {
                let sleep = backoff.jittered(delay);
                tracing::debug!(attempt, ?sleep, "retrying after retriable error");
                tokio::time::sleep(sleep).await;
                delay = delay.mul_f64(backoff.factor);
                attempt += 1;
            }
            result => return result,
        }
    }
}

/// [`retry_on`] specialised to optimistic-concurrency conflicts.
pub async fn retry_on_conflict<T, F, Fut>(backoff: Backoff, op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    retry_on(backoff, StoreError::is_conflict, op).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn conflict() -> StoreError {
        StoreError::Conflict {
            kind: "OAuthClientAuthorization",
            name: "alice:console".into(),
        }
    }

    #[tokio::test]
    async fn retries_conflicts_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_on_conflict(Backoff::CONFLICT, || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(conflict())
            } else {
                Ok("done")
            }
        })
        .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_steps() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_on_conflict(Backoff::CONFLICT, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(conflict())
        })
        .await;
        assert!(result.unwrap_err().is_conflict());
        assert_eq!(calls.load(Ordering::SeqCst), Backoff::CONFLICT.steps);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_on_conflict(Backoff::CONFLICT, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Backend("down".into()))
        })
        .await;
        assert!(matches!(result, Err(StoreError::Backend(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
