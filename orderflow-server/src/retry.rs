//! Bounded exponential backoff with jitter, cancellable between attempts

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Retry behavior parameters
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first; 0 behaves as 1
    pub attempts: u32,
    pub base: Duration,
    pub max: Duration,
    /// Each wait is multiplied by a uniform sample in `[1 - jitter, 1 + jitter]`
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            base: Duration::from_millis(100),
            max: Duration::from_secs(5),
            jitter_factor: 0.3,
        }
    }
}

#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("cancelled while retrying")]
    Cancelled,
    /// All attempts failed; carries the last operation failure
    #[error(transparent)]
    Exhausted(E),
}

/// Run `op` under `policy`, sleeping between failed attempts.
///
/// Cancellation during a backoff wait aborts immediately without running the
/// operation again.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = policy.attempts.max(1);
    let mut delay = policy.base.min(policy.max);

    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt == attempts {
                    return Err(RetryError::Exhausted(err));
                }
                tokio::select! {
                    _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                    _ = tokio::time::sleep(jittered(delay, policy)) => {}
                }
                delay = (delay * 2).min(policy.max);
            }
        }
    }
    unreachable!("loop returns on the final attempt")
}

fn jittered(delay: Duration, policy: &RetryPolicy) -> Duration {
    if policy.jitter_factor <= 0.0 {
        return delay.min(policy.max);
    }
    let factor = rand::thread_rng()
        .gen_range(1.0 - policy.jitter_factor..=1.0 + policy.jitter_factor);
    delay.mul_f64(factor.max(0.0)).min(policy.max)
}
