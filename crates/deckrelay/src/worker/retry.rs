//! In-process retry with exponential backoff.
//!
//! Used by the direct execution path, where no persistent queue exists
//! to re-deliver a failed attempt. The queued path gets its backoff from
//! the work store instead.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use crate::worker::ExecuteError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(initial_delay: Duration, max_attempts: u32) -> Self {
        Self {
            initial_delay,
            max_delay: Duration::from_secs(60),
            max_attempts: max_attempts.max(1),
        }
    }
}

fn next_backoff(current: Duration, max_delay: Duration) -> Duration {
    if current.is_zero() {
        return max_delay.min(Duration::from_millis(1));
    }
    current.saturating_mul(2).min(max_delay)
}

/// Runs `operation` until it succeeds, fails with a non-retryable
/// error, exhausts the policy's attempts, or `shutdown` is raised.
/// The attempt number (starting at 1) is passed to each invocation.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    shutdown: &Arc<AtomicBool>,
    mut operation: F,
) -> Result<T, ExecuteError>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, ExecuteError>>,
{
    let mut attempt = 0;
    let mut backoff = policy.initial_delay;

    loop {
        attempt += 1;

        if shutdown.load(Ordering::Relaxed) {
            return Err(ExecuteError::Transient("shutting down".to_string()));
        }

        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if !e.retryable() => return Err(e),
            Err(e) if attempt >= policy.max_attempts => {
                log::error!(
                    "Operation failed after {} attempt(s): {}",
                    attempt,
                    e
                );
                return Err(e);
            }
            Err(e) => {
                log::warn!(
                    "Attempt {}/{} failed, retrying in {:?}: {}",
                    attempt,
                    policy.max_attempts,
                    backoff,
                    e
                );
                sleep(backoff).await;
                backoff = next_backoff(backoff, policy.max_delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            max_attempts: 3,
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let shutdown = Arc::new(AtomicBool::new(false));

        let value = retry_with_backoff(&policy(), &shutdown, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(ExecuteError::Transient("flaky".to_string()))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let shutdown = Arc::new(AtomicBool::new(false));

        let result: Result<(), _> = retry_with_backoff(&policy(), &shutdown, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ExecuteError::Transient("down".to_string())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_validation_error_aborts_immediately() {
        let calls = AtomicU32::new(0);
        let shutdown = Arc::new(AtomicBool::new(false));

        let result: Result<(), _> = retry_with_backoff(&policy(), &shutdown, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ExecuteError::Validation("bad payload".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(ExecuteError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_retries() {
        let shutdown = Arc::new(AtomicBool::new(true));

        let result: Result<(), _> = retry_with_backoff(&policy(), &shutdown, |_| async {
            panic!("must not run while shutting down");
        })
        .await;

        assert!(result.is_err());
    }

    #[test]
    fn test_next_backoff_doubles_and_caps() {
        let max = Duration::from_secs(8);
        assert_eq!(
            next_backoff(Duration::from_secs(2), max),
            Duration::from_secs(4)
        );
        assert_eq!(
            next_backoff(Duration::from_secs(6), max),
            Duration::from_secs(8)
        );
    }
}
