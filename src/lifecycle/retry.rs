// ============================================================================
// Broker Call Retry Logic
// ============================================================================
//
// Uniform backoff policy for broker write operations (topic/subscription
// create and mutate, publish). Never applied to message-level decode or
// handler logic — redelivery is the retry mechanism there.
//
// ============================================================================

use carrier_error::AppResult;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// Exponential backoff schedule for one operation
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub multiplier: u32,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl BackoffPolicy {
    /// The fixed call policy for broker write operations: 1000 ms initial
    /// delay, doubling, capped at 10 s, 5 attempts total.
    pub const fn broker_write() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            multiplier: 2,
            max_delay: Duration::from_millis(10_000),
            max_attempts: 5,
        }
    }

    /// Delay to sleep after a failed attempt (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// Execute a broker operation with retry and exponential backoff
///
/// # Arguments
/// * `operation_name` - Name of the operation for logging
/// * `policy` - Backoff schedule to apply
/// * `operation` - Async closure performing the broker call
///
/// # Returns
/// Result with the operation result, or the last error once attempts are
/// exhausted
pub async fn call_with_backoff<F, Fut, T>(
    operation_name: &str,
    policy: &BackoffPolicy,
    mut operation: F,
) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    for attempt in 1..=policy.max_attempts {
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    info!(
                        operation = operation_name,
                        attempt = attempt,
                        "Broker operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(e) => {
                if attempt == policy.max_attempts {
                    warn!(
                        operation = operation_name,
                        attempt = attempt,
                        error = %e,
                        "Broker operation failed, attempts exhausted"
                    );
                    return Err(e);
                }
                let delay = policy.delay_for(attempt);
                warn!(
                    operation = operation_name,
                    attempt = attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Broker operation failed, will retry"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }

    unreachable!()
}

#[cfg(test)]
mod tests {
    use super::*;
    use carrier_error::AppError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_schedule() {
        let policy = BackoffPolicy::broker_write();
        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(4000));
        assert_eq!(policy.delay_for(4), Duration::from_millis(8000));
        // capped
        assert_eq!(policy.delay_for(5), Duration::from_millis(10_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let attempts = AtomicU32::new(0);
        let result = call_with_backoff("test_op", &BackoffPolicy::broker_write(), || {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(AppError::broker("transient"))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let attempts = AtomicU32::new(0);
        let result: AppResult<()> =
            call_with_backoff("test_op", &BackoffPolicy::broker_write(), || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(AppError::broker("down")) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 5);
    }
}
