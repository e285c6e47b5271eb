//! Bounded exponential backoff for calls to upstream services
//!
//! Transient failures are retried until the policy's attempt budget runs out;
//! permanent failures return immediately. Both the call and the backoff sleep
//! race the shutdown token.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Errors that know whether another attempt could succeed
pub trait Transient {
    fn is_transient(&self) -> bool;
}

/// Attempt budget and backoff curve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff: max_backoff.max(initial_backoff),
        }
    }

    /// Delay after the given (1-based) failed attempt: initial × 2^(attempt-1), capped
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

/// Why a retried operation gave up
#[derive(Debug)]
pub enum RetryFailure<E> {
    /// Shutdown was requested before the operation succeeded
    Cancelled,
    /// Last error, either permanent or the final transient one
    Failed { attempts: u32, error: E },
}

/// Run `operation` until it succeeds, fails permanently, or the budget is spent
pub async fn retry_transient<F, Fut, T, E>(
    operation_name: &str,
    policy: RetryPolicy,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, RetryFailure<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Transient + std::fmt::Display,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryFailure::Cancelled),
            outcome = operation(attempt) => outcome,
        };

        let error = match outcome {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if !error.is_transient() {
            tracing::debug!(
                operation = operation_name,
                attempt,
                error = %error,
                "Permanent failure, not retrying"
            );
            return Err(RetryFailure::Failed {
                attempts: attempt,
                error,
            });
        }

        if attempt >= policy.max_attempts {
            tracing::warn!(
                operation = operation_name,
                attempt,
                error = %error,
                "Retry budget exhausted"
            );
            return Err(RetryFailure::Failed {
                attempts: attempt,
                error,
            });
        }

        let delay = policy.backoff_after(attempt);
        tracing::warn!(
            operation = operation_name,
            attempt,
            backoff_ms = delay.as_millis() as u64,
            error = %error,
            "Transient failure, will retry after backoff"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryFailure::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct TestError(bool);

    impl Transient for TestError {
        fn is_transient(&self) -> bool {
            self.0
        }
    }

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "test error (transient={})", self.0)
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1), Duration::from_millis(4))
    }

    #[test]
    fn test_backoff_doubles_then_caps() {
        let policy = RetryPolicy::new(10, Duration::from_millis(100), Duration::from_millis(1000));
        assert_eq!(policy.backoff_after(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_after(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_after(4), Duration::from_millis(800));
        assert_eq!(policy.backoff_after(5), Duration::from_millis(1000));
        assert_eq!(policy.backoff_after(60), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_transient_errors_retried_until_success() {
        let cancel = CancellationToken::new();
        let result = retry_transient("op", fast_policy(5), &cancel, |attempt| async move {
            if attempt < 3 {
                Err(TestError(true))
            } else {
                Ok(attempt)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_budget_exhausted() {
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_transient("op", fast_policy(3), &cancel, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError(true)) }
        })
        .await;

        match result {
            Err(RetryFailure::Failed { attempts, error }) => {
                assert_eq!(attempts, 3);
                assert!(error.0);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_transient("op", fast_policy(5), &cancel, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError(false)) }
        })
        .await;

        assert!(matches!(result, Err(RetryFailure::Failed { attempts: 1, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_call() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<(), RetryFailure<TestError>> =
            retry_transient("op", fast_policy(5), &cancel, |_| async { Ok(()) }).await;
        assert!(matches!(result, Err(RetryFailure::Cancelled)));
    }
}
