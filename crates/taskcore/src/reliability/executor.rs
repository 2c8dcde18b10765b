//! Retry executor: drives attempts against a policy

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::retry::{RetryPolicy, TransientError};

/// Failure of a retried operation
#[derive(Debug, Clone, thiserror::Error)]
pub enum RetryError<E> {
    /// A single attempt exceeded the policy's per-attempt timeout
    ///
    /// Subject to the retry policy like any other failure.
    #[error("attempt timed out after {limit:?}")]
    AttemptTimeout {
        /// The configured per-attempt limit
        limit: Duration,
    },

    /// The operation itself failed; carries the last attempt's error
    #[error(transparent)]
    Operation(E),
}

impl<E: TransientError> TransientError for RetryError<E> {
    fn is_transient(&self) -> bool {
        match self {
            Self::AttemptTimeout { .. } => true,
            Self::Operation(e) => e.is_transient(),
        }
    }

    fn code(&self) -> Option<&str> {
        match self {
            Self::AttemptTimeout { .. } => Some("attempt_timeout"),
            Self::Operation(e) => e.code(),
        }
    }
}

type RetryPredicate<E> = Arc<dyn Fn(&RetryError<E>, u32) -> bool + Send + Sync>;
type ErrorHook<E> = Arc<dyn Fn(&RetryError<E>, u32) + Send + Sync>;
type SuccessHook = Arc<dyn Fn(u32) + Send + Sync>;

/// Wraps an asynchronous operation with a retry policy
///
/// Attempts are strictly sequential (never overlapping). Each attempt
/// races the policy's per-attempt timeout if one is configured; a timed
/// out attempt counts as a failure and goes through the same retry
/// decision as any other error.
///
/// # Example
///
/// ```no_run
/// use arcana_taskcore::reliability::{RetryExecutor, RetryPolicy};
///
/// # #[derive(Debug, thiserror::Error)]
/// # #[error("unreachable")]
/// # struct DbError;
/// # impl arcana_taskcore::reliability::TransientError for DbError {
/// #     fn is_transient(&self) -> bool { true }
/// # }
/// # async fn query() -> Result<u32, DbError> { Ok(7) }
/// # async fn run() {
/// let executor = RetryExecutor::new(RetryPolicy::database());
/// let rows = executor.execute(|| query()).await;
/// # }
/// ```
#[derive(Clone)]
pub struct RetryExecutor<E> {
    policy: RetryPolicy,
    should_retry: Option<RetryPredicate<E>>,
    on_error: Option<ErrorHook<E>>,
    on_success: Option<SuccessHook>,
}

impl<E> RetryExecutor<E> {
    /// Create an executor from a policy
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            should_retry: None,
            on_error: None,
            on_success: None,
        }
    }

    /// The policy driving this executor
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Override the retry decision
    ///
    /// Receives the failure and the 1-based attempt number that just
    /// failed; returning false propagates the error immediately.
    pub fn with_should_retry<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&RetryError<E>, u32) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Some(Arc::new(predicate));
        self
    }

    /// Observe each failed attempt that will be retried
    pub fn with_on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&RetryError<E>, u32) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(hook));
        self
    }

    /// Observe eventual success after at least one retry
    ///
    /// Receives the number of attempts used; does not fire for
    /// first-attempt successes.
    pub fn with_on_success<F>(mut self, hook: F) -> Self
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(hook));
        self
    }
}

impl<E: TransientError> RetryExecutor<E> {
    /// Run the operation under the retry policy
    ///
    /// Returns the operation's first successful result, or the last error
    /// once attempts are exhausted or the retry decision says stop.
    pub async fn execute<T, F, Fut>(&self, mut operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt: u32 = 1;

        loop {
            let outcome = match self.policy.per_attempt_timeout {
                Some(limit) => match tokio::time::timeout(limit, operation()).await {
                    Ok(result) => result.map_err(RetryError::Operation),
                    Err(_) => Err(RetryError::AttemptTimeout { limit }),
                },
                None => operation().await.map_err(RetryError::Operation),
            };

            match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempts_used = attempt, "operation succeeded after retry");
                        if let Some(hook) = &self.on_success {
                            hook(attempt);
                        }
                    }
                    return Ok(value);
                }
                Err(error) => {
                    let retry = self.policy.has_attempts_remaining(attempt)
                        && self.decide(&error, attempt);
                    if !retry {
                        // Final or non-retryable: propagate with no delay
                        return Err(error);
                    }

                    if let Some(hook) = &self.on_error {
                        hook(&error, attempt);
                    }

                    let delay = self.policy.delay_after_attempt(attempt);
                    warn!(
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error_summary(&error),
                        "attempt failed, retrying"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
            }
        }
    }

    fn decide(&self, error: &RetryError<E>, attempt: u32) -> bool {
        match &self.should_retry {
            Some(predicate) => predicate(error, attempt),
            None => self.policy.should_retry(error),
        }
    }
}

fn error_summary<E: TransientError>(error: &RetryError<E>) -> String {
    match error {
        RetryError::AttemptTimeout { limit } => format!("attempt timeout ({limit:?})"),
        RetryError::Operation(e) => e
            .code()
            .map(str::to_string)
            .unwrap_or_else(|| "operation error".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    #[derive(Debug, Clone, thiserror::Error)]
    #[error("flaky: {message}")]
    struct FlakyError {
        message: String,
        transient: bool,
    }

    impl TransientError for FlakyError {
        fn is_transient(&self) -> bool {
            self.transient
        }
    }

    fn transient(message: &str) -> FlakyError {
        FlakyError {
            message: message.into(),
            transient: true,
        }
    }

    fn permanent(message: &str) -> FlakyError {
        FlakyError {
            message: message.into(),
            transient: false,
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::exponential()
            .with_max_attempts(max_attempts)
            .with_base_delay(Duration::from_millis(1))
            .with_jitter(0.0)
    }

    #[tokio::test]
    async fn test_succeeds_first_attempt() {
        let executor = RetryExecutor::<FlakyError>::new(fast_policy(3));
        let calls = AtomicU32::new(0);

        let result = executor
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, FlakyError>(42) }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let executor = RetryExecutor::new(fast_policy(5));
        let calls = AtomicU32::new(0);

        let result = executor
            .execute(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(transient("not yet"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_attempts() {
        let executor = RetryExecutor::new(fast_policy(3));
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = executor
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(transient("always")) }
            })
            .await;

        assert!(matches!(
            result,
            Err(RetryError::Operation(e)) if e.message == "always"
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_fails_immediately() {
        let executor = RetryExecutor::new(fast_policy(5));
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = executor
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(permanent("bad request")) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_per_attempt_timeout_is_retried() {
        let policy = fast_policy(2).with_per_attempt_timeout(Duration::from_millis(20));
        let executor = RetryExecutor::<FlakyError>::new(policy);
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = executor
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                }
            })
            .await;

        assert!(matches!(result, Err(RetryError::AttemptTimeout { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_custom_predicate_stops_retries() {
        let executor = RetryExecutor::new(fast_policy(5)).with_should_retry(|_, attempt| attempt < 2);
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = executor
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(transient("always")) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_hooks_fire() {
        let errors_seen = Arc::new(AtomicU32::new(0));
        let success_attempts = Arc::new(AtomicU32::new(0));

        let errors = Arc::clone(&errors_seen);
        let successes = Arc::clone(&success_attempts);
        let executor = RetryExecutor::new(fast_policy(5))
            .with_on_error(move |_, _| {
                errors.fetch_add(1, Ordering::SeqCst);
            })
            .with_on_success(move |attempts| {
                successes.store(attempts, Ordering::SeqCst);
            });

        let calls = AtomicU32::new(0);
        let result = executor
            .execute(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(transient("warming up"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(errors_seen.load(Ordering::SeqCst), 2);
        assert_eq!(success_attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_on_success_skipped_for_first_attempt() {
        let success_attempts = Arc::new(AtomicU32::new(0));
        let successes = Arc::clone(&success_attempts);
        let executor = RetryExecutor::<FlakyError>::new(fast_policy(3))
            .with_on_success(move |attempts| {
                successes.store(attempts, Ordering::SeqCst);
            });

        let result = executor.execute(|| async { Ok::<_, FlakyError>(1) }).await;
        assert!(result.is_ok());
        assert_eq!(success_attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_backoff_delays_are_applied() {
        let policy = RetryPolicy::exponential()
            .with_max_attempts(3)
            .with_base_delay(Duration::from_millis(40))
            .with_jitter(0.0);
        let executor = RetryExecutor::new(policy);

        let started = Instant::now();
        let result: Result<(), _> = executor
            .execute(|| async { Err(transient("always")) })
            .await;
        assert!(result.is_err());

        // 40ms after attempt 1 + 80ms after attempt 2
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(120), "elapsed {elapsed:?}");
    }
}
