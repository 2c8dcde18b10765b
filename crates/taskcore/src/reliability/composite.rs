//! Composite executor: circuit breaker wrapped in retries

use std::future::Future;
use std::sync::Arc;

use super::circuit_breaker::{CircuitBreaker, CircuitError};
use super::executor::{RetryError, RetryExecutor};
use super::retry::{RetryPolicy, TransientError};

/// Binds a circuit breaker around an operation and feeds the breaker's
/// outcome through a retry policy
///
/// Retries happen *inside* the breaker's current state: every attempt
/// passes through the breaker first, so a fast-failing Open breaker
/// surfaces [`CircuitError::Open`] to the policy. That error is
/// non-transient by convention (code `"circuit_open"`), so an open circuit
/// stops retrying immediately unless the policy or a custom predicate
/// explicitly opts in.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use arcana_taskcore::reliability::{
///     CircuitBreaker, CircuitBreakerConfig, CompositeExecutor, RetryPolicy,
/// };
///
/// # #[derive(Debug, thiserror::Error)]
/// # #[error("redis down")]
/// # struct CacheError;
/// # impl arcana_taskcore::reliability::TransientError for CacheError {
/// #     fn is_transient(&self) -> bool { true }
/// # }
/// # async fn get_cached() -> Result<String, CacheError> { Ok("hit".into()) }
/// # async fn run() {
/// let breaker = Arc::new(CircuitBreaker::new("redis", CircuitBreakerConfig::default()));
/// let executor = CompositeExecutor::new(breaker, RetryPolicy::cache());
///
/// let value = executor.execute(|| get_cached()).await;
/// # }
/// ```
pub struct CompositeExecutor<E> {
    breaker: Arc<CircuitBreaker>,
    retry: RetryExecutor<CircuitError<E>>,
}

impl<E: TransientError> CompositeExecutor<E> {
    /// Create a composite executor from a shared breaker and a policy
    pub fn new(breaker: Arc<CircuitBreaker>, policy: RetryPolicy) -> Self {
        Self {
            breaker,
            retry: RetryExecutor::new(policy),
        }
    }

    /// Create from a shared breaker and a fully configured retry executor
    /// (custom predicate or hooks)
    pub fn with_executor(breaker: Arc<CircuitBreaker>, retry: RetryExecutor<CircuitError<E>>) -> Self {
        Self { breaker, retry }
    }

    /// The underlying breaker
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Run the operation through breaker then retry policy
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T, RetryError<CircuitError<E>>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.retry
            .execute(|| self.breaker.execute(&operation))
            .await
    }
}
