//! Batch runner: bounded-concurrency fan-out of retry-wrapped operations

use std::future::Future;

use futures::future::join_all;
use tracing::{debug, warn};

use super::executor::{RetryError, RetryExecutor};
use super::retry::{RetryPolicy, TransientError};

/// Default number of operations run in parallel per group
pub const DEFAULT_BATCH_CONCURRENCY: usize = 3;

/// Aggregate failure from a batch run
///
/// Carries every per-index failure plus the partial results, so callers
/// that can use partial successes consult `results` before treating the
/// whole batch as failed. Indices refer to the original operation order.
#[derive(Debug, thiserror::Error)]
#[error("batch completed with {} failure(s) out of {total} operation(s)", failures.len())]
pub struct AggregateBatchError<T, E>
where
    T: std::fmt::Debug,
    E: std::fmt::Debug,
{
    /// Number of operations in the batch
    pub total: usize,

    /// Per-operation results; `None` at every failed index
    pub results: Vec<Option<T>>,

    /// Every failure with its original operation index
    pub failures: Vec<(usize, RetryError<E>)>,
}

/// Runs many independent retry-wrapped operations with a hard concurrency
/// ceiling
///
/// Operations are partitioned into fixed-size groups; each group runs with
/// full parallelism and the next group starts only once the whole group
/// settled. There is no ordering guarantee inside a group and no guarantee
/// across groups beyond group sequencing.
///
/// # Example
///
/// ```no_run
/// use arcana_taskcore::reliability::{BatchRunner, RetryPolicy};
///
/// # #[derive(Debug, thiserror::Error)]
/// # #[error("api error")]
/// # struct ApiError;
/// # impl arcana_taskcore::reliability::TransientError for ApiError {
/// #     fn is_transient(&self) -> bool { true }
/// # }
/// # async fn fetch(region: &str) -> Result<String, ApiError> { Ok(region.into()) }
/// # async fn run() {
/// let runner = BatchRunner::new(RetryPolicy::external_service()).with_concurrency(2);
/// let ops: Vec<_> = ["eu", "us", "ap"]
///     .into_iter()
///     .map(|region| move || fetch(region))
///     .collect();
///
/// match runner.run(ops).await {
///     Ok(results) => println!("all {} succeeded", results.len()),
///     Err(aggregate) => {
///         for (index, error) in &aggregate.failures {
///             eprintln!("op {index} failed: {error}");
///         }
///     }
/// }
/// # }
/// ```
pub struct BatchRunner<E> {
    executor: RetryExecutor<E>,
    concurrency: usize,
}

impl<E: TransientError> BatchRunner<E> {
    /// Create a batch runner from a retry policy
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            executor: RetryExecutor::new(policy),
            concurrency: DEFAULT_BATCH_CONCURRENCY,
        }
    }

    /// Create a batch runner from a fully configured retry executor
    pub fn with_executor(executor: RetryExecutor<E>) -> Self {
        Self {
            executor,
            concurrency: DEFAULT_BATCH_CONCURRENCY,
        }
    }

    /// Set the per-group concurrency ceiling
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Run every operation, retrying each per the policy
    ///
    /// Returns the results in operation order, or an
    /// [`AggregateBatchError`] if any operation ultimately failed after
    /// exhausting its retries.
    pub async fn run<T, F, Fut>(&self, ops: Vec<F>) -> Result<Vec<T>, AggregateBatchError<T, E>>
    where
        T: std::fmt::Debug,
        E: std::fmt::Debug,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let total = ops.len();
        let mut results: Vec<Option<T>> = Vec::with_capacity(total);
        results.resize_with(total, || None);
        let mut failures: Vec<(usize, RetryError<E>)> = Vec::new();

        debug!(total, concurrency = self.concurrency, "starting batch");

        let mut ops = ops.into_iter().enumerate();
        loop {
            let group: Vec<(usize, F)> = ops.by_ref().take(self.concurrency).collect();
            if group.is_empty() {
                break;
            }

            let settled = join_all(group.into_iter().map(|(index, op)| {
                let executor = &self.executor;
                async move { (index, executor.execute(op).await) }
            }))
            .await;

            for (index, outcome) in settled {
                match outcome {
                    Ok(value) => results[index] = Some(value),
                    Err(error) => failures.push((index, error)),
                }
            }
        }

        if failures.is_empty() {
            Ok(results.into_iter().flatten().collect())
        } else {
            warn!(
                total,
                failed = failures.len(),
                "batch completed with failures"
            );
            failures.sort_by_key(|(index, _)| *index);
            Err(AggregateBatchError {
                total,
                results,
                failures,
            })
        }
    }
}

/// Convenience form: run a batch with a policy and concurrency ceiling
pub async fn retry_batch<T, E, F, Fut>(
    ops: Vec<F>,
    policy: RetryPolicy,
    concurrency: usize,
) -> Result<Vec<T>, AggregateBatchError<T, E>>
where
    T: std::fmt::Debug,
    E: TransientError + std::fmt::Debug,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    BatchRunner::new(policy)
        .with_concurrency(concurrency)
        .run(ops)
        .await
}
