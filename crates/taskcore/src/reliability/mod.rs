//! Reliability patterns for calls to flaky external dependencies
//!
//! This module provides:
//! - [`RetryPolicy`] / [`RetryExecutor`] - Configurable retry with
//!   fixed/linear/exponential backoff and jitter
//! - [`CircuitBreaker`] - Per-dependency failure detection and fail-fast
//! - [`CompositeExecutor`] - Circuit breaker composed inside retries
//! - [`BatchRunner`] - Bounded-concurrency fan-out with aggregate failures
//!
//! All failures flow through the [`TransientError`] classification trait so
//! retry decisions work uniformly across the stack.

mod batch;
mod circuit_breaker;
mod composite;
mod executor;
mod presets;
mod retry;

pub use batch::{retry_batch, AggregateBatchError, BatchRunner, DEFAULT_BATCH_CONCURRENCY};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitError, CircuitOpenError, CircuitState,
};
pub use composite::CompositeExecutor;
pub use executor::{RetryError, RetryExecutor};
pub use retry::{BackoffKind, RetryPolicy, TransientError};
