//! # Resilient Task-Execution Core
//!
//! The systems heart of the product: everything else in the repository is
//! glue over a web framework and a managed backend, while this crate owns
//! the two concerns that need real resource management.
//!
//! ## Features
//!
//! - **Execution pool**: a bounded, dynamically-scaled set of isolated
//!   worker threads for CPU-bound work, with FIFO queueing, per-task
//!   deadlines, idle reclamation and crash self-healing
//! - **Retry executor**: fixed/linear/exponential backoff with jitter and
//!   per-attempt timeouts
//! - **Circuit breakers**: per-dependency fail-fast with closed/open/
//!   half-open recovery
//! - **Composite & batch execution**: breaker-inside-retry composition and
//!   bounded-concurrency fan-out with aggregate failure reporting
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       ExecutionPool                          │
//! │  (control loop: queue, worker map, deadlines, idle sweep)   │
//! │        │ assignments                  ▲ replies              │
//! │        ▼                              │                      │
//! │  isolated worker threads (message passing only)             │
//! └─────────────────────────────────────────────────────────────┘
//!
//! ┌─────────────────────────────────────────────────────────────┐
//! │        RetryExecutor ◄── CompositeExecutor ──► CircuitBreaker│
//! │                    └── BatchRunner (groups of N)            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The two halves are independent: CPU-bound work goes through the pool,
//! flaky I/O goes through the retry stack. They share one failure-handling
//! philosophy: bounded retries, explicit timeouts, graceful degradation,
//! and a typed failure for every outcome - callers never hang.
//!
//! ## Example
//!
//! ```no_run
//! use arcana_taskcore::prelude::*;
//! use serde_json::json;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let mut registry = HandlerRegistry::new();
//! registry.register("biorhythm", |payload| {
//!     // CPU-heavy calculation, runs on a worker thread
//!     Ok(json!({ "input": payload }))
//! });
//!
//! let pool = ExecutionPool::new(registry, PoolConfig::default())?;
//! let outcome = pool.submit("biorhythm", json!({ "born": "1990-04-01" })).await?;
//! pool.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod pool;
pub mod reliability;

/// Prelude for common imports
pub mod prelude {
    pub use crate::pool::{
        ExecutionPool, HandlerRegistry, PoolConfig, PoolStatus, Task, TaskError,
    };
    pub use crate::reliability::{
        retry_batch, AggregateBatchError, BackoffKind, BatchRunner, CircuitBreaker,
        CircuitBreakerConfig, CircuitError, CircuitOpenError, CircuitState, CompositeExecutor,
        RetryError, RetryExecutor, RetryPolicy, TransientError,
    };
}

// Re-export key types at crate root
pub use pool::{ExecutionPool, HandlerRegistry, PoolConfig, PoolStatus, TaskError};
pub use reliability::{
    BatchRunner, CircuitBreaker, CircuitBreakerConfig, CompositeExecutor, RetryExecutor,
    RetryPolicy,
};
