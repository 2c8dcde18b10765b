//! Demo: offloading CPU-bound work to the execution pool while guarding a
//! flaky dependency with the retry + circuit breaker stack.
//!
//! Run with:
//! ```sh
//! cargo run --example offload
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::info;

use arcana_taskcore::pool::{ExecutionPool, HandlerRegistry, PoolConfig};
use arcana_taskcore::reliability::{
    CircuitBreaker, CircuitBreakerConfig, CompositeExecutor, RetryPolicy, TransientError,
};

#[derive(Debug, thiserror::Error)]
#[error("lookup service unavailable")]
struct LookupError;

impl TransientError for LookupError {
    fn is_transient(&self) -> bool {
        true
    }
    fn code(&self) -> Option<&str> {
        Some("service_unavailable")
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,arcana_taskcore=debug".into()),
        )
        .init();

    // CPU-bound side: a handler registry and a small pool
    let mut registry = HandlerRegistry::new();
    registry.register("digit_sum", |payload| {
        let n = payload["n"].as_u64().unwrap_or(0);
        let mut sum = n;
        while sum >= 10 {
            sum = sum.to_string().bytes().map(|b| (b - b'0') as u64).sum();
        }
        Ok(json!({ "n": n, "digit_sum": sum }))
    });

    let pool = ExecutionPool::new(
        registry,
        PoolConfig::default()
            .with_min_workers(2)
            .with_max_workers(4)
            .with_task_timeout(Duration::from_secs(5)),
    )?;

    let mut handles = Vec::new();
    for n in [7u64, 1990, 123_456_789, 4_294_967_295] {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            pool.submit("digit_sum", json!({ "n": n })).await
        }));
    }
    for handle in handles {
        match handle.await? {
            Ok(value) => info!(%value, "task resolved"),
            Err(error) => info!(%error, "task failed"),
        }
    }

    let status = pool.status().await?;
    info!(
        live = status.live_workers,
        handled = status.tasks_handled,
        "pool status"
    );

    // I/O side: a flaky lookup behind a breaker + retries
    let breaker = Arc::new(CircuitBreaker::new(
        "lookup",
        CircuitBreakerConfig::default().with_failure_threshold(5),
    ));
    let executor = CompositeExecutor::new(
        breaker,
        RetryPolicy::external_service()
            .with_max_attempts(4)
            .with_base_delay(Duration::from_millis(50)),
    );

    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let looked_up = executor
        .execute(move || {
            let counter = Arc::clone(&counter);
            async move {
                // Fails twice, then recovers
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(LookupError)
                } else {
                    Ok("ephemeris table v12")
                }
            }
        })
        .await?;
    info!(
        value = looked_up,
        attempts = calls.load(Ordering::SeqCst),
        "lookup recovered"
    );

    pool.shutdown().await;
    Ok(())
}
