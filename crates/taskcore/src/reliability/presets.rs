//! Named retry profiles for known dependency classes
//!
//! These are configuration data, not protocol: the profiles differ only in
//! attempt budgets, delays and the transient-error codes operators expect
//! from each dependency class. All of them retry unclassified errors,
//! unlike the default policy.

use std::time::Duration;

use super::retry::{BackoffKind, RetryPolicy};

impl RetryPolicy {
    /// Profile for relational database calls
    ///
    /// Short initial delay, tight attempt budget; transient codes cover
    /// connection churn and lock contention.
    pub fn database() -> Self {
        Self::exponential()
            .with_max_attempts(3)
            .with_base_delay(Duration::from_millis(50))
            .with_max_delay(Duration::from_secs(2))
            .with_per_attempt_timeout(Duration::from_secs(5))
            .with_retryable_code("connection_reset")
            .with_retryable_code("connection_refused")
            .with_retryable_code("pool_exhausted")
            .with_retryable_code("deadlock_detected")
            .with_retryable_code("serialization_failure")
            .with_retryable_code("timeout")
            .with_retry_unclassified(true)
    }

    /// Profile for cache (redis) calls
    ///
    /// Aggressive timeouts and fixed spacing: a cache that is slow is a
    /// cache miss.
    pub fn cache() -> Self {
        Self::fixed(Duration::from_millis(25), 2)
            .with_backoff(BackoffKind::Fixed)
            .with_max_delay(Duration::from_millis(100))
            .with_jitter(0.1)
            .with_per_attempt_timeout(Duration::from_millis(500))
            .with_retryable_code("connection_reset")
            .with_retryable_code("connection_refused")
            .with_retryable_code("timeout")
            .with_retry_unclassified(true)
    }

    /// Profile for third-party service calls (payment, AI, geocoding)
    ///
    /// Wider attempt budget and generous backoff ceiling; transient codes
    /// cover throttling and upstream gateway churn.
    pub fn external_service() -> Self {
        Self::exponential()
            .with_max_attempts(4)
            .with_base_delay(Duration::from_millis(250))
            .with_max_delay(Duration::from_secs(15))
            .with_per_attempt_timeout(Duration::from_secs(30))
            .with_retryable_code("rate_limited")
            .with_retryable_code("service_unavailable")
            .with_retryable_code("gateway_timeout")
            .with_retryable_code("connection_reset")
            .with_retryable_code("timeout")
            .with_retry_unclassified(true)
    }
}
