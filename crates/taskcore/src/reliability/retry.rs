//! Retry policy: backoff computation and error classification

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Classification of errors for retry decisions
///
/// Domain errors carry an explicit transient flag; the default retry
/// decision only retries errors marked transient or whose [`code`] appears
/// in the policy's retryable list.
///
/// [`code`]: TransientError::code
pub trait TransientError {
    /// Whether the error is explicitly marked as transient (retryable)
    fn is_transient(&self) -> bool;

    /// Stable machine-readable code, if the error carries one
    fn code(&self) -> Option<&str> {
        None
    }
}

/// Delay strategy between retry attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    /// Constant delay: `base_delay`
    Fixed,
    /// Delay grows with the attempt number: `base_delay * attempt`
    Linear,
    /// Delay doubles per attempt: `base_delay * 2^(attempt-1)`
    Exponential,
}

/// Configuration for retrying a flaky asynchronous operation
///
/// Jitter exists to avoid synchronized retry storms across concurrent
/// callers: up to `jitter` (default 10%) of the computed delay is added,
/// uniformly sampled, before clamping to `max_delay`.
///
/// # Example
///
/// ```
/// use arcana_taskcore::reliability::{BackoffKind, RetryPolicy};
/// use std::time::Duration;
///
/// let policy = RetryPolicy::exponential()
///     .with_max_attempts(5)
///     .with_base_delay(Duration::from_millis(100))
///     .with_max_delay(Duration::from_secs(10));
///
/// // first retry after ~100ms, then ~200ms, ~400ms, ...
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial one)
    pub max_attempts: u32,

    /// Base delay fed into the backoff formula
    #[serde(with = "duration_millis")]
    pub base_delay: Duration,

    /// Backoff strategy
    pub backoff: BackoffKind,

    /// Cap applied to the computed (jittered) delay
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,

    /// Jitter factor (0.0-1.0); the sampled jitter is in `[0, jitter * delay)`
    pub jitter: f64,

    /// Deadline for each individual attempt (None = unbounded attempt)
    #[serde(default, with = "option_duration_millis")]
    pub per_attempt_timeout: Option<Duration>,

    /// Error codes known to be transient for this dependency class
    #[serde(default)]
    pub retryable_codes: Vec<String>,

    /// Error codes that must never be retried
    #[serde(default)]
    pub non_retryable_codes: Vec<String>,

    /// Whether to retry errors with no classification at all
    ///
    /// False for the default policy; the operator presets for known
    /// dependency classes (database, cache, external services) enable it.
    #[serde(default)]
    pub retry_unclassified: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl RetryPolicy {
    /// Exponential backoff with sensible defaults
    ///
    /// - 3 max attempts
    /// - 100ms base delay
    /// - 10 second max delay
    /// - 10% jitter
    pub fn exponential() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            backoff: BackoffKind::Exponential,
            max_delay: Duration::from_secs(10),
            jitter: 0.1,
            per_attempt_timeout: None,
            retryable_codes: vec![],
            non_retryable_codes: vec![],
            retry_unclassified: false,
        }
    }

    /// Fixed-interval retries (no backoff growth, no jitter)
    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: interval,
            backoff: BackoffKind::Fixed,
            max_delay: interval,
            jitter: 0.0,
            per_attempt_timeout: None,
            retryable_codes: vec![],
            non_retryable_codes: vec![],
            retry_unclassified: false,
        }
    }

    /// A policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            backoff: BackoffKind::Fixed,
            max_delay: Duration::ZERO,
            jitter: 0.0,
            per_attempt_timeout: None,
            retryable_codes: vec![],
            non_retryable_codes: vec![],
            retry_unclassified: false,
        }
    }

    /// Set the maximum number of attempts
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set the base delay
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the backoff strategy
    pub fn with_backoff(mut self, backoff: BackoffKind) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the delay cap
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the jitter factor (0.0-1.0)
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Set the per-attempt timeout
    pub fn with_per_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.per_attempt_timeout = Some(timeout);
        self
    }

    /// Add a code known to be transient
    pub fn with_retryable_code(mut self, code: impl Into<String>) -> Self {
        self.retryable_codes.push(code.into());
        self
    }

    /// Add a code that must never be retried
    pub fn with_non_retryable_code(mut self, code: impl Into<String>) -> Self {
        self.non_retryable_codes.push(code.into());
        self
    }

    /// Retry errors that carry no classification
    pub fn with_retry_unclassified(mut self, enabled: bool) -> Self {
        self.retry_unclassified = enabled;
        self
    }

    /// Delay to sleep after attempt `attempt` fails (1-based)
    ///
    /// Computes the backoff for the attempt that just failed, adds up to
    /// `jitter` of it, then clamps to `max_delay`.
    pub fn delay_after_attempt(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let base = self.base_delay.as_secs_f64();
        let computed = match self.backoff {
            BackoffKind::Fixed => base,
            BackoffKind::Linear => base * attempt as f64,
            BackoffKind::Exponential => base * 2f64.powi(attempt as i32 - 1),
        };

        let jittered = if self.jitter > 0.0 {
            let mut rng = rand::thread_rng();
            computed * (1.0 + rng.gen_range(0.0..self.jitter))
        } else {
            computed
        };

        Duration::from_secs_f64(jittered.min(self.max_delay.as_secs_f64()))
    }

    /// Whether another attempt is allowed after `current_attempt`
    pub fn has_attempts_remaining(&self, current_attempt: u32) -> bool {
        current_attempt < self.max_attempts
    }

    /// Default retry decision for a classified error
    ///
    /// Non-retryable codes always win; explicitly transient errors and
    /// known retryable codes retry; unclassified errors retry only when
    /// `retry_unclassified` is set.
    pub fn should_retry<E: TransientError>(&self, error: &E) -> bool {
        if let Some(code) = error.code() {
            if self.non_retryable_codes.iter().any(|c| c == code) {
                return false;
            }
            if error.is_transient() {
                return true;
            }
            self.retryable_codes.iter().any(|c| c == code)
        } else if error.is_transient() {
            true
        } else {
            self.retry_unclassified
        }
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Serde support for Option<Duration> as milliseconds
mod option_duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => d.as_millis().serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis: Option<u64> = Option::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct FakeError {
        transient: bool,
        code: Option<&'static str>,
    }

    impl TransientError for FakeError {
        fn is_transient(&self) -> bool {
            self.transient
        }
        fn code(&self) -> Option<&str> {
            self.code
        }
    }

    #[test]
    fn test_exponential_defaults() {
        let policy = RetryPolicy::exponential();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(100));
        assert_eq!(policy.backoff, BackoffKind::Exponential);
        assert_eq!(policy.jitter, 0.1);
    }

    #[test]
    fn test_no_retry() {
        let policy = RetryPolicy::no_retry();
        assert_eq!(policy.max_attempts, 1);
        assert!(!policy.has_attempts_remaining(1));
    }

    #[test]
    fn test_fixed_delays() {
        let policy = RetryPolicy::fixed(Duration::from_millis(250), 4);
        assert_eq!(policy.delay_after_attempt(1), Duration::from_millis(250));
        assert_eq!(policy.delay_after_attempt(3), Duration::from_millis(250));
    }

    #[test]
    fn test_linear_delays() {
        let policy = RetryPolicy::exponential()
            .with_backoff(BackoffKind::Linear)
            .with_base_delay(Duration::from_millis(100))
            .with_jitter(0.0);

        assert_eq!(policy.delay_after_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after_attempt(3), Duration::from_millis(300));
    }

    #[test]
    fn test_exponential_delays() {
        let policy = RetryPolicy::exponential()
            .with_base_delay(Duration::from_millis(100))
            .with_jitter(0.0);

        assert_eq!(policy.delay_after_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn test_jitter_bounds() {
        let policy = RetryPolicy::exponential()
            .with_base_delay(Duration::from_millis(100))
            .with_jitter(0.1);

        // jitter is additive and strictly below 10%
        for _ in 0..100 {
            let delay = policy.delay_after_attempt(1);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay < Duration::from_millis(111));
        }
    }

    #[test]
    fn test_max_delay_clamps_after_jitter() {
        let policy = RetryPolicy::exponential()
            .with_base_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(2));

        // attempt 10 would be 512s; jitter then clamp keeps it at the cap
        assert_eq!(policy.delay_after_attempt(10), Duration::from_secs(2));
    }

    #[test]
    fn test_default_retry_decision() {
        let policy = RetryPolicy::exponential().with_retryable_code("econnreset");

        assert!(policy.should_retry(&FakeError {
            transient: true,
            code: None
        }));
        assert!(policy.should_retry(&FakeError {
            transient: false,
            code: Some("econnreset")
        }));
        // unclassified, not marked transient: no retry by default
        assert!(!policy.should_retry(&FakeError {
            transient: false,
            code: None
        }));
        assert!(!policy.should_retry(&FakeError {
            transient: false,
            code: Some("invalid_input")
        }));
    }

    #[test]
    fn test_non_retryable_overrides_transient() {
        let policy = RetryPolicy::exponential().with_non_retryable_code("quota_exceeded");
        assert!(!policy.should_retry(&FakeError {
            transient: true,
            code: Some("quota_exceeded")
        }));
    }

    #[test]
    fn test_retry_unclassified() {
        let policy = RetryPolicy::exponential().with_retry_unclassified(true);
        assert!(policy.should_retry(&FakeError {
            transient: false,
            code: None
        }));
    }

    #[test]
    fn test_serialization() {
        let policy = RetryPolicy::exponential()
            .with_max_attempts(7)
            .with_per_attempt_timeout(Duration::from_secs(2))
            .with_retryable_code("timeout");

        let json = serde_json::to_string(&policy).unwrap();
        let parsed: RetryPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(policy, parsed);
    }
}
