//! Per-dependency circuit breaker
//!
//! Protects flaky external dependencies (databases, caches, third-party
//! APIs) from being hammered while they are failing: once failures exceed
//! a threshold the circuit "opens" and calls fail fast without invoking
//! the dependency.
//!
//! # State machine
//!
//! ```text
//! ┌─────────┐  failure threshold  ┌─────────┐  recovery timeout  ┌──────────┐
//! │ Closed  │ ──────────────────► │  Open   │ ─────────────────► │ HalfOpen │
//! └─────────┘                     └─────────┘                    └──────────┘
//!      ▲                               ▲                              │
//!      │     3 consecutive successes   │        any failure          │
//!      └───────────────────────────────┴──────────────────────────────┘
//! ```
//!
//! No other edges exist.

use std::future::Future;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::retry::TransientError;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - all calls pass through
    Closed,

    /// Failure threshold exceeded - all calls rejected without invoking
    /// the operation
    Open,

    /// Testing if the dependency recovered - calls are attempted
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Circuit breaker configuration
///
/// # Example
///
/// ```
/// use arcana_taskcore::reliability::CircuitBreakerConfig;
/// use std::time::Duration;
///
/// let config = CircuitBreakerConfig::default()
///     .with_failure_threshold(5)
///     .with_recovery_timeout(Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Failures required to open the circuit
    pub failure_threshold: u32,

    /// Consecutive half-open successes required to close the circuit
    pub success_threshold: u32,

    /// Time since the last failure before a trial call is allowed
    #[serde(with = "duration_millis")]
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new circuit breaker configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the failure threshold to open the circuit
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Set the half-open success threshold to close the circuit
    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold.max(1);
        self
    }

    /// Set the recovery timeout
    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }
}

/// Fail-fast rejection: the circuit is open and the operation was never
/// invoked
#[derive(Debug, Clone, thiserror::Error)]
#[error("circuit breaker '{name}' is open")]
pub struct CircuitOpenError {
    /// Name of the protected dependency
    pub name: String,
}

impl TransientError for CircuitOpenError {
    // Not transient by convention: retrying into an open circuit is
    // pointless unless a policy explicitly opts in via the code below.
    fn is_transient(&self) -> bool {
        false
    }

    fn code(&self) -> Option<&str> {
        Some("circuit_open")
    }
}

/// Failure of a breaker-protected operation
#[derive(Debug, Clone, thiserror::Error)]
pub enum CircuitError<E> {
    /// Rejected without invoking the operation
    #[error(transparent)]
    Open(#[from] CircuitOpenError),

    /// The operation was invoked and failed
    #[error(transparent)]
    Operation(E),
}

impl<E: TransientError> TransientError for CircuitError<E> {
    fn is_transient(&self) -> bool {
        match self {
            Self::Open(e) => e.is_transient(),
            Self::Operation(e) => e.is_transient(),
        }
    }

    fn code(&self) -> Option<&str> {
        match self {
            Self::Open(e) => e.code(),
            Self::Operation(e) => e.code(),
        }
    }
}

/// Mutable breaker state, guarded by a single short-critical-section mutex
#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    last_failure_at: Option<Instant>,
}

/// A per-dependency failure detector
///
/// One instance per protected dependency; its lifecycle spans the process
/// and it is explicitly resettable. All counters live behind a mutex so a
/// breaker can be shared (`Arc`) across tasks.
///
/// # Example
///
/// ```no_run
/// use arcana_taskcore::reliability::{CircuitBreaker, CircuitBreakerConfig};
///
/// # async fn fetch() -> Result<String, std::io::Error> { Ok("ok".into()) }
/// # async fn run() {
/// let breaker = CircuitBreaker::new("ephemeris-api", CircuitBreakerConfig::default());
///
/// match breaker.execute(|| fetch()).await {
///     Ok(body) => println!("{body}"),
///     Err(e) => eprintln!("failed or short-circuited: {e}"),
/// }
/// # }
/// ```
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a new closed breaker for a named dependency
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                last_failure_at: None,
            }),
        }
    }

    /// The protected dependency's name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The breaker's configuration
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state (transition-free observation)
    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    /// Force Closed with all counters zeroed (operator escape hatch)
    pub fn reset(&self) {
        let mut state = self.state.lock();
        info!(breaker = %self.name, "circuit breaker reset");
        state.state = CircuitState::Closed;
        state.consecutive_failures = 0;
        state.half_open_successes = 0;
        state.last_failure_at = None;
    }

    /// Run an operation through the breaker
    ///
    /// In Open state the operation is never invoked and the call fails
    /// fast with [`CircuitError::Open`] until the recovery timeout has
    /// elapsed; the first call after that transitions to HalfOpen and is
    /// attempted.
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.before_call()?;

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(error) => {
                self.record_failure();
                Err(CircuitError::Operation(error))
            }
        }
    }

    /// Gate a call; may transition Open -> HalfOpen
    fn before_call(&self) -> Result<(), CircuitOpenError> {
        let mut state = self.state.lock();
        match state.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let recovered = state
                    .last_failure_at
                    .map(|at| at.elapsed() >= self.config.recovery_timeout)
                    .unwrap_or(true);
                if recovered {
                    debug!(breaker = %self.name, "recovery timeout elapsed, trying half-open");
                    state.state = CircuitState::HalfOpen;
                    state.half_open_successes = 0;
                    Ok(())
                } else {
                    Err(CircuitOpenError {
                        name: self.name.clone(),
                    })
                }
            }
        }
    }

    fn record_success(&self) {
        let mut state = self.state.lock();
        match state.state {
            CircuitState::Closed => {
                // Gradual trust recovery: each success walks the failure
                // count back by one instead of resetting it
                state.consecutive_failures = state.consecutive_failures.saturating_sub(1);
            }
            CircuitState::HalfOpen => {
                state.half_open_successes += 1;
                if state.half_open_successes >= self.config.success_threshold {
                    info!(breaker = %self.name, "circuit breaker closed");
                    state.state = CircuitState::Closed;
                    state.consecutive_failures = 0;
                    state.half_open_successes = 0;
                    state.last_failure_at = None;
                }
            }
            // Unreachable through execute(); keep the edge set closed
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self) {
        let mut state = self.state.lock();
        state.last_failure_at = Some(Instant::now());
        match state.state {
            CircuitState::Closed => {
                state.consecutive_failures += 1;
                if state.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        breaker = %self.name,
                        failures = state.consecutive_failures,
                        "failure threshold reached, circuit breaker opened"
                    );
                    state.state = CircuitState::Open;
                }
            }
            CircuitState::HalfOpen => {
                warn!(breaker = %self.name, "half-open trial failed, circuit breaker reopened");
                state.state = CircuitState::Open;
                state.half_open_successes = 0;
            }
            CircuitState::Open => {}
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
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

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, thiserror::Error)]
    #[error("dependency failed")]
    struct DepError;

    impl TransientError for DepError {
        fn is_transient(&self) -> bool {
            true
        }
    }

    fn test_breaker() -> CircuitBreaker {
        CircuitBreaker::new(
            "test_service",
            CircuitBreakerConfig::default()
                .with_failure_threshold(3)
                .with_success_threshold(3)
                .with_recovery_timeout(Duration::from_millis(100)),
        )
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<(), CircuitError<DepError>> {
        breaker.execute(|| async { Err::<(), _>(DepError) }).await.map(|_| ())
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<(), CircuitError<DepError>> {
        breaker.execute(|| async { Ok::<_, DepError>(()) }).await
    }

    #[tokio::test]
    async fn test_starts_closed_and_passes_through() {
        let breaker = test_breaker();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(succeed(&breaker).await.is_ok());
    }

    #[tokio::test]
    async fn test_opens_after_failure_threshold() {
        let breaker = test_breaker();
        for _ in 0..3 {
            assert!(fail(&breaker).await.is_err());
        }
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_open_short_circuits_without_invoking() {
        let breaker = test_breaker();
        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }

        let invoked = std::sync::atomic::AtomicBool::new(false);
        let result = breaker
            .execute(|| {
                invoked.store(true, std::sync::atomic::Ordering::SeqCst);
                async { Ok::<_, DepError>(()) }
            })
            .await;

        assert!(matches!(result, Err(CircuitError::Open(_))));
        assert!(!invoked.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_half_open_after_recovery_then_closes() {
        let breaker = test_breaker();
        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(succeed(&breaker).await.is_ok());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        // Two more successes reach the threshold of 3
        assert!(succeed(&breaker).await.is_ok());
        assert!(succeed(&breaker).await.is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let breaker = test_breaker();
        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(fail(&breaker).await.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);

        // The recovery timer restarted: still short-circuiting
        let result = succeed(&breaker).await;
        assert!(matches!(result, Err(CircuitError::Open(_))));
    }

    #[tokio::test]
    async fn test_gradual_trust_recovery_in_closed() {
        let breaker = test_breaker();

        // Two failures, one success: the count walks back to 1, so two
        // more failures (not three) are needed to open
        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        let _ = succeed(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Closed);

        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_reset_forces_closed() {
        let breaker = test_breaker();
        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(succeed(&breaker).await.is_ok());
    }

    #[test]
    fn test_state_display_and_config_serde() {
        assert_eq!(CircuitState::HalfOpen.to_string(), "half_open");

        let config = CircuitBreakerConfig::default().with_failure_threshold(7);
        let json = serde_json::to_string(&config).unwrap();
        let parsed: CircuitBreakerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, parsed);
    }
}
