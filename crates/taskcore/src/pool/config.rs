//! Execution pool configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Execution pool configuration
///
/// Controls worker sizing, timeouts and reclamation. Immutable once the
/// pool is constructed, except through [`ExecutionPool::reconfigure`].
///
/// [`ExecutionPool::reconfigure`]: crate::pool::ExecutionPool::reconfigure
///
/// # Example
///
/// ```
/// use arcana_taskcore::pool::PoolConfig;
/// use std::time::Duration;
///
/// let config = PoolConfig::default()
///     .with_min_workers(2)
///     .with_max_workers(8)
///     .with_task_timeout(Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolConfig {
    /// Minimum number of live workers (maintained outside shutdown)
    pub min_workers: usize,

    /// Maximum number of live workers
    pub max_workers: usize,

    /// Whether to spawn extra workers (up to `max_workers`) when all
    /// current workers are busy
    pub auto_scale: bool,

    /// Idle time after which a worker above `min_workers` is reclaimed
    #[serde(with = "duration_millis")]
    pub worker_idle_timeout: Duration,

    /// Deadline for each submitted task, measured from enqueue
    #[serde(with = "duration_millis")]
    pub task_timeout: Duration,

    /// How often the idle-worker sweep runs
    #[serde(with = "duration_millis")]
    pub sweep_interval: Duration,

    /// Initial delay before respawning a crashed worker
    #[serde(with = "duration_millis")]
    pub respawn_base_delay: Duration,

    /// Cap on the crash-respawn backoff
    #[serde(with = "duration_millis")]
    pub respawn_max_delay: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_workers: 2,
            max_workers: 8,
            auto_scale: true,
            worker_idle_timeout: Duration::from_secs(60),
            task_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(10),
            respawn_base_delay: Duration::from_millis(100),
            respawn_max_delay: Duration::from_secs(30),
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the minimum worker count
    pub fn with_min_workers(mut self, min: usize) -> Self {
        self.min_workers = min;
        self
    }

    /// Set the maximum worker count
    pub fn with_max_workers(mut self, max: usize) -> Self {
        self.max_workers = max;
        self
    }

    /// Enable or disable auto-scaling
    pub fn with_auto_scale(mut self, enabled: bool) -> Self {
        self.auto_scale = enabled;
        self
    }

    /// Set the idle timeout after which surplus workers are reclaimed
    pub fn with_worker_idle_timeout(mut self, timeout: Duration) -> Self {
        self.worker_idle_timeout = timeout;
        self
    }

    /// Set the per-task deadline
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    /// Set the idle-sweep interval
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set the initial crash-respawn delay
    pub fn with_respawn_base_delay(mut self, delay: Duration) -> Self {
        self.respawn_base_delay = delay;
        self
    }

    /// Set the crash-respawn backoff cap
    pub fn with_respawn_max_delay(mut self, delay: Duration) -> Self {
        self.respawn_max_delay = delay;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), PoolConfigError> {
        if self.max_workers == 0 {
            return Err(PoolConfigError::InvalidConfig(
                "max_workers must be at least 1".into(),
            ));
        }
        if self.min_workers > self.max_workers {
            return Err(PoolConfigError::InvalidConfig(
                "min_workers must not exceed max_workers".into(),
            ));
        }
        Ok(())
    }
}

/// Pool configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum PoolConfigError {
    /// Invalid configuration
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),
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

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();
        assert_eq!(config.min_workers, 2);
        assert_eq!(config.max_workers, 8);
        assert!(config.auto_scale);
        assert_eq!(config.task_timeout, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = PoolConfig::new()
            .with_min_workers(1)
            .with_max_workers(4)
            .with_auto_scale(false)
            .with_worker_idle_timeout(Duration::from_secs(5))
            .with_task_timeout(Duration::from_millis(250));

        assert_eq!(config.min_workers, 1);
        assert_eq!(config.max_workers, 4);
        assert!(!config.auto_scale);
        assert_eq!(config.worker_idle_timeout, Duration::from_secs(5));
        assert_eq!(config.task_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_validation_rejects_zero_max() {
        let config = PoolConfig::new().with_min_workers(0).with_max_workers(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_min_above_max() {
        let config = PoolConfig::new().with_min_workers(5).with_max_workers(2);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serialization() {
        let config = PoolConfig::default().with_task_timeout(Duration::from_millis(1500));
        let json = serde_json::to_string(&config).unwrap();
        let parsed: PoolConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, parsed);
    }
}
