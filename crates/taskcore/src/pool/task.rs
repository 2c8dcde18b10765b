//! Task records and caller-visible outcomes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::reliability::TransientError;

/// A unit of work submitted to the execution pool
///
/// Owned exclusively by the pool from enqueue until a terminal outcome is
/// delivered to the submitting caller; never shared across workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task id (UUID v7, sortable by creation time)
    pub id: Uuid,

    /// Task kind tag, resolved against the handler registry
    pub kind: String,

    /// Opaque serializable payload; the core never inspects it
    pub payload: Value,

    /// When the task was submitted
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Create a new task with a fresh id
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::now_v7(),
            kind: kind.into(),
            payload,
            created_at: Utc::now(),
        }
    }
}

/// Caller-visible task failures
///
/// Exactly one outcome is delivered per submitted task: either a result
/// value or one of these.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    /// Task exceeded its deadline before a worker reply arrived
    #[error("task timed out after {timeout_ms}ms")]
    Timeout {
        /// The configured deadline, in milliseconds
        timeout_ms: u64,
    },

    /// Worker exited or panicked mid-task; the pool respawns a replacement
    /// but still surfaces the failure for the in-flight task
    #[error("worker crashed while executing task: {0}")]
    WorkerCrash(String),

    /// Domain error returned by the task handler, passed through unchanged
    #[error("task handler failed: {0}")]
    Operation(String),

    /// No handler registered for the submitted kind
    #[error("no handler registered for task kind: {0}")]
    UnknownKind(String),

    /// Pool is shutting down; the submission was rejected
    #[error("pool is shutting down")]
    ShuttingDown,

    /// Pool control loop is gone (pool dropped or already shut down)
    #[error("pool is closed")]
    Closed,
}

impl TransientError for TaskError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::WorkerCrash(_))
    }

    fn code(&self) -> Option<&str> {
        match self {
            Self::Timeout { .. } => Some("task_timeout"),
            Self::WorkerCrash(_) => Some("worker_crash"),
            Self::Operation(_) => None,
            Self::UnknownKind(_) => Some("unknown_kind"),
            Self::ShuttingDown => Some("shutting_down"),
            Self::Closed => Some("pool_closed"),
        }
    }
}

/// Snapshot of pool state returned by [`ExecutionPool::status`]
///
/// Reading status never mutates pool state.
///
/// [`ExecutionPool::status`]: crate::pool::ExecutionPool::status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatus {
    /// Number of live workers
    pub live_workers: usize,

    /// Number of workers currently executing a task
    pub busy_workers: usize,

    /// Number of tasks waiting for a worker
    pub queue_depth: usize,

    /// Total tasks completed by this pool since construction
    pub tasks_handled: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_ids_are_unique_and_ordered() {
        let a = Task::new("chart", json!({"n": 1}));
        let b = Task::new("chart", json!({"n": 2}));
        assert_ne!(a.id, b.id);
        // v7 ids sort by creation time
        assert!(a.id < b.id);
    }

    #[test]
    fn test_error_display() {
        let err = TaskError::Timeout { timeout_ms: 50 };
        assert_eq!(err.to_string(), "task timed out after 50ms");

        let err = TaskError::UnknownKind("nope".into());
        assert_eq!(err.to_string(), "no handler registered for task kind: nope");
    }

    #[test]
    fn test_transient_classification() {
        assert!(TaskError::Timeout { timeout_ms: 1 }.is_transient());
        assert!(TaskError::WorkerCrash("boom".into()).is_transient());
        assert!(!TaskError::Operation("bad input".into()).is_transient());
        assert!(!TaskError::ShuttingDown.is_transient());
        assert_eq!(TaskError::ShuttingDown.code(), Some("shutting_down"));
        assert_eq!(TaskError::Operation("x".into()).code(), None);
    }

    #[test]
    fn test_status_serialization() {
        let status = PoolStatus {
            live_workers: 3,
            busy_workers: 1,
            queue_depth: 0,
            tasks_handled: 42,
        };
        let json = serde_json::to_string(&status).unwrap();
        let parsed: PoolStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(status, parsed);
    }
}
