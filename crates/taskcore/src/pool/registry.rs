//! Handler registry mapping task kinds to execution functions

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

/// Handler function for one task kind
///
/// Handlers are synchronous on purpose: they run CPU-bound work on a
/// dedicated worker thread, never on the async runtime. A handler returns
/// the task's result value or a domain error message, which the pool
/// surfaces to the caller as [`TaskError::Operation`].
///
/// [`TaskError::Operation`]: crate::pool::TaskError::Operation
pub type TaskHandler = Arc<dyn Fn(Value) -> Result<Value, String> + Send + Sync>;

/// Registry of task handlers, built before pool construction and shared
/// read-only with every worker thread
///
/// # Example
///
/// ```
/// use arcana_taskcore::pool::HandlerRegistry;
/// use serde_json::json;
///
/// let mut registry = HandlerRegistry::new();
/// registry.register("sum", |payload| {
///     let nums = payload["values"]
///         .as_array()
///         .ok_or("values must be an array")?
///         .iter()
///         .filter_map(|v| v.as_i64())
///         .sum::<i64>();
///     Ok(json!({ "sum": nums }))
/// });
///
/// assert!(registry.get("sum").is_some());
/// assert!(registry.get("missing").is_none());
/// ```
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, TaskHandler>,
}

impl HandlerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a task kind, replacing any previous handler
    pub fn register<F>(&mut self, kind: impl Into<String>, handler: F)
    where
        F: Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.handlers.insert(kind.into(), Arc::new(handler));
    }

    /// Look up the handler for a kind
    pub fn get(&self, kind: &str) -> Option<TaskHandler> {
        self.handlers.get(kind).cloned()
    }

    /// Registered kinds, for diagnostics
    pub fn kinds(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    /// Number of registered kinds
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
