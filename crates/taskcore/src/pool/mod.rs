//! Execution pool for CPU-bound task offloading
//!
//! This module provides:
//! - [`ExecutionPool`] - Dynamically-scaled pool of isolated worker threads
//! - [`HandlerRegistry`] - Task kind to handler function mapping
//! - [`PoolConfig`] - Sizing, timeout and reclamation configuration
//!
//! # Architecture
//!
//! ```text
//! callers ──submit/status/shutdown──► ┌───────────────────────────────┐
//!                                     │         control loop          │
//!                                     │  pending queue · worker map   │
//!                                     │  deadline timers · idle sweep │
//!                                     └──────┬────────────────▲───────┘
//!                                 assignments│          worker│events
//!                                            ▼                │
//!                                ┌────────┐ ┌────────┐ ┌────────┐
//!                                │worker 0│ │worker 1│ │worker N│   (OS threads)
//!                                └────────┘ └────────┘ └────────┘
//! ```
//!
//! All pool bookkeeping is owned by a single control-loop task; worker
//! threads share nothing with it but message channels and the read-only
//! handler registry.

mod config;
mod pool;
mod registry;
mod task;
mod worker;

pub use config::{PoolConfig, PoolConfigError};
pub use pool::{ExecutionPool, ReconfigureError};
pub use registry::{HandlerRegistry, TaskHandler};
pub use task::{PoolStatus, Task, TaskError};
