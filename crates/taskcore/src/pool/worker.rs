//! Worker threads: isolated execution units owned by the pool
//!
//! Each worker is a dedicated OS thread with no shared mutable state.
//! It receives assignments over a per-worker channel and reports outcomes
//! over a shared event channel back into the control loop; all coordination
//! is message passing.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error};
use uuid::Uuid;

use super::registry::HandlerRegistry;
use super::task::TaskError;

/// A task handed to a worker thread
#[derive(Debug)]
pub(crate) struct TaskAssignment {
    pub id: Uuid,
    pub kind: String,
    pub payload: Value,
}

/// Messages into a worker thread
pub(crate) enum WorkerRequest {
    /// Execute one task and report the outcome
    Run(TaskAssignment),
    /// Exit the thread (idle reclamation or pool shutdown)
    Shutdown,
}

/// Messages from worker threads into the control loop
#[derive(Debug)]
pub(crate) enum WorkerEvent {
    /// The assigned task finished (handler result or domain failure)
    Completed {
        worker_id: u64,
        task_id: Uuid,
        result: Result<Value, TaskError>,
    },
    /// The handler panicked; the thread has exited
    Crashed {
        worker_id: u64,
        task_id: Uuid,
        message: String,
    },
}

/// Control-loop side of a live worker
pub(crate) struct WorkerHandle {
    pub sender: std_mpsc::Sender<WorkerRequest>,
}

/// Spawn a worker thread
///
/// The thread loops over its request channel, executing one task at a time.
/// A handler panic is caught, reported as [`WorkerEvent::Crashed`], and
/// terminates the thread; the control loop replaces it.
pub(crate) fn spawn_worker(
    worker_id: u64,
    registry: Arc<HandlerRegistry>,
    events: UnboundedSender<WorkerEvent>,
) -> std::io::Result<WorkerHandle> {
    let (tx, rx) = std_mpsc::channel::<WorkerRequest>();

    std::thread::Builder::new()
        .name(format!("taskcore-worker-{worker_id}"))
        .spawn(move || {
            debug!(worker_id, "worker thread started");

            while let Ok(request) = rx.recv() {
                let assignment = match request {
                    WorkerRequest::Run(a) => a,
                    WorkerRequest::Shutdown => break,
                };

                let task_id = assignment.id;
                let result = match registry.get(&assignment.kind) {
                    None => Err(TaskError::UnknownKind(assignment.kind)),
                    Some(handler) => {
                        match catch_unwind(AssertUnwindSafe(|| handler(assignment.payload))) {
                            Ok(Ok(value)) => Ok(value),
                            Ok(Err(message)) => Err(TaskError::Operation(message)),
                            Err(panic) => {
                                let message = panic_message(panic);
                                error!(worker_id, %task_id, message, "handler panicked");
                                let _ = events.send(WorkerEvent::Crashed {
                                    worker_id,
                                    task_id,
                                    message,
                                });
                                return;
                            }
                        }
                    }
                };

                if events
                    .send(WorkerEvent::Completed {
                        worker_id,
                        task_id,
                        result,
                    })
                    .is_err()
                {
                    // Control loop is gone, nothing left to report to
                    break;
                }
            }

            debug!(worker_id, "worker thread exited");
        })?;

    Ok(WorkerHandle { sender: tx })
}

/// Extract a readable message from a caught panic payload
fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_registry() -> Arc<HandlerRegistry> {
        let mut registry = HandlerRegistry::new();
        registry.register("double", |payload| {
            let n = payload["n"].as_i64().ok_or("n must be a number")?;
            Ok(json!({ "n": n * 2 }))
        });
        registry.register("panic", |_| panic!("kaboom"));
        Arc::new(registry)
    }

    #[tokio::test]
    async fn test_worker_completes_task() {
        let (events_tx, mut events_rx) = tokio::sync::mpsc::unbounded_channel();
        let worker = spawn_worker(1, test_registry(), events_tx).unwrap();

        let id = Uuid::now_v7();
        worker
            .sender
            .send(WorkerRequest::Run(TaskAssignment {
                id,
                kind: "double".into(),
                payload: json!({"n": 21}),
            }))
            .unwrap();

        match events_rx.recv().await.unwrap() {
            WorkerEvent::Completed {
                worker_id,
                task_id,
                result,
            } => {
                assert_eq!(worker_id, 1);
                assert_eq!(task_id, id);
                assert_eq!(result.unwrap(), json!({"n": 42}));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_worker_reports_unknown_kind() {
        let (events_tx, mut events_rx) = tokio::sync::mpsc::unbounded_channel();
        let worker = spawn_worker(2, test_registry(), events_tx).unwrap();

        worker
            .sender
            .send(WorkerRequest::Run(TaskAssignment {
                id: Uuid::now_v7(),
                kind: "missing".into(),
                payload: json!(null),
            }))
            .unwrap();

        match events_rx.recv().await.unwrap() {
            WorkerEvent::Completed { result, .. } => {
                assert!(matches!(result, Err(TaskError::UnknownKind(k)) if k == "missing"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_worker_reports_panic_and_exits() {
        let (events_tx, mut events_rx) = tokio::sync::mpsc::unbounded_channel();
        let worker = spawn_worker(3, test_registry(), events_tx).unwrap();

        worker
            .sender
            .send(WorkerRequest::Run(TaskAssignment {
                id: Uuid::now_v7(),
                kind: "panic".into(),
                payload: json!(null),
            }))
            .unwrap();

        match events_rx.recv().await.unwrap() {
            WorkerEvent::Crashed { message, .. } => assert_eq!(message, "kaboom"),
            other => panic!("unexpected event: {other:?}"),
        }

        // The thread is gone: further sends eventually fail once the
        // receiver is dropped
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(worker
            .sender
            .send(WorkerRequest::Run(TaskAssignment {
                id: Uuid::now_v7(),
                kind: "double".into(),
                payload: json!({"n": 1}),
            }))
            .is_err());
    }

    #[tokio::test]
    async fn test_worker_shutdown() {
        let (events_tx, _events_rx) = tokio::sync::mpsc::unbounded_channel();
        let worker = spawn_worker(4, test_registry(), events_tx).unwrap();

        worker.sender.send(WorkerRequest::Shutdown).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(worker.sender.send(WorkerRequest::Shutdown).is_err());
    }
}
