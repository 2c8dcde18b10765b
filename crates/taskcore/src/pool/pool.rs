//! Execution pool: control loop, dispatch, scaling and shutdown

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::config::{PoolConfig, PoolConfigError};
use super::registry::HandlerRegistry;
use super::task::{PoolStatus, Task, TaskError};
use super::worker::{spawn_worker, TaskAssignment, WorkerEvent, WorkerHandle, WorkerRequest};

/// Errors from [`ExecutionPool::reconfigure`]
#[derive(Debug, thiserror::Error)]
pub enum ReconfigureError {
    /// The new configuration failed validation
    #[error(transparent)]
    Config(#[from] PoolConfigError),

    /// Pool control loop is gone
    #[error("pool is closed")]
    Closed,
}

/// Commands from pool handles into the control loop
enum PoolCommand {
    Submit {
        kind: String,
        payload: Value,
        reply: oneshot::Sender<Result<Value, TaskError>>,
    },
    Status {
        reply: oneshot::Sender<PoolStatus>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
    Reconfigure {
        config: PoolConfig,
        reply: oneshot::Sender<()>,
    },
}

/// Timer-driven events the control loop sends itself
enum InternalEvent {
    /// A submitted task's deadline fired
    TaskDeadline { task_id: Uuid, timeout_ms: u64 },
    /// A delayed crash-respawn came due
    Respawn,
}

/// A bounded pool of isolated worker threads for CPU-bound work
///
/// The pool owns a pending FIFO queue, a worker map and all timers inside a
/// single control-loop task; worker threads communicate with it only by
/// message passing, so the bookkeeping needs no locks. Construct one per
/// application, inject it where needed, and tie [`shutdown`] to the process
/// lifecycle.
///
/// [`shutdown`]: ExecutionPool::shutdown
///
/// # Example
///
/// ```no_run
/// use arcana_taskcore::pool::{ExecutionPool, HandlerRegistry, PoolConfig};
/// use serde_json::json;
///
/// # async fn run() -> anyhow::Result<()> {
/// let mut registry = HandlerRegistry::new();
/// registry.register("natal_chart", |payload| {
///     // ... CPU-heavy ephemeris math ...
///     Ok(json!({ "ok": true, "input": payload }))
/// });
///
/// let pool = ExecutionPool::new(registry, PoolConfig::default())?;
/// let result = pool.submit("natal_chart", json!({ "lat": 52.5 })).await?;
/// pool.shutdown().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ExecutionPool {
    commands: mpsc::UnboundedSender<PoolCommand>,
}

impl ExecutionPool {
    /// Create a pool and spin up `min_workers` idle workers
    pub fn new(registry: HandlerRegistry, config: PoolConfig) -> Result<Self, PoolConfigError> {
        config.validate()?;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let controller = Controller {
            config,
            registry: Arc::new(registry),
            workers: HashMap::new(),
            pending: VecDeque::new(),
            inflight: HashMap::new(),
            events_tx,
            internal_tx,
            next_worker_id: 0,
            tasks_handled: 0,
            consecutive_crashes: 0,
            respawns_scheduled: 0,
            shutting_down: false,
            shutdown_waiters: Vec::new(),
        };

        tokio::spawn(controller.run(commands_rx, events_rx, internal_rx));

        Ok(Self {
            commands: commands_tx,
        })
    }

    /// Submit a task and await its outcome
    ///
    /// Resolves with the handler's result value, or exactly one typed
    /// failure: [`TaskError::Timeout`], [`TaskError::WorkerCrash`],
    /// [`TaskError::Operation`], [`TaskError::UnknownKind`] or
    /// [`TaskError::ShuttingDown`].
    pub async fn submit(
        &self,
        kind: impl Into<String>,
        payload: Value,
    ) -> Result<Value, TaskError> {
        let (reply, outcome) = oneshot::channel();
        self.commands
            .send(PoolCommand::Submit {
                kind: kind.into(),
                payload,
                reply,
            })
            .map_err(|_| TaskError::Closed)?;
        outcome.await.map_err(|_| TaskError::Closed)?
    }

    /// Snapshot of pool state; never mutates the pool
    pub async fn status(&self) -> Result<PoolStatus, TaskError> {
        let (reply, snapshot) = oneshot::channel();
        self.commands
            .send(PoolCommand::Status { reply })
            .map_err(|_| TaskError::Closed)?;
        snapshot.await.map_err(|_| TaskError::Closed)
    }

    /// Gracefully shut the pool down
    ///
    /// Stops accepting submissions, lets the pending queue drain
    /// (dispatched tasks run to completion), then terminates every worker.
    /// Resolves once the pool is fully stopped; idempotent.
    pub async fn shutdown(&self) {
        let (reply, done) = oneshot::channel();
        if self
            .commands
            .send(PoolCommand::Shutdown { reply })
            .is_err()
        {
            return; // already gone
        }
        let _ = done.await;
    }

    /// Replace the pool configuration
    ///
    /// The new bounds take effect immediately: the pool spawns up to the
    /// new minimum, and future scaling and sweeps observe the new limits.
    pub async fn reconfigure(&self, config: PoolConfig) -> Result<(), ReconfigureError> {
        config.validate()?;
        let (reply, done) = oneshot::channel();
        self.commands
            .send(PoolCommand::Reconfigure { config, reply })
            .map_err(|_| ReconfigureError::Closed)?;
        done.await.map_err(|_| ReconfigureError::Closed)
    }
}

/// A task waiting for an idle worker
struct PendingTask {
    task: Task,
    reply: oneshot::Sender<Result<Value, TaskError>>,
}

/// A task dispatched to a worker
///
/// `reply` is consumed when the caller's outcome settles; a `None` reply
/// marks the task as abandoned (the deadline fired first) so the eventual
/// worker reply is discarded by id.
struct Inflight {
    worker_id: u64,
    reply: Option<oneshot::Sender<Result<Value, TaskError>>>,
}

/// Bookkeeping for one live worker
struct WorkerRecord {
    handle: WorkerHandle,
    busy: bool,
    tasks_handled: u64,
    last_active_at: Instant,
    current_task: Option<Uuid>,
}

/// Single-owner control loop: all pool state is mutated here and only here
struct Controller {
    config: PoolConfig,
    registry: Arc<HandlerRegistry>,
    workers: HashMap<u64, WorkerRecord>,
    pending: VecDeque<PendingTask>,
    inflight: HashMap<Uuid, Inflight>,
    events_tx: mpsc::UnboundedSender<WorkerEvent>,
    internal_tx: mpsc::UnboundedSender<InternalEvent>,
    next_worker_id: u64,
    tasks_handled: u64,
    consecutive_crashes: u32,
    respawns_scheduled: usize,
    shutting_down: bool,
    shutdown_waiters: Vec<oneshot::Sender<()>>,
}

impl Controller {
    #[instrument(skip_all, fields(min = self.config.min_workers, max = self.config.max_workers))]
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<PoolCommand>,
        mut events: mpsc::UnboundedReceiver<WorkerEvent>,
        mut internal: mpsc::UnboundedReceiver<InternalEvent>,
    ) {
        info!(
            min_workers = self.config.min_workers,
            max_workers = self.config.max_workers,
            auto_scale = self.config.auto_scale,
            "starting execution pool"
        );

        for _ in 0..self.config.min_workers {
            self.spawn_one();
        }

        let mut sweep = tokio::time::interval(self.config.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut commands_open = true;

        loop {
            let sweep_interval = self.config.sweep_interval;

            tokio::select! {
                maybe_cmd = commands.recv(), if commands_open => match maybe_cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => {
                        // Every handle was dropped; drain and stop
                        commands_open = false;
                        self.begin_shutdown();
                    }
                },
                Some(event) = events.recv() => self.handle_worker_event(event),
                Some(event) = internal.recv() => self.handle_internal(event),
                _ = sweep.tick() => self.sweep_idle_workers(),
            }

            if self.config.sweep_interval != sweep_interval {
                sweep = tokio::time::interval(self.config.sweep_interval);
                sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);
            }

            if self.shutting_down && self.drained() {
                break;
            }
        }

        self.terminate_workers();
        info!(tasks_handled = self.tasks_handled, "execution pool stopped");
        for waiter in self.shutdown_waiters.drain(..) {
            let _ = waiter.send(());
        }
    }

    fn handle_command(&mut self, command: PoolCommand) {
        match command {
            PoolCommand::Submit {
                kind,
                payload,
                reply,
            } => {
                if self.shutting_down {
                    let _ = reply.send(Err(TaskError::ShuttingDown));
                    return;
                }
                let task = Task::new(kind, payload);
                debug!(task_id = %task.id, kind = %task.kind, "task submitted");
                self.arm_deadline(task.id);
                self.pending.push_back(PendingTask { task, reply });
                self.dispatch();
            }
            PoolCommand::Status { reply } => {
                let _ = reply.send(self.snapshot());
            }
            PoolCommand::Shutdown { reply } => {
                self.shutdown_waiters.push(reply);
                self.begin_shutdown();
            }
            PoolCommand::Reconfigure { config, reply } => {
                info!(
                    min_workers = config.min_workers,
                    max_workers = config.max_workers,
                    "reconfiguring pool"
                );
                self.config = config;
                while self.workers.len() < self.config.min_workers && !self.shutting_down {
                    if !self.spawn_one() {
                        break;
                    }
                }
                let _ = reply.send(());
                self.dispatch();
            }
        }
    }

    fn handle_worker_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Completed {
                worker_id,
                task_id,
                result,
            } => {
                if let Some(record) = self.workers.get_mut(&worker_id) {
                    if record.current_task != Some(task_id) {
                        warn!(worker_id, %task_id, "reply does not match assigned task");
                    }
                    record.busy = false;
                    record.current_task = None;
                    record.tasks_handled += 1;
                    record.last_active_at = Instant::now();
                }
                self.tasks_handled += 1;
                self.consecutive_crashes = 0;

                match self.inflight.remove(&task_id) {
                    Some(Inflight {
                        reply: Some(reply), ..
                    }) => {
                        let _ = reply.send(result);
                    }
                    Some(Inflight { reply: None, .. }) => {
                        // Caller already received a timeout for this id
                        debug!(%task_id, worker_id, "discarding late worker reply");
                    }
                    None => {
                        warn!(%task_id, worker_id, "reply for unknown task");
                    }
                }
                self.dispatch();
            }
            WorkerEvent::Crashed {
                worker_id,
                task_id,
                message,
            } => {
                warn!(worker_id, %task_id, message, "worker crashed");
                self.workers.remove(&worker_id);
                if let Some(Inflight {
                    reply: Some(reply), ..
                }) = self.inflight.remove(&task_id)
                {
                    let _ = reply.send(Err(TaskError::WorkerCrash(message)));
                }
                self.consecutive_crashes += 1;
                self.schedule_respawn();
                self.dispatch();
            }
        }
    }

    fn handle_internal(&mut self, event: InternalEvent) {
        match event {
            InternalEvent::TaskDeadline {
                task_id,
                timeout_ms,
            } => self.expire_task(task_id, timeout_ms),
            InternalEvent::Respawn => {
                self.respawns_scheduled = self.respawns_scheduled.saturating_sub(1);
                if !self.shutting_down && self.workers.len() < self.config.min_workers {
                    self.spawn_one();
                    self.dispatch();
                }
            }
        }
    }

    /// Start an independent deadline timer for a submitted task
    fn arm_deadline(&self, task_id: Uuid) {
        let timeout = self.config.task_timeout;
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(InternalEvent::TaskDeadline {
                task_id,
                timeout_ms: timeout.as_millis() as u64,
            });
        });
    }

    /// Settle a task whose deadline fired
    fn expire_task(&mut self, task_id: Uuid, timeout_ms: u64) {
        // Still queued: remove it and fail the caller
        if let Some(pos) = self.pending.iter().position(|p| p.task.id == task_id) {
            if let Some(pending) = self.pending.remove(pos) {
                debug!(%task_id, "queued task timed out");
                let _ = pending.reply.send(Err(TaskError::Timeout { timeout_ms }));
            }
            return;
        }

        // Dispatched: settle the caller now, keep the entry so the late
        // worker reply is recognized and discarded
        if let Some(inflight) = self.inflight.get_mut(&task_id) {
            if let Some(reply) = inflight.reply.take() {
                debug!(%task_id, worker_id = inflight.worker_id, "dispatched task timed out");
                let _ = reply.send(Err(TaskError::Timeout { timeout_ms }));
            }
        }
        // Otherwise the task already settled; nothing to do
    }

    /// Dispatch queued tasks to idle workers, scaling up when allowed
    fn dispatch(&mut self) {
        while !self.pending.is_empty() {
            let worker_id = match self.find_idle_worker() {
                Some(id) => id,
                None => {
                    let can_scale = self.config.auto_scale
                        && !self.shutting_down
                        && self.workers.len() < self.config.max_workers;
                    if can_scale && self.spawn_one() {
                        continue;
                    }
                    break;
                }
            };

            let Some(PendingTask { task, reply }) = self.pending.pop_front() else {
                break;
            };
            let Some(record) = self.workers.get_mut(&worker_id) else {
                self.pending.push_front(PendingTask { task, reply });
                break;
            };

            let assignment = TaskAssignment {
                id: task.id,
                kind: task.kind.clone(),
                payload: task.payload.clone(),
            };

            if record.handle.sender.send(WorkerRequest::Run(assignment)).is_err() {
                // Worker thread died without reporting; replace and retry
                warn!(worker_id, "worker channel closed, removing worker");
                self.workers.remove(&worker_id);
                self.pending.push_front(PendingTask { task, reply });
                self.consecutive_crashes += 1;
                self.schedule_respawn();
                continue;
            }

            record.busy = true;
            record.current_task = Some(task.id);
            record.last_active_at = Instant::now();
            debug!(task_id = %task.id, worker_id, "task dispatched");

            self.inflight.insert(
                task.id,
                Inflight {
                    worker_id,
                    reply: Some(reply),
                },
            );
        }
    }

    fn find_idle_worker(&self) -> Option<u64> {
        self.workers
            .iter()
            .find(|(_, record)| !record.busy)
            .map(|(id, _)| *id)
    }

    /// Spawn one worker, respecting `max_workers`
    fn spawn_one(&mut self) -> bool {
        if self.workers.len() >= self.config.max_workers {
            return false;
        }
        let worker_id = self.next_worker_id;
        self.next_worker_id += 1;

        match spawn_worker(worker_id, Arc::clone(&self.registry), self.events_tx.clone()) {
            Ok(handle) => {
                debug!(worker_id, live = self.workers.len() + 1, "worker spawned");
                self.workers.insert(
                    worker_id,
                    WorkerRecord {
                        handle,
                        busy: false,
                        tasks_handled: 0,
                        last_active_at: Instant::now(),
                        current_task: None,
                    },
                );
                true
            }
            Err(e) => {
                error!(worker_id, "failed to spawn worker thread: {e}");
                false
            }
        }
    }

    /// Schedule a replacement worker with exponential crash backoff
    ///
    /// Keeps a worker that crashes immediately on start from respawning in
    /// a tight loop; the counter resets on the next successful completion.
    fn schedule_respawn(&mut self) {
        if self.shutting_down
            || self.workers.len() + self.respawns_scheduled >= self.config.min_workers
        {
            return;
        }

        let exponent = self.consecutive_crashes.saturating_sub(1).min(16);
        let delay = self
            .config
            .respawn_base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.config.respawn_max_delay);

        debug!(
            consecutive_crashes = self.consecutive_crashes,
            delay_ms = delay.as_millis() as u64,
            "scheduling worker respawn"
        );

        self.respawns_scheduled += 1;
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let _ = tx.send(InternalEvent::Respawn);
        });
    }

    /// Retire workers idle past the configured timeout, never below the
    /// minimum
    fn sweep_idle_workers(&mut self) {
        if self.shutting_down {
            return;
        }
        let now = Instant::now();
        let idle_timeout = self.config.worker_idle_timeout;

        let expired: Vec<u64> = self
            .workers
            .iter()
            .filter(|(_, record)| {
                !record.busy && now.duration_since(record.last_active_at) >= idle_timeout
            })
            .map(|(id, _)| *id)
            .collect();

        for worker_id in expired {
            if self.workers.len() <= self.config.min_workers {
                break;
            }
            if let Some(record) = self.workers.remove(&worker_id) {
                debug!(
                    worker_id,
                    tasks_handled = record.tasks_handled,
                    "reclaiming idle worker"
                );
                let _ = record.handle.sender.send(WorkerRequest::Shutdown);
            }
        }
    }

    fn begin_shutdown(&mut self) {
        if !self.shutting_down {
            info!(
                queue_depth = self.pending.len(),
                "pool shutdown initiated, draining queue"
            );
            self.shutting_down = true;
            self.dispatch();
        }
    }

    /// Drained means: nothing queued and every worker idle
    fn drained(&self) -> bool {
        self.pending.is_empty() && self.workers.values().all(|record| !record.busy)
    }

    fn terminate_workers(&mut self) {
        for (worker_id, record) in self.workers.drain() {
            debug!(
                worker_id,
                tasks_handled = record.tasks_handled,
                "terminating worker"
            );
            let _ = record.handle.sender.send(WorkerRequest::Shutdown);
        }
    }

    fn snapshot(&self) -> PoolStatus {
        PoolStatus {
            live_workers: self.workers.len(),
            busy_workers: self.workers.values().filter(|record| record.busy).count(),
            queue_depth: self.pending.len(),
            tasks_handled: self.tasks_handled,
        }
    }
}
