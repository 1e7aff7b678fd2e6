//! Elastic worker pool with best-fit task assignment.
//!
//! The `ResourceManager` owns every worker slot, the FIFO queue of tasks
//! waiting for a worker, and the latest metrics snapshot. All three live
//! behind a single mutex; critical sections are pure bookkeeping. Task
//! execution runs on spawned tokio tasks outside the lock.
//!
//! Workers move between states as follows:
//!
//! ```text
//! Idle -> Busy -> Idle      (success or timeout)
//! Idle -> Busy -> Error     (worker returned an error)
//! Error -> Idle             (reset_worker)
//! any  -> Offline           (shutdown)
//! ```

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::capability::{AnalysisResult, AnalysisWorker, WorkerFactory};
use crate::config::PoolConfig;
use crate::core::task::{Task, TaskId};
use crate::error::{Error, Result};

use super::health::{MaintenanceHandle, MaintenanceLoop};

/// Extra time a [`TaskHandle::settle`] waits past the pool's own deadline
/// for the pool to report.
pub const SETTLE_GRACE: Duration = Duration::from_secs(1);

/// Default margin added to a task's estimate to form its execution deadline.
pub const DEFAULT_EXECUTION_MARGIN: Duration = Duration::from_secs(60);

/// Unique identifier for a pool worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub Uuid);

impl WorkerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First 8 characters of the UUID, for log lines.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for WorkerId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Busy,
    /// The worker raised during execution. Excluded from selection until reset.
    Error,
    Offline,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerStatus::Idle => write!(f, "idle"),
            WorkerStatus::Busy => write!(f, "busy"),
            WorkerStatus::Error => write!(f, "error"),
            WorkerStatus::Offline => write!(f, "offline"),
        }
    }
}

/// Observable state of one worker slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerInstance {
    pub id: WorkerId,
    pub status: WorkerStatus,
    pub current_task: Option<TaskId>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    /// Successfully completed tasks.
    pub total_completed: u64,
    /// Summed execution time of successful tasks.
    #[serde(with = "humantime_serde")]
    pub total_duration: Duration,
    #[serde(with = "humantime_serde")]
    pub average_response_time: Duration,
    /// Failed or timed out tasks.
    pub error_count: u64,
    /// Composite reliability and speed rating in `0.1..=1.0`.
    pub performance_score: f64,
}

impl WorkerInstance {
    fn new(id: WorkerId) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: WorkerStatus::Idle,
            current_task: None,
            created_at: now,
            last_activity_at: now,
            total_completed: 0,
            total_duration: Duration::ZERO,
            average_response_time: Duration::ZERO,
            error_count: 0,
            performance_score: 1.0,
        }
    }

    /// Recompute `performance_score` from the rolling counters.
    ///
    /// `0.7 * success_rate + 0.3 * speed`, where speed is
    /// `reference / max(average, floor)` clamped to `0.1..=1.0`.
    /// A worker with no history scores 1.0.
    pub fn recompute_score(&mut self, reference: Duration, floor: Duration) {
        let attempts = self.total_completed + self.error_count;
        if attempts == 0 {
            self.performance_score = 1.0;
            return;
        }
        let success_rate = self.total_completed as f64 / attempts as f64;
        let average = self.average_response_time.max(floor).as_secs_f64();
        let speed = if average > 0.0 {
            (reference.as_secs_f64() / average).clamp(0.1, 1.0)
        } else {
            1.0
        };
        self.performance_score = (0.7 * success_rate + 0.3 * speed).clamp(0.1, 1.0);
    }
}

/// Why a task did not produce a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The worker returned an error or panicked.
    WorkerError,
    /// No result before the deadline.
    Timeout,
    /// The task was dropped, e.g. by pool shutdown.
    Abandoned,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::WorkerError => write!(f, "worker_error"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Abandoned => write!(f, "abandoned"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    Succeeded(AnalysisResult),
    Failed { kind: FailureKind, message: String },
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Succeeded(_))
    }

    pub fn result(&self) -> Option<&AnalysisResult> {
        match self {
            TaskOutcome::Succeeded(result) => Some(result),
            TaskOutcome::Failed { .. } => None,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            TaskOutcome::Succeeded(_) => None,
            TaskOutcome::Failed { kind, .. } => Some(*kind),
        }
    }
}

/// The settled result of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskExecution {
    pub task_id: TaskId,
    /// Worker that ran the task, if it ever started.
    pub worker_id: Option<WorkerId>,
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
    pub outcome: TaskOutcome,
}

impl TaskExecution {
    pub fn failed(
        task_id: TaskId,
        worker_id: Option<WorkerId>,
        kind: FailureKind,
        message: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            task_id,
            worker_id,
            elapsed,
            outcome: TaskOutcome::Failed {
                kind,
                message: message.into(),
            },
        }
    }
}

/// Receives the execution of a dispatched or queued task.
///
/// Dropping the handle abandons the task: a queued task is never started
/// and a running one is cut short.
#[derive(Debug)]
pub struct TaskHandle {
    task_id: TaskId,
    deadline: Instant,
    rx: oneshot::Receiver<TaskExecution>,
}

impl TaskHandle {
    fn new(task_id: TaskId, deadline: Instant, rx: oneshot::Receiver<TaskExecution>) -> Self {
        Self { task_id, deadline, rx }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// The instant by which the pool settles the task, fixed when it was
    /// assigned. Time spent queued counts against it.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Wait for the pool to settle the task.
    ///
    /// The pool reports by [`TaskHandle::deadline`]; the wait gives up
    /// [`SETTLE_GRACE`] later, and dropping the receiver then stops the
    /// task if it is somehow still running.
    pub async fn settle(self) -> TaskExecution {
        let limit = self.deadline + SETTLE_GRACE;
        let timeout = limit.saturating_duration_since(Instant::now());
        self.wait(timeout).await
    }

    /// Wait up to `timeout` for the task to settle.
    ///
    /// Never fails: an expired wait becomes a `Timeout` failure and a
    /// dropped execution becomes `Abandoned`.
    pub async fn wait(self, timeout: Duration) -> TaskExecution {
        let started = Instant::now();
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(execution)) => execution,
            Ok(Err(_)) => TaskExecution::failed(
                self.task_id,
                None,
                FailureKind::Abandoned,
                "task was dropped before completing",
                started.elapsed(),
            ),
            Err(_) => TaskExecution::failed(
                self.task_id,
                None,
                FailureKind::Timeout,
                format!("no result within {:?}", timeout),
                started.elapsed(),
            ),
        }
    }
}

/// How `assign_task` placed a task.
#[derive(Debug)]
pub enum Assignment {
    /// Running on a worker.
    Dispatched { worker_id: WorkerId, handle: TaskHandle },
    /// Waiting for a worker; `position` is 1-based.
    Queued { position: usize, handle: TaskHandle },
    /// The pool is shut down; the handle resolves as abandoned.
    Rejected { handle: TaskHandle },
}

impl Assignment {
    pub fn into_handle(self) -> TaskHandle {
        match self {
            Assignment::Dispatched { handle, .. }
            | Assignment::Queued { handle, .. }
            | Assignment::Rejected { handle } => handle,
        }
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, Assignment::Queued { .. })
    }
}

/// Aggregate pool counters, recomputed after every mutation and by the
/// maintenance loop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceMetrics {
    pub total_workers: usize,
    pub idle_workers: usize,
    pub busy_workers: usize,
    pub error_workers: usize,
    pub queue_depth: usize,
    /// Busy workers over workers able to take a task (Idle or Busy).
    pub system_load: f64,
    pub tasks_completed: u64,
    pub task_errors: u64,
    #[serde(with = "humantime_serde")]
    pub average_response_time: Duration,
    pub updated_at: DateTime<Utc>,
}

/// Events emitted by the pool for lifecycle changes.
#[derive(Debug, Clone, PartialEq)]
pub enum PoolEvent {
    WorkerCreated { worker_id: WorkerId },
    WorkerReclaimed { worker_id: WorkerId },
    WorkerFailed { worker_id: WorkerId, error: String },
    TaskQueued { task_id: TaskId, position: usize },
    TaskStarted { task_id: TaskId, worker_id: WorkerId },
    TaskFinished { task_id: TaskId, worker_id: WorkerId, success: bool },
}

struct Slot {
    info: WorkerInstance,
    worker: Arc<dyn AnalysisWorker>,
    /// Creation order, used as the final selection tie-break.
    seq: u64,
    idle_since: Instant,
}

struct PendingTask {
    task: Task,
    queued_at: Instant,
    deadline: Instant,
    reply: oneshot::Sender<TaskExecution>,
}

/// A task bound to a worker, ready to be spawned outside the lock.
struct Job {
    worker_id: WorkerId,
    worker: Arc<dyn AnalysisWorker>,
    task: Task,
    deadline: Instant,
    reply: oneshot::Sender<TaskExecution>,
}

#[derive(Default)]
struct PoolState {
    workers: HashMap<WorkerId, Slot>,
    queue: VecDeque<PendingTask>,
    metrics: ResourceMetrics,
    next_seq: u64,
    subscribers: Vec<mpsc::UnboundedSender<PoolEvent>>,
    maintenance: Option<MaintenanceHandle>,
    shut_down: bool,
}

impl PoolState {
    fn emit(&mut self, event: PoolEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn active_count(&self) -> usize {
        self.workers
            .values()
            .filter(|s| s.info.status != WorkerStatus::Offline)
            .count()
    }

    fn count(&self, status: WorkerStatus) -> usize {
        self.workers.values().filter(|s| s.info.status == status).count()
    }

    /// Busy workers over runnable (Idle or Busy) workers. Error workers
    /// cannot take tasks, so a pool with no runnable worker counts as
    /// fully loaded.
    fn busy_ratio(&self) -> f64 {
        let busy = self.count(WorkerStatus::Busy);
        let runnable = busy + self.count(WorkerStatus::Idle);
        if runnable == 0 {
            return 1.0;
        }
        busy as f64 / runnable as f64
    }

    /// The Idle worker maximizing (score, -average response, completed).
    fn best_idle_worker(&self) -> Option<WorkerId> {
        self.workers
            .values()
            .filter(|s| s.info.status == WorkerStatus::Idle)
            .max_by(|a, b| {
                a.info
                    .performance_score
                    .total_cmp(&b.info.performance_score)
                    .then_with(|| b.info.average_response_time.cmp(&a.info.average_response_time))
                    .then_with(|| a.info.total_completed.cmp(&b.info.total_completed))
                    .then_with(|| b.seq.cmp(&a.seq))
            })
            .map(|s| s.info.id)
    }

    fn insert_worker(&mut self, worker: Arc<dyn AnalysisWorker>) -> WorkerId {
        let id = WorkerId::new();
        let seq = self.next_seq;
        self.next_seq += 1;
        self.workers.insert(
            id,
            Slot {
                info: WorkerInstance::new(id),
                worker,
                seq,
                idle_since: Instant::now(),
            },
        );
        self.emit(PoolEvent::WorkerCreated { worker_id: id });
        id
    }

    /// Settle queued tasks whose deadline has passed as timeouts and drop
    /// those nobody waits for. Neither kind is ever started.
    fn expire_queue(&mut self) -> usize {
        let now = Instant::now();
        let (overdue, waiting): (VecDeque<PendingTask>, VecDeque<PendingTask>) = self
            .queue
            .drain(..)
            .partition(|p| p.reply.is_closed() || now >= p.deadline);
        self.queue = waiting;

        let count = overdue.len();
        for pending in overdue {
            if pending.reply.is_closed() {
                debug!(task_id = %pending.task.id, "dropping queued task, nobody is waiting");
                continue;
            }
            warn!(task_id = %pending.task.id, "queued task passed its deadline before a worker was free");
            let _ = pending.reply.send(TaskExecution::failed(
                pending.task.id,
                None,
                FailureKind::Timeout,
                "no worker became available before the deadline",
                pending.queued_at.elapsed(),
            ));
        }
        count
    }

    /// Pair queued tasks with idle workers in FIFO order.
    fn drain_queue(&mut self) -> Vec<Job> {
        self.expire_queue();
        let mut jobs = Vec::new();
        while !self.queue.is_empty() {
            let Some(worker_id) = self.best_idle_worker() else {
                break;
            };
            let Some(pending) = self.queue.pop_front() else {
                break;
            };
            if pending.reply.is_closed() {
                debug!(task_id = %pending.task.id, "dropping queued task, nobody is waiting");
                continue;
            }
            if let Some(job) = self.begin(worker_id, pending) {
                jobs.push(job);
            }
        }
        jobs
    }

    fn begin(&mut self, worker_id: WorkerId, pending: PendingTask) -> Option<Job> {
        let slot = self.workers.get_mut(&worker_id)?;
        slot.info.status = WorkerStatus::Busy;
        slot.info.current_task = Some(pending.task.id.clone());
        slot.info.last_activity_at = Utc::now();
        let worker = Arc::clone(&slot.worker);
        self.emit(PoolEvent::TaskStarted {
            task_id: pending.task.id.clone(),
            worker_id,
        });
        Some(Job {
            worker_id,
            worker,
            task: pending.task,
            deadline: pending.deadline,
            reply: pending.reply,
        })
    }

    fn recompute_metrics(&mut self) -> ResourceMetrics {
        let (completed, errors, duration) = self.workers.values().fold(
            (0u64, 0u64, Duration::ZERO),
            |(c, e, d), s| (c + s.info.total_completed, e + s.info.error_count, d + s.info.total_duration),
        );
        self.metrics = ResourceMetrics {
            total_workers: self.active_count(),
            idle_workers: self.count(WorkerStatus::Idle),
            busy_workers: self.count(WorkerStatus::Busy),
            error_workers: self.count(WorkerStatus::Error),
            queue_depth: self.queue.len(),
            system_load: if self.count(WorkerStatus::Busy) == 0 {
                0.0
            } else {
                self.busy_ratio()
            },
            tasks_completed: completed,
            task_errors: errors,
            average_response_time: if completed == 0 {
                Duration::ZERO
            } else {
                Duration::from_secs_f64(duration.as_secs_f64() / completed as f64)
            },
            updated_at: Utc::now(),
        };
        self.metrics.clone()
    }
}

struct Inner {
    config: PoolConfig,
    execution_margin: Duration,
    factory: Arc<dyn WorkerFactory>,
    state: Mutex<PoolState>,
}

/// Non-owning reference to a pool, held by its maintenance loop.
#[derive(Clone)]
pub(crate) struct WeakResourceManager {
    inner: Weak<Inner>,
}

impl WeakResourceManager {
    /// The pool, unless every [`ResourceManager`] clone has been dropped.
    pub(crate) fn upgrade(&self) -> Option<ResourceManager> {
        self.inner.upgrade().map(|inner| ResourceManager { inner })
    }
}

/// Elastic pool of analysis workers.
///
/// Cloning is cheap; clones share the same pool.
///
/// # Example
///
/// ```ignore
/// let manager = ResourceManager::new(PoolConfig::with_bounds(2, 8), factory)?;
/// let handle = manager.assign_task(task).into_handle();
/// let execution = handle.wait(Duration::from_secs(60)).await;
/// ```
#[derive(Clone)]
pub struct ResourceManager {
    inner: Arc<Inner>,
}

impl ResourceManager {
    /// Create a pool with `config.min_workers` workers.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for invalid bounds and propagates the
    /// factory's error if an initial worker cannot be created.
    pub fn new(config: PoolConfig, factory: Arc<dyn WorkerFactory>) -> Result<Self> {
        Self::with_execution_margin(config, factory, DEFAULT_EXECUTION_MARGIN)
    }

    /// Like [`ResourceManager::new`], with the margin added to each task's
    /// estimate to bound its execution.
    pub fn with_execution_margin(
        config: PoolConfig,
        factory: Arc<dyn WorkerFactory>,
        execution_margin: Duration,
    ) -> Result<Self> {
        config.validate()?;
        let mut state = PoolState::default();
        for _ in 0..config.min_workers {
            let worker = factory.create()?;
            state.insert_worker(worker);
        }
        state.recompute_metrics();
        info!(workers = config.min_workers, max = config.max_workers, "worker pool initialized");

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                execution_margin,
                factory,
                state: Mutex::new(state),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn downgrade(&self) -> WeakResourceManager {
        WeakResourceManager {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Receive pool lifecycle events from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<PoolEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().subscribers.push(tx);
        rx
    }

    /// Assign a task to the best idle worker, scaling up or queueing when
    /// none is idle.
    ///
    /// The task joins the back of the queue and the queue is then drained
    /// onto idle workers, so earlier queued tasks are always served first.
    ///
    /// The deadline (estimate plus execution margin) starts now: a task
    /// still queued when it passes is settled as a timeout without running.
    pub fn assign_task(&self, task: Task) -> Assignment {
        let (tx, rx) = oneshot::channel();
        let task_id = task.id.clone();
        let queued_at = Instant::now();
        let deadline = queued_at + task.estimated_duration + self.inner.execution_margin;
        let handle = TaskHandle::new(task_id.clone(), deadline, rx);

        let (assignment, jobs) = {
            let mut state = self.lock();
            if state.shut_down {
                warn!(task_id = %task_id, "pool is shut down, rejecting task");
                return Assignment::Rejected { handle };
            }

            state.queue.push_back(PendingTask {
                task,
                queued_at,
                deadline,
                reply: tx,
            });

            if state.best_idle_worker().is_none() && self.should_scale_up(&state) {
                if let Err(e) = self.create_worker(&mut state) {
                    warn!(error = %e, "worker creation failed, task will wait in queue");
                }
            }

            let jobs = state.drain_queue();
            let assignment = match jobs.iter().find(|j| j.task.id == task_id) {
                Some(job) => Assignment::Dispatched {
                    worker_id: job.worker_id,
                    handle,
                },
                None => {
                    let position = state
                        .queue
                        .iter()
                        .position(|p| p.task.id == task_id)
                        .map_or(state.queue.len(), |i| i + 1);
                    info!(task_id = %task_id, position, "no idle worker, task queued");
                    state.emit(PoolEvent::TaskQueued {
                        task_id: task_id.clone(),
                        position,
                    });
                    Assignment::Queued { position, handle }
                }
            };
            state.recompute_metrics();
            (assignment, jobs)
        };

        for job in jobs {
            self.spawn_job(job);
        }
        assignment
    }

    /// Error workers count toward `max_workers` but not toward load.
    fn should_scale_up(&self, state: &PoolState) -> bool {
        let config = &self.inner.config;
        config.auto_scale
            && state.active_count() < config.max_workers
            && state.busy_ratio() > config.scale_up_threshold
    }

    fn create_worker(&self, state: &mut PoolState) -> Result<WorkerId> {
        if state.active_count() >= self.inner.config.max_workers {
            return Err(Error::WorkerCreation(format!(
                "pool is at its maximum of {} workers",
                self.inner.config.max_workers
            )));
        }
        let worker = self.inner.factory.create()?;
        let id = state.insert_worker(worker);
        info!(worker_id = %id.short(), pool_size = state.active_count(), "worker created");
        Ok(id)
    }

    fn spawn_job(&self, job: Job) {
        let manager = self.clone();
        tokio::spawn(async move {
            let Job {
                worker_id,
                worker,
                task,
                deadline,
                mut reply,
            } = job;
            debug!(task_id = %task.id, worker_id = %worker_id.short(), "task started");

            let started = Instant::now();
            let run = AssertUnwindSafe(worker.run(&task)).catch_unwind();
            let outcome = tokio::select! {
                settled = tokio::time::timeout_at(deadline.into(), run) => match settled {
                    Ok(Ok(Ok(result))) => TaskOutcome::Succeeded(result),
                    Ok(Ok(Err(e))) => TaskOutcome::Failed {
                        kind: FailureKind::WorkerError,
                        message: e.to_string(),
                    },
                    Ok(Err(_)) => TaskOutcome::Failed {
                        kind: FailureKind::WorkerError,
                        message: "worker panicked".to_string(),
                    },
                    Err(_) => TaskOutcome::Failed {
                        kind: FailureKind::Timeout,
                        message: format!("execution passed its deadline after {:?}", started.elapsed()),
                    },
                },
                _ = reply.closed() => TaskOutcome::Failed {
                    kind: FailureKind::Abandoned,
                    message: "waiter went away, execution stopped".to_string(),
                },
            };
            let execution = TaskExecution {
                task_id: task.id.clone(),
                worker_id: Some(worker_id),
                elapsed: started.elapsed(),
                outcome,
            };

            manager.on_task_completed(&worker_id, &execution);
            let _ = reply.send(execution);
        });
    }

    /// Record a finished task against its worker and hand the freed worker
    /// the head of the queue.
    pub fn on_task_completed(&self, worker_id: &WorkerId, execution: &TaskExecution) {
        let config = &self.inner.config;
        let jobs = {
            let mut state = self.lock();
            let Some(slot) = state.workers.get_mut(worker_id) else {
                warn!(worker_id = %worker_id, "completion for unknown worker");
                return;
            };

            let info = &mut slot.info;
            info.current_task = None;
            info.last_activity_at = Utc::now();
            let mut failure = None;
            match &execution.outcome {
                TaskOutcome::Succeeded(_) => {
                    info.total_completed += 1;
                    info.total_duration += execution.elapsed;
                    info.average_response_time = Duration::from_secs_f64(
                        info.total_duration.as_secs_f64() / info.total_completed as f64,
                    );
                    if info.status != WorkerStatus::Offline {
                        info.status = WorkerStatus::Idle;
                    }
                }
                TaskOutcome::Failed { kind, message } => {
                    if *kind != FailureKind::Abandoned {
                        info.error_count += 1;
                    }
                    if info.status != WorkerStatus::Offline {
                        info.status = if *kind == FailureKind::WorkerError {
                            WorkerStatus::Error
                        } else {
                            WorkerStatus::Idle
                        };
                    }
                    if *kind == FailureKind::WorkerError {
                        error!(
                            worker_id = %worker_id.short(),
                            task_id = %execution.task_id,
                            error = %message,
                            "worker failed, marked as error"
                        );
                        failure = Some(message.clone());
                    } else {
                        warn!(task_id = %execution.task_id, kind = %kind, "task did not complete");
                    }
                }
            }
            info.recompute_score(config.reference_duration, config.response_time_floor);
            slot.idle_since = Instant::now();

            if let Some(error) = failure {
                state.emit(PoolEvent::WorkerFailed {
                    worker_id: *worker_id,
                    error,
                });
            }
            state.emit(PoolEvent::TaskFinished {
                task_id: execution.task_id.clone(),
                worker_id: *worker_id,
                success: execution.outcome.is_success(),
            });

            let jobs = if state.shut_down {
                Vec::new()
            } else {
                state.drain_queue()
            };
            state.recompute_metrics();
            jobs
        };

        for job in jobs {
            self.spawn_job(job);
        }
    }

    /// Move a worker out of the Error state.
    pub fn reset_worker(&self, worker_id: &WorkerId) -> Result<()> {
        let jobs = {
            let mut state = self.lock();
            let slot = state
                .workers
                .get_mut(worker_id)
                .ok_or(Error::WorkerNotFound(*worker_id))?;
            if slot.info.status != WorkerStatus::Error {
                return Err(Error::InvalidWorkerState {
                    id: *worker_id,
                    expected: WorkerStatus::Error.to_string(),
                    actual: slot.info.status.to_string(),
                });
            }
            slot.info.status = WorkerStatus::Idle;
            slot.idle_since = Instant::now();
            info!(worker_id = %worker_id.short(), "worker reset");

            let jobs = state.drain_queue();
            state.recompute_metrics();
            jobs
        };

        for job in jobs {
            self.spawn_job(job);
        }
        Ok(())
    }

    /// Remove Idle workers past the idle timeout while the pool stays at
    /// or above its minimum. Busy and Error workers are never reclaimed.
    pub fn reclaim_idle(&self) -> Vec<WorkerId> {
        let config = &self.inner.config;
        let mut state = self.lock();
        let mut expired: Vec<(Instant, WorkerId)> = state
            .workers
            .values()
            .filter(|s| s.info.status == WorkerStatus::Idle && s.idle_since.elapsed() >= config.idle_timeout)
            .map(|s| (s.idle_since, s.info.id))
            .collect();
        expired.sort();

        let mut reclaimed = Vec::new();
        for (_, id) in expired {
            if state.active_count() <= config.min_workers {
                break;
            }
            state.workers.remove(&id);
            info!(worker_id = %id.short(), pool_size = state.active_count(), "idle worker reclaimed");
            state.emit(PoolEvent::WorkerReclaimed { worker_id: id });
            reclaimed.push(id);
        }
        if !reclaimed.is_empty() {
            state.recompute_metrics();
        }
        reclaimed
    }

    /// Settle queued tasks past their deadline. Returns how many left the
    /// queue.
    pub fn expire_overdue(&self) -> usize {
        let mut state = self.lock();
        let expired = state.expire_queue();
        if expired > 0 {
            state.recompute_metrics();
        }
        expired
    }

    /// Recompute and store the metrics snapshot.
    pub fn refresh_metrics(&self) -> ResourceMetrics {
        self.lock().recompute_metrics()
    }

    /// The latest metrics snapshot.
    pub fn metrics(&self) -> ResourceMetrics {
        self.lock().metrics.clone()
    }

    /// Number of workers that are not Offline.
    pub fn pool_size(&self) -> usize {
        self.lock().active_count()
    }

    pub fn queue_depth(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn worker(&self, id: &WorkerId) -> Option<WorkerInstance> {
        self.lock().workers.get(id).map(|s| s.info.clone())
    }

    /// Snapshot of every worker, oldest first.
    pub fn workers(&self) -> Vec<WorkerInstance> {
        let state = self.lock();
        let mut slots: Vec<&Slot> = state.workers.values().collect();
        slots.sort_by_key(|s| s.seq);
        slots.into_iter().map(|s| s.info.clone()).collect()
    }

    /// Start the background maintenance loop if it is not running.
    pub fn start_maintenance(&self) {
        let mut state = self.lock();
        if state.shut_down || state.maintenance.as_ref().is_some_and(|h| !h.is_cancelled()) {
            return;
        }
        state.maintenance = Some(MaintenanceLoop::new(self).spawn());
    }

    pub fn is_shut_down(&self) -> bool {
        self.lock().shut_down
    }

    /// Stop maintenance, take every worker offline and abandon queued
    /// tasks. Tasks already running finish but their workers stay offline.
    pub fn shutdown(&self) {
        let mut state = self.lock();
        if state.shut_down {
            return;
        }
        state.shut_down = true;
        if let Some(handle) = state.maintenance.take() {
            handle.shutdown();
        }
        for slot in state.workers.values_mut() {
            slot.info.status = WorkerStatus::Offline;
        }
        let abandoned: Vec<PendingTask> = state.queue.drain(..).collect();
        let count = abandoned.len();
        for pending in abandoned {
            let _ = pending.reply.send(TaskExecution::failed(
                pending.task.id,
                None,
                FailureKind::Abandoned,
                "pool shut down",
                Duration::ZERO,
            ));
        }
        state.recompute_metrics();
        info!(abandoned = count, "worker pool shut down");
    }
}
