//! End-to-end run driver.
//!
//! The `Orchestrator` plans a change set with the [`TaskScheduler`],
//! executes the plan batch by batch on the [`ResourceManager`], and
//! aggregates the outcomes into a [`RunReport`].
//!
//! Batches run strictly in order: every task of batch N is settled by the
//! pool, within the deadline fixed when it was assigned, before batch N+1
//! is submitted. A failed or timed out task is recorded and never aborts
//! the run. Only planning errors, including a provider that cannot list
//! its items, are returned as `Err`; the run then ends in `Error`.
//!
//! Cancellation is cooperative. It is observed before planning, before
//! each batch and before aggregation; in-flight tasks are not preempted,
//! and a cancelled run still reports the batches that completed.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::authorization::AuthorizationGate;
use crate::capability::{ChangeSetProvider, ProgressSink, RunContext, WorkerFactory};
use crate::config::{Config, OrchestratorSettings};
use crate::core::batch::{Batch, ExecutionPlan};
use crate::core::task::{RunMetadata, WorkDescriptor};
use crate::error::{Error, Result};
use crate::run::{
    OrchestrationProgress, OrchestrationState, RunId, RunReport, RunState, RunSummary, TaskReport,
};

use super::pool::{ResourceManager, ResourceMetrics};
use super::scheduler::TaskScheduler;

/// Counters across all runs handled by an orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorStatistics {
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    pub cancelled_runs: u64,
    pub active_runs: usize,
    /// Successful runs over finished runs.
    pub success_rate: f64,
    pub resources: ResourceMetrics,
}

#[derive(Default)]
struct RunCounters {
    total: u64,
    successful: u64,
    failed: u64,
    cancelled: u64,
}

struct RunEntry {
    state: RunState,
    cancel: CancellationToken,
    sink: Arc<dyn ProgressSink>,
}

struct Shared {
    scheduler: TaskScheduler,
    resources: ResourceManager,
    settings: OrchestratorSettings,
    gate: Option<Arc<dyn AuthorizationGate>>,
    runs: Mutex<HashMap<RunId, RunEntry>>,
    counters: Mutex<RunCounters>,
}

/// Where a run's work items come from. Provider items are listed during
/// the Planning phase.
enum WorkSource {
    Items {
        items: Vec<WorkDescriptor>,
        metadata: RunMetadata,
    },
    Provider(Arc<dyn ChangeSetProvider>),
}

impl WorkSource {
    async fn collect(self, run_id: &RunId) -> Result<(Vec<WorkDescriptor>, RunMetadata)> {
        match self {
            WorkSource::Items { items, metadata } => Ok((items, metadata)),
            WorkSource::Provider(provider) => {
                let metadata = provider.metadata();
                let ctx = RunContext {
                    run_id: Some(run_id.clone()),
                    metadata: metadata.clone(),
                };
                let items = provider.list_changed_items(&ctx).await?;
                debug!(run_id = %run_id, items = items.len(), "listed changed items");
                Ok((items, metadata))
            }
        }
    }
}

/// Handle to a run started with [`Orchestrator::start`].
#[derive(Debug)]
pub struct RunHandle {
    run_id: RunId,
    cancel: CancellationToken,
    join: JoinHandle<Result<RunReport>>,
}

impl RunHandle {
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Request cancellation; takes effect at the next batch boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the run to finish.
    pub async fn wait(self) -> Result<RunReport> {
        self.join.await.map_err(|e| Error::TaskJoin(e.to_string()))?
    }
}

/// Drives orchestration runs. Cloning is cheap; clones share runs and the
/// worker pool.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Shared>,
}

impl Orchestrator {
    /// Build an orchestrator and its worker pool from configuration.
    pub fn new(config: &Config, factory: Arc<dyn WorkerFactory>) -> Result<Self> {
        Self::build(config, factory, None)
    }

    /// Like [`Orchestrator::new`], exposing `gate` to embedding callers.
    pub fn with_authorization_gate(
        config: &Config,
        factory: Arc<dyn WorkerFactory>,
        gate: Arc<dyn AuthorizationGate>,
    ) -> Result<Self> {
        Self::build(config, factory, Some(gate))
    }

    fn build(
        config: &Config,
        factory: Arc<dyn WorkerFactory>,
        gate: Option<Arc<dyn AuthorizationGate>>,
    ) -> Result<Self> {
        let scheduler = TaskScheduler::new(config.scheduler.clone())?;
        let resources = ResourceManager::with_execution_margin(
            config.pool.clone(),
            factory,
            config.orchestrator.safety_margin,
        )?;
        Ok(Self::from_parts(scheduler, resources, config.orchestrator.clone(), gate))
    }

    pub fn from_parts(
        scheduler: TaskScheduler,
        resources: ResourceManager,
        settings: OrchestratorSettings,
        gate: Option<Arc<dyn AuthorizationGate>>,
    ) -> Self {
        Self {
            inner: Arc::new(Shared {
                scheduler,
                resources,
                settings,
                gate,
                runs: Mutex::new(HashMap::new()),
                counters: Mutex::new(RunCounters::default()),
            }),
        }
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.inner.scheduler
    }

    pub fn resources(&self) -> &ResourceManager {
        &self.inner.resources
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.inner.settings
    }

    pub fn authorization_gate(&self) -> Option<Arc<dyn AuthorizationGate>> {
        self.inner.gate.clone()
    }

    fn runs(&self) -> MutexGuard<'_, HashMap<RunId, RunEntry>> {
        self.inner.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn counters(&self) -> MutexGuard<'_, RunCounters> {
        self.inner.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a run in the background.
    ///
    /// # Errors
    ///
    /// `Error::RunExists` if a run with the same id is still in flight.
    pub fn start(
        &self,
        run_id: RunId,
        items: Vec<WorkDescriptor>,
        metadata: RunMetadata,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<RunHandle> {
        self.spawn_run(run_id, WorkSource::Items { items, metadata }, sink)
    }

    fn spawn_run(&self, run_id: RunId, source: WorkSource, sink: Arc<dyn ProgressSink>) -> Result<RunHandle> {
        let cancel = self.register(&run_id, sink)?;
        let orchestrator = self.clone();
        let id = run_id.clone();
        let join = tokio::spawn(async move { orchestrator.execute(&id, source).await });
        Ok(RunHandle {
            run_id,
            cancel,
            join,
        })
    }

    /// Run to completion on the calling task.
    pub async fn run(
        &self,
        run_id: RunId,
        items: &[WorkDescriptor],
        metadata: &RunMetadata,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<RunReport> {
        self.register(&run_id, sink)?;
        let source = WorkSource::Items {
            items: items.to_vec(),
            metadata: metadata.clone(),
        };
        self.execute(&run_id, source).await
    }

    /// Start a run over the items `provider` lists.
    ///
    /// Listing happens in the background as part of planning: a provider
    /// failure ends the run in `Error` and is returned by
    /// [`RunHandle::wait`].
    ///
    /// # Errors
    ///
    /// `Error::RunExists` if a run with the same id is still in flight.
    pub fn start_from_provider(
        &self,
        run_id: RunId,
        provider: Arc<dyn ChangeSetProvider>,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<RunHandle> {
        self.spawn_run(run_id, WorkSource::Provider(provider), sink)
    }

    /// Request cancellation of an in-flight run.
    ///
    /// Returns false if the run is unknown or already terminal.
    pub fn cancel(&self, run_id: &RunId) -> bool {
        let runs = self.runs();
        match runs.get(run_id) {
            Some(entry) if !entry.state.current_state().is_terminal() => {
                info!(run_id = %run_id, "cancellation requested");
                entry.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Progress of an in-flight run.
    pub fn progress(&self, run_id: &RunId) -> Option<OrchestrationProgress> {
        self.runs().get(run_id).map(|e| e.state.progress().clone())
    }

    pub fn active_runs(&self) -> Vec<RunId> {
        let mut ids: Vec<RunId> = self.runs().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn statistics(&self) -> OrchestratorStatistics {
        let active_runs = self.runs().len();
        let counters = self.counters();
        let finished = counters.successful + counters.failed + counters.cancelled;
        OrchestratorStatistics {
            total_runs: counters.total,
            successful_runs: counters.successful,
            failed_runs: counters.failed,
            cancelled_runs: counters.cancelled,
            active_runs,
            success_rate: counters.successful as f64 / finished.max(1) as f64,
            resources: self.inner.resources.refresh_metrics(),
        }
    }

    /// Cancel every run and shut the worker pool down.
    pub fn shutdown(&self) {
        for entry in self.runs().values() {
            entry.cancel.cancel();
        }
        self.inner.resources.shutdown();
    }

    fn register(&self, run_id: &RunId, sink: Arc<dyn ProgressSink>) -> Result<CancellationToken> {
        let mut runs = self.runs();
        if runs.contains_key(run_id) {
            return Err(Error::RunExists(run_id.clone()));
        }
        let cancel = CancellationToken::new();
        runs.insert(
            run_id.clone(),
            RunEntry {
                state: RunState::new(run_id.clone()),
                cancel: cancel.clone(),
                sink,
            },
        );
        self.counters().total += 1;
        Ok(cancel)
    }

    /// Apply `f` to a registered run. Pure bookkeeping under the lock.
    fn with_run<R>(&self, run_id: &RunId, f: impl FnOnce(&mut RunEntry) -> R) -> Option<R> {
        self.runs().get_mut(run_id).map(f)
    }

    fn is_cancelled(&self, run_id: &RunId) -> bool {
        self.with_run(run_id, |e| e.cancel.is_cancelled()).unwrap_or(true)
    }

    fn transition(&self, run_id: &RunId, target: OrchestrationState) -> Result<()> {
        self.with_run(run_id, |e| e.state.transition(target))
            .unwrap_or_else(|| Err(Error::RunNotFound(run_id.clone())))
    }

    /// Deliver the current snapshot to the run's sink, outside the lock.
    /// A panicking sink is logged and otherwise ignored.
    fn notify(&self, run_id: &RunId) {
        let Some((snapshot, sink)) = self.with_run(run_id, |e| (e.state.progress().clone(), Arc::clone(&e.sink)))
        else {
            return;
        };
        if catch_unwind(AssertUnwindSafe(|| sink.on_update(&snapshot))).is_err() {
            error!(run_id = %run_id, state = %snapshot.state, "progress sink panicked");
        }
    }

    fn transition_and_notify(&self, run_id: &RunId, target: OrchestrationState) -> Result<()> {
        self.transition(run_id, target)?;
        self.notify(run_id);
        Ok(())
    }

    async fn execute(&self, run_id: &RunId, source: WorkSource) -> Result<RunReport> {
        let started = Instant::now();
        let started_at = Utc::now();
        self.inner.resources.start_maintenance();
        self.notify(run_id);

        if self.is_cancelled(run_id) {
            return self.finish(run_id, ExecutionPlan::default(), Vec::new(), 0, started, started_at);
        }

        self.transition_and_notify(run_id, OrchestrationState::Planning)?;
        let planned = match source.collect(run_id).await {
            Ok((items, metadata)) => self.inner.scheduler.create_plan(run_id, &items, &metadata),
            Err(e) => Err(e),
        };
        let plan = match planned {
            Ok(plan) => plan,
            Err(e) => {
                error!(run_id = %run_id, error = %e, "planning failed");
                self.with_run(run_id, |entry| {
                    entry.state.progress_mut().current_operation = format!("planning failed: {}", e);
                });
                self.transition_and_notify(run_id, OrchestrationState::Error)?;
                self.release(run_id, OrchestrationState::Error);
                return Err(e);
            }
        };

        self.with_run(run_id, |e| {
            e.state.set_plan_totals(plan.total_tasks(), plan.total_batches());
        });
        if self.is_cancelled(run_id) {
            return self.finish(run_id, plan, Vec::new(), 0, started, started_at);
        }
        self.transition_and_notify(run_id, OrchestrationState::Executing)?;

        let mut task_results: Vec<TaskReport> = Vec::with_capacity(plan.total_tasks());
        let mut batches_completed = 0;
        for (index, batch) in plan.batches.iter().enumerate() {
            if self.is_cancelled(run_id) {
                info!(run_id = %run_id, batch = index, "cancelled before batch");
                break;
            }
            self.with_run(run_id, |e| {
                let progress = e.state.progress_mut();
                progress.current_batch_index = index;
                progress.current_operation =
                    format!("executing batch {}/{}", index + 1, plan.total_batches());
            });

            let results = self.execute_batch(run_id, index, batch).await;
            self.with_run(run_id, |e| {
                for result in &results {
                    e.state.record_task(result.is_success());
                }
            });
            task_results.extend(results);
            batches_completed += 1;
            self.notify(run_id);
        }

        self.finish(run_id, plan, task_results, batches_completed, started, started_at)
    }

    /// Submit every task of a batch and wait for the pool to settle all of
    /// them. Each deadline is fixed at assignment, so queueing time counts.
    async fn execute_batch(&self, run_id: &RunId, index: usize, batch: &Batch) -> Vec<TaskReport> {
        debug!(run_id = %run_id, batch = %batch.id, tasks = batch.len(), "submitting batch");

        let handles: Vec<_> = batch
            .tasks
            .iter()
            .map(|task| self.inner.resources.assign_task(task.clone()).into_handle())
            .collect();
        let executions = join_all(handles.into_iter().map(|h| h.settle())).await;

        batch
            .tasks
            .iter()
            .zip(executions)
            .map(|(task, execution)| {
                if let Some(kind) = execution.outcome.failure_kind() {
                    warn!(run_id = %run_id, task_id = %task.id, target = %task.target_key, kind = %kind, "task failed");
                }
                TaskReport::new(task.target_key.clone(), task.priority, index, execution)
            })
            .collect()
    }

    /// Aggregate, move to the terminal state and release the run entry.
    fn finish(
        &self,
        run_id: &RunId,
        plan: ExecutionPlan,
        task_results: Vec<TaskReport>,
        batches_completed: usize,
        started: Instant,
        started_at: chrono::DateTime<Utc>,
    ) -> Result<RunReport> {
        let cancelled = self.is_cancelled(run_id);
        if !cancelled {
            self.transition_and_notify(run_id, OrchestrationState::Aggregating)?;
        }

        let summary = RunSummary::aggregate(&task_results, started.elapsed());
        let analyzed = task_results.iter().filter(|r| r.is_success()).count();
        let failed = task_results.len() - analyzed;

        let terminal = if cancelled {
            OrchestrationState::Cancelled
        } else {
            OrchestrationState::Completed
        };
        self.transition_and_notify(run_id, terminal)?;

        let report = RunReport {
            run_id: run_id.clone(),
            state: terminal,
            total_tasks: plan.total_tasks(),
            total_batches: plan.total_batches(),
            batches_completed,
            total_tasks_analyzed: analyzed,
            total_tasks_failed: failed,
            summary,
            task_results,
            diagnostics: plan.diagnostics,
            resource_metrics: self.inner.resources.refresh_metrics(),
            started_at,
            finished_at: Utc::now(),
        };
        self.release(run_id, terminal);
        info!(
            run_id = %run_id,
            state = %terminal,
            analyzed,
            failed,
            batches = batches_completed,
            "run finished"
        );
        Ok(report)
    }

    fn release(&self, run_id: &RunId, terminal: OrchestrationState) {
        self.runs().remove(run_id);
        let mut counters = self.counters();
        match terminal {
            OrchestrationState::Completed => counters.successful += 1,
            OrchestrationState::Error => counters.failed += 1,
            OrchestrationState::Cancelled => counters.cancelled += 1,
            _ => {}
        }
    }
}
