//! Final run reports and result aggregation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::capability::AnalysisDepth;
use crate::core::task::{Priority, TaskId};
use crate::orchestration::pool::{FailureKind, ResourceMetrics, TaskExecution, TaskOutcome, WorkerId};

use super::{OrchestrationState, RunId};

/// Outcome of one task, with enough context to tell "no issues found"
/// apart from "analysis could not run".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    pub task_id: TaskId,
    pub target_key: String,
    pub priority: Priority,
    pub batch_index: usize,
    pub worker_id: Option<WorkerId>,
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
    pub outcome: TaskOutcome,
}

impl TaskReport {
    pub fn new(target_key: impl Into<String>, priority: Priority, batch_index: usize, execution: TaskExecution) -> Self {
        Self {
            task_id: execution.task_id,
            target_key: target_key.into(),
            priority,
            batch_index,
            worker_id: execution.worker_id,
            elapsed: execution.elapsed,
            outcome: execution.outcome,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthDistribution {
    pub shallow: usize,
    pub medium: usize,
    pub deep: usize,
}

impl DepthDistribution {
    fn record(&mut self, depth: AnalysisDepth) {
        match depth {
            AnalysisDepth::Shallow => self.shallow += 1,
            AnalysisDepth::Medium => self.medium += 1,
            AnalysisDepth::Deep => self.deep += 1,
        }
    }
}

/// Aggregate statistics over a run's task reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_issues_found: usize,
    /// Mean confidence over successful results; 0 when none succeeded.
    pub average_confidence: f64,
    pub depth_distribution: DepthDistribution,
    /// Successes over processed tasks.
    pub success_rate: f64,
    /// Processed tasks per minute, with elapsed time floored at one minute.
    pub throughput_per_minute: f64,
    pub timeouts: usize,
    pub worker_errors: usize,
    pub abandoned: usize,
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn aggregate(results: &[TaskReport], elapsed: Duration) -> Self {
        let mut summary = Self {
            elapsed,
            ..Default::default()
        };
        let mut confidence_sum = 0.0;
        let mut successes = 0usize;

        for report in results {
            match &report.outcome {
                TaskOutcome::Succeeded(result) => {
                    successes += 1;
                    confidence_sum += result.confidence_score;
                    summary.total_issues_found += result.issues_found;
                    summary.depth_distribution.record(result.analysis_depth);
                }
                TaskOutcome::Failed { kind, .. } => match kind {
                    FailureKind::Timeout => summary.timeouts += 1,
                    FailureKind::WorkerError => summary.worker_errors += 1,
                    FailureKind::Abandoned => summary.abandoned += 1,
                },
            }
        }

        let processed = results.len();
        if successes > 0 {
            summary.average_confidence = confidence_sum / successes as f64;
        }
        summary.success_rate = successes as f64 / processed.max(1) as f64;
        let minutes = (elapsed.as_secs_f64() / 60.0).max(1.0);
        summary.throughput_per_minute = processed as f64 / minutes;
        summary
    }
}

/// The report every run produces, including cancelled ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub state: OrchestrationState,
    pub total_tasks: usize,
    pub total_batches: usize,
    pub batches_completed: usize,
    pub total_tasks_analyzed: usize,
    pub total_tasks_failed: usize,
    pub summary: RunSummary,
    pub task_results: Vec<TaskReport>,
    /// Planning notes such as forced cycle ordering.
    pub diagnostics: Vec<String>,
    pub resource_metrics: ResourceMetrics,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn failures(&self) -> impl Iterator<Item = &TaskReport> {
        self.task_results.iter().filter(|r| !r.is_success())
    }

    pub fn result_for(&self, target_key: &str) -> Option<&TaskReport> {
        self.task_results.iter().find(|r| r.target_key == target_key)
    }
}
