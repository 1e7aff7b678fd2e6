//! Core run type definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Caller-supplied identifier of an orchestration run.
///
/// Typically names the submission under review (e.g. `mr-42`). Task ids
/// are derived from it, so reusing a run id yields the same task ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a unique run id for ad-hoc runs.
    pub fn generate() -> Self {
        Self(format!("run-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RunId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::str::FromStr for RunId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

/// States of an orchestration run.
///
/// Runs move forward only:
/// Initializing -> Planning -> Executing -> Aggregating -> Completed,
/// with Error reachable from Planning and Cancelled from any
/// non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrchestrationState {
    #[default]
    Initializing,
    Planning,
    Executing,
    Aggregating,
    Completed,
    Error,
    Cancelled,
}

impl OrchestrationState {
    /// Completed, Error and Cancelled are terminal.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrchestrationState::Completed | OrchestrationState::Error | OrchestrationState::Cancelled
        )
    }
}

impl std::fmt::Display for OrchestrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrchestrationState::Initializing => write!(f, "initializing"),
            OrchestrationState::Planning => write!(f, "planning"),
            OrchestrationState::Executing => write!(f, "executing"),
            OrchestrationState::Aggregating => write!(f, "aggregating"),
            OrchestrationState::Completed => write!(f, "completed"),
            OrchestrationState::Error => write!(f, "error"),
            OrchestrationState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Snapshot of a run's progress, handed to progress sinks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationProgress {
    pub run_id: RunId,
    pub state: OrchestrationState,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    /// Index of the batch currently executing (or last executed).
    pub current_batch_index: usize,
    pub total_batches: usize,
    /// Human-readable description of the current step.
    pub current_operation: String,
    pub started_at: DateTime<Utc>,
}

impl OrchestrationProgress {
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            state: OrchestrationState::Initializing,
            total_tasks: 0,
            completed_tasks: 0,
            failed_tasks: 0,
            current_batch_index: 0,
            total_batches: 0,
            current_operation: "initializing".to_string(),
            started_at: Utc::now(),
        }
    }

    /// Tasks that reached an outcome, successful or not.
    pub fn processed_tasks(&self) -> usize {
        self.completed_tasks + self.failed_tasks
    }

    /// Fraction of tasks processed, in `0.0..=1.0`.
    pub fn fraction_done(&self) -> f64 {
        if self.total_tasks == 0 {
            return if self.state.is_terminal() { 1.0 } else { 0.0 };
        }
        self.processed_tasks() as f64 / self.total_tasks as f64
    }
}
