//! External collaborator interfaces.
//!
//! The orchestration core never performs analysis itself. Workers,
//! change sources and progress consumers are injected as trait objects.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::core::{RunMetadata, Task, WorkDescriptor};
use crate::error::Result;
use crate::run::{OrchestrationProgress, RunId};

/// How deeply a worker examined its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisDepth {
    #[default]
    Shallow,
    Medium,
    Deep,
}

impl std::fmt::Display for AnalysisDepth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalysisDepth::Shallow => write!(f, "shallow"),
            AnalysisDepth::Medium => write!(f, "medium"),
            AnalysisDepth::Deep => write!(f, "deep"),
        }
    }
}

/// Result of analyzing one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AnalysisResult {
    pub issues_found: usize,
    /// Worker confidence in `0.0..=1.0`.
    pub confidence_score: f64,
    pub analysis_depth: AnalysisDepth,
    pub conversation_turns: u32,
}

/// Performs the analysis of a single task.
///
/// Invoked once per task on a pool worker. Returning `Err` marks the task
/// failed and puts the worker in the Error state.
#[async_trait]
pub trait AnalysisWorker: Send + Sync {
    async fn run(&self, task: &Task) -> Result<AnalysisResult>;
}

/// Creates the worker behind each pool slot.
pub trait WorkerFactory: Send + Sync {
    fn create(&self) -> Result<Arc<dyn AnalysisWorker>>;
}

impl<F> WorkerFactory for F
where
    F: Fn() -> Result<Arc<dyn AnalysisWorker>> + Send + Sync,
{
    fn create(&self) -> Result<Arc<dyn AnalysisWorker>> {
        self()
    }
}

/// Context passed to a change provider when listing a run's items.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RunContext {
    pub run_id: Option<RunId>,
    pub metadata: RunMetadata,
}

/// Source of raw work descriptors for a run.
#[async_trait]
pub trait ChangeSetProvider: Send + Sync {
    async fn list_changed_items(&self, ctx: &RunContext) -> Result<Vec<WorkDescriptor>>;

    /// Full content of a target, if the provider has it.
    async fn get_item_content(&self, key: &str) -> Result<Option<String>>;

    /// Run-level metadata (title, description).
    fn metadata(&self) -> RunMetadata {
        RunMetadata::default()
    }
}

/// Receives progress snapshots. Called synchronously from the
/// coordinating task, so implementations must return quickly.
pub trait ProgressSink: Send + Sync {
    fn on_update(&self, progress: &OrchestrationProgress);
}

impl<F> ProgressSink for F
where
    F: Fn(&OrchestrationProgress) + Send + Sync,
{
    fn on_update(&self, progress: &OrchestrationProgress) {
        self(progress)
    }
}

/// Sink that discards every update.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn on_update(&self, _progress: &OrchestrationProgress) {}
}
