//! Batches and execution plans.
//!
//! A batch is a group of tasks that are safe to run concurrently: no task
//! in a batch depends on another task in the same batch. Batches run in
//! plan order, each one finishing before the next starts.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::task::{Task, TaskId};

/// Identifier of a batch within a plan (`batch_0`, `batch_1`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub String);

impl BatchId {
    pub fn from_index(index: usize) -> Self {
        Self(format!("batch_{}", index))
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    pub tasks: Vec<Task>,
    /// Sum of member estimates.
    #[serde(with = "humantime_serde")]
    pub estimated_total_duration: Duration,
    pub max_parallelism: usize,
}

impl Batch {
    pub fn new(index: usize, tasks: Vec<Task>) -> Self {
        let estimated_total_duration = tasks.iter().map(|t| t.estimated_duration).sum();
        let max_parallelism = tasks.len();
        Self {
            id: BatchId::from_index(index),
            tasks,
            estimated_total_duration,
            max_parallelism,
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.tasks.iter().any(|t| &t.id == id)
    }

    pub fn target_keys(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.target_key.as_str()).collect()
    }
}

/// The ordered output of planning.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub batches: Vec<Batch>,
    /// Non-fatal planning notes, such as forced ordering through a cycle.
    pub diagnostics: Vec<String>,
}

impl ExecutionPlan {
    pub fn total_tasks(&self) -> usize {
        self.batches.iter().map(Batch::len).sum()
    }

    pub fn total_batches(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.batches.iter().flat_map(|b| b.tasks.iter())
    }

    /// Index of the batch holding `id`, if planned.
    pub fn batch_index_of(&self, id: &TaskId) -> Option<usize> {
        self.batches.iter().position(|b| b.contains(id))
    }
}
