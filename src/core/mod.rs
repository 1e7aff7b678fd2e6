//! Core domain models for review orchestration.
//!
//! Tasks, batches, execution plans and the dependency graph used to
//! order them.

pub mod batch;
pub mod dag;
pub mod task;

pub use batch::{Batch, BatchId, ExecutionPlan};
pub use dag::{DependencyGraph, TopologicalOrder};
pub use task::{Complexity, Priority, RunMetadata, Task, TaskId, TaskPayload, WorkDescriptor};
