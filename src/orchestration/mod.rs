//! Orchestration layer.
//!
//! Planning (`scheduler`, `detection`), the elastic worker pool (`pool`,
//! `health`) and the run driver that ties them together (`orchestrator`).

pub mod detection;
pub mod health;
pub mod orchestrator;
pub mod pool;
pub mod scheduler;

pub use detection::{ChangeProfile, PriorityMatcher};
pub use health::{MaintenanceHandle, MaintenanceLoop};
pub use orchestrator::{Orchestrator, OrchestratorStatistics, RunHandle};
pub use pool::{
    Assignment, FailureKind, PoolEvent, ResourceManager, ResourceMetrics, TaskExecution,
    TaskHandle, TaskOutcome, WorkerId, WorkerInstance, WorkerStatus, DEFAULT_EXECUTION_MARGIN, SETTLE_GRACE,
};
pub use scheduler::TaskScheduler;
