//! Orchestration run types.
//!
//! A run is one end-to-end plan, execute and aggregate pass over a change
//! set. This module holds the run identifier, its state machine, the
//! progress record handed to sinks, and the final report.

mod report;
mod state;
mod types;

pub use report::{DepthDistribution, RunReport, RunSummary, TaskReport};
pub use state::{RunState, StateHistoryEntry};
pub use types::{OrchestrationProgress, OrchestrationState, RunId};
