pub mod analyzers;
pub mod authorization;
pub mod capability;
pub mod changeset;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod orchestration;
pub mod run;
pub mod util;

pub use error::{Error, Result};
pub use orchestration::{Orchestrator, ResourceManager, TaskScheduler};
pub use run::{OrchestrationState, RunId, RunReport};
