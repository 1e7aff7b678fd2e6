use thiserror::Error;

use crate::orchestration::WorkerId;
use crate::run::RunId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Planning failed: {0}")]
    Planning(String),

    #[error("Run already in progress: {0}")]
    RunExists(RunId),

    #[error("Run not found: {0}")]
    RunNotFound(RunId),

    #[error("Worker creation failed: {0}")]
    WorkerCreation(String),

    #[error("Worker not found: {0}")]
    WorkerNotFound(WorkerId),

    #[error("Worker {id} is {actual}, expected {expected}")]
    InvalidWorkerState {
        id: WorkerId,
        expected: String,
        actual: String,
    },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Analysis failed: {0}")]
    Analysis(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Task join error: {0}")]
    TaskJoin(String),

    #[error("Change provider error: {0}")]
    Provider(String),

    #[error("Authorization error: {0}")]
    Authorization(String),
}

pub type Result<T> = std::result::Result<T, Error>;
