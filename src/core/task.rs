//! Task data model for the execution plan.
//!
//! Tasks are the atomic units of analysis work, one per changed target.
//! They are created by the scheduler, frozen once placed in a batch, and
//! handed to workers by the resource manager.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::time::Duration;

/// Stable identifier for a task.
///
/// Derived from the run identifier and the target key, so planning the
/// same input twice yields the same ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Derive the task id for a target within a run.
    pub fn derive(run_id: &str, target_key: &str) -> Self {
        let digest = Sha256::digest(format!("{}_{}", run_id, target_key).as_bytes());
        let hex: String = digest[..8].iter().map(|b| format!("{:02x}", b)).collect();
        Self(format!("task_{}", hex))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// How urgently a task should be analyzed.
///
/// Lower rank means more urgent; ordering follows rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Core business logic and entrypoints.
    Critical = 1,
    /// Security-sensitive or externally exposed code.
    High = 2,
    /// Everything not matched by a rule.
    Medium = 3,
    /// Docs, configuration and tests.
    Low = 4,
}

impl Priority {
    pub fn rank(self) -> u8 {
        self as u8
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Critical => write!(f, "critical"),
            Priority::High => write!(f, "high"),
            Priority::Medium => write!(f, "medium"),
            Priority::Low => write!(f, "low"),
        }
    }
}

/// Estimated analysis effort for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple = 1,
    Moderate = 2,
    Complex = 3,
}

impl Complexity {
    pub fn rank(self) -> u8 {
        self as u8
    }
}

impl Default for Complexity {
    fn default() -> Self {
        Self::Simple
    }
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Complexity::Simple => write!(f, "simple"),
            Complexity::Moderate => write!(f, "moderate"),
            Complexity::Complex => write!(f, "complex"),
        }
    }
}

/// A raw changed item as supplied by a change provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkDescriptor {
    /// Path after the change.
    #[serde(default)]
    pub new_path: Option<String>,
    /// Path before the change.
    #[serde(default)]
    pub old_path: Option<String>,
    /// Deleted targets are not analyzed.
    #[serde(default)]
    pub deleted_file: bool,
    /// Unified diff text for the change.
    #[serde(default)]
    pub diff: String,
    /// Explicit added-line count, overriding the count taken from `diff`.
    #[serde(default)]
    pub additions: Option<usize>,
    /// Explicit removed-line count, overriding the count taken from `diff`.
    #[serde(default)]
    pub deletions: Option<usize>,
    /// Target keys this change is known to depend on.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl WorkDescriptor {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            new_path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn with_diff(mut self, diff: impl Into<String>) -> Self {
        self.diff = diff.into();
        self
    }

    pub fn with_dependency(mut self, target_key: impl Into<String>) -> Self {
        self.depends_on.push(target_key.into());
        self
    }

    pub fn deleted(mut self) -> Self {
        self.deleted_file = true;
        self
    }

    /// The key used to identify the target: new path, falling back to old path.
    pub fn target_key(&self) -> Option<&str> {
        self.new_path
            .as_deref()
            .filter(|p| !p.is_empty())
            .or_else(|| self.old_path.as_deref().filter(|p| !p.is_empty()))
    }
}

/// Run-level metadata shared by every task of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
}

impl RunMetadata {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
        }
    }
}

/// What a worker needs to analyze a task. File content is not included;
/// workers fetch it lazily.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub diff: String,
    pub lines_added: usize,
    pub lines_removed: usize,
    pub metadata: RunMetadata,
}

/// A single schedulable unit of analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    /// The changed target, usually a file path.
    pub target_key: String,
    pub payload: TaskPayload,
    pub priority: Priority,
    pub complexity: Complexity,
    #[serde(with = "humantime_serde")]
    pub estimated_duration: Duration,
    /// Tasks that must finish before this one starts.
    pub dependencies: BTreeSet<TaskId>,
}

impl Task {
    /// Create a task with default classification; the scheduler fills in
    /// priority, complexity, duration and dependencies.
    pub fn new(id: TaskId, target_key: impl Into<String>, payload: TaskPayload) -> Self {
        Self {
            id,
            target_key: target_key.into(),
            payload,
            priority: Priority::default(),
            complexity: Complexity::default(),
            estimated_duration: Duration::ZERO,
            dependencies: BTreeSet::new(),
        }
    }

    pub fn depends_on(&self, other: &TaskId) -> bool {
        self.dependencies.contains(other)
    }

    /// Sort key used for scheduling: lower is more urgent.
    pub fn urgency(&self) -> (u8, u8) {
        (self.priority.rank(), self.complexity.rank())
    }
}
