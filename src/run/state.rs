//! Run state management with transition validation.
//!
//! `RunState` owns a run's progress record and enforces the one-way
//! state machine of an orchestration run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::{OrchestrationProgress, OrchestrationState, RunId};

/// A record of a state transition with timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateHistoryEntry {
    /// The state that was entered.
    pub state: OrchestrationState,
    /// When this state was entered.
    pub entered_at: DateTime<Utc>,
}

/// Tracks a run's progress and enforces valid state transitions.
///
/// Initializing -> Planning -> Executing -> Aggregating -> Completed
///
/// Planning may also fail into Error, and any non-terminal state may move
/// to Cancelled. There is no transition back to an earlier state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    progress: OrchestrationProgress,
    history: Vec<StateHistoryEntry>,
}

impl RunState {
    pub fn new(run_id: RunId) -> Self {
        let progress = OrchestrationProgress::new(run_id);
        Self {
            history: vec![StateHistoryEntry {
                state: progress.state,
                entered_at: progress.started_at,
            }],
            progress,
        }
    }

    /// Check if a transition to `target` is valid from the current state.
    pub fn can_transition(&self, target: OrchestrationState) -> bool {
        use OrchestrationState as S;

        let current = self.progress.state;
        if target == S::Cancelled {
            return !current.is_terminal();
        }
        matches!(
            (current, target),
            (S::Initializing, S::Planning)
                | (S::Initializing, S::Error)
                | (S::Planning, S::Executing)
                | (S::Planning, S::Error)
                | (S::Executing, S::Aggregating)
                | (S::Executing, S::Error)
                | (S::Aggregating, S::Completed)
                | (S::Aggregating, S::Error)
        )
    }

    /// Attempt to move the run to `target`.
    pub fn transition(&mut self, target: OrchestrationState) -> Result<()> {
        if !self.can_transition(target) {
            return Err(Error::InvalidStateTransition {
                from: self.progress.state.to_string(),
                to: target.to_string(),
            });
        }

        self.progress.state = target;
        self.progress.current_operation = target.to_string();
        self.history.push(StateHistoryEntry {
            state: target,
            entered_at: Utc::now(),
        });
        Ok(())
    }

    pub fn current_state(&self) -> OrchestrationState {
        self.progress.state
    }

    pub fn history(&self) -> &[StateHistoryEntry] {
        &self.history
    }

    pub fn progress(&self) -> &OrchestrationProgress {
        &self.progress
    }

    /// Mutable access to counters. State changes must go through
    /// [`RunState::transition`].
    pub fn progress_mut(&mut self) -> &mut OrchestrationProgress {
        &mut self.progress
    }

    /// Record planned totals.
    pub fn set_plan_totals(&mut self, total_tasks: usize, total_batches: usize) {
        self.progress.total_tasks = total_tasks;
        self.progress.total_batches = total_batches;
    }

    /// Record one task outcome. Counters never exceed the planned total.
    pub fn record_task(&mut self, success: bool) {
        if self.progress.processed_tasks() >= self.progress.total_tasks {
            return;
        }
        if success {
            self.progress.completed_tasks += 1;
        } else {
            self.progress.failed_tasks += 1;
        }
    }
}
