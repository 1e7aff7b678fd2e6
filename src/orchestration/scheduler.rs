//! Planning: from raw change descriptors to an ordered list of batches.
//!
//! `TaskScheduler::create_plan` runs the planning pipeline:
//!
//! 1. create one task per analyzable descriptor (deleted or keyless
//!    descriptors are skipped)
//! 2. classify priority from the target key
//! 3. extract dependencies from import statements and explicit links
//! 4. score complexity and estimate duration
//! 5. order tasks with a priority-aware topological sort
//! 6. pack the order greedily into batches
//!
//! Malformed descriptors never fail planning; they fall back to Medium
//! priority and Simple complexity.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::core::batch::{Batch, ExecutionPlan};
use crate::core::dag::DependencyGraph;
use crate::core::task::{Complexity, Priority, RunMetadata, Task, TaskId, TaskPayload, WorkDescriptor};
use crate::error::Result;
use crate::run::RunId;

use super::detection::{
    classify_complexity, count_changes, extract_references, reference_matches, ChangeProfile,
    PriorityMatcher,
};

/// Builds execution plans.
#[derive(Debug, Clone)]
pub struct TaskScheduler {
    config: SchedulerConfig,
    matcher: PriorityMatcher,
}

impl TaskScheduler {
    /// # Errors
    ///
    /// Returns `Error::Config` if the configuration is invalid.
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        config.validate()?;
        let matcher = PriorityMatcher::compile(&config.priority_rules)?;
        Ok(Self { config, matcher })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Base duration for the complexity, scaled by priority and capped at
    /// the per-target ceiling.
    pub fn estimate_duration(&self, priority: Priority, complexity: Complexity) -> Duration {
        let base = match complexity {
            Complexity::Simple => self.config.base_durations.simple,
            Complexity::Moderate => self.config.base_durations.moderate,
            Complexity::Complex => self.config.base_durations.complex,
        };
        let scaled = match priority {
            Priority::Critical => base.mul_f64(1.5),
            Priority::High => base.mul_f64(1.2),
            Priority::Medium | Priority::Low => base,
        };
        scaled.min(self.config.max_analysis_time_per_file)
    }

    /// Produce the execution plan for a run.
    ///
    /// An empty input yields an empty plan. Dependency cycles are broken by
    /// forcing the most urgent blocked task; each forced task is recorded
    /// in `ExecutionPlan::diagnostics`.
    pub fn create_plan(
        &self,
        run_id: &RunId,
        items: &[WorkDescriptor],
        metadata: &RunMetadata,
    ) -> Result<ExecutionPlan> {
        let descriptors = self.select_descriptors(items);
        if descriptors.is_empty() {
            info!(run_id = %run_id, "nothing to analyze, empty plan");
            return Ok(ExecutionPlan::default());
        }

        let mut tasks: Vec<Task> = descriptors
            .iter()
            .map(|(key, d)| self.build_task(run_id, key, d, metadata))
            .collect();

        let graph = self.link_dependencies(&mut tasks, &descriptors)?;

        let urgency: HashMap<&TaskId, (u8, u8)> = tasks.iter().map(|t| (&t.id, t.urgency())).collect();
        let order = graph.priority_order(|id| urgency.get(id).copied().unwrap_or((u8::MAX, u8::MAX)));

        let mut diagnostics = Vec::new();
        for id in &order.forced {
            let key = tasks
                .iter()
                .find(|t| &t.id == id)
                .map_or("?", |t| t.target_key.as_str());
            let message = format!(
                "dependency cycle: {} ({}) scheduled before its dependencies",
                key, id
            );
            warn!(run_id = %run_id, task_id = %id, target = key, "dependency cycle, forcing task");
            diagnostics.push(message);
        }

        let mut by_id: HashMap<TaskId, Task> = tasks.into_iter().map(|t| (t.id.clone(), t)).collect();
        let ordered: Vec<Task> = order.order.iter().filter_map(|id| by_id.remove(id)).collect();

        let batches = self.pack_batches(ordered, &graph);
        let plan = ExecutionPlan {
            batches,
            diagnostics,
        };
        info!(
            run_id = %run_id,
            tasks = plan.total_tasks(),
            batches = plan.total_batches(),
            "execution plan created"
        );
        Ok(plan)
    }

    /// Analyzable descriptors keyed by target, first occurrence wins.
    fn select_descriptors<'a>(&self, items: &'a [WorkDescriptor]) -> Vec<(String, &'a WorkDescriptor)> {
        let mut seen = HashSet::new();
        let mut selected = Vec::new();
        for item in items {
            if item.deleted_file {
                debug!(path = ?item.old_path, "skipping deleted target");
                continue;
            }
            let Some(key) = item.target_key() else {
                debug!("skipping descriptor without a target key");
                continue;
            };
            if !seen.insert(key.to_string()) {
                warn!(target = key, "duplicate target in change set, keeping the first");
                continue;
            }
            selected.push((key.to_string(), item));
        }
        selected
    }

    fn build_task(
        &self,
        run_id: &RunId,
        key: &str,
        descriptor: &WorkDescriptor,
        metadata: &RunMetadata,
    ) -> Task {
        let (counted_added, counted_removed) = count_changes(&descriptor.diff);
        let lines_added = descriptor.additions.unwrap_or(counted_added);
        let lines_removed = descriptor.deletions.unwrap_or(counted_removed);

        let payload = TaskPayload {
            diff: descriptor.diff.clone(),
            lines_added,
            lines_removed,
            metadata: metadata.clone(),
        };
        let mut task = Task::new(TaskId::derive(run_id.as_str(), key), key, payload);

        task.priority = self.matcher.classify(key);
        task.complexity = classify_complexity(&ChangeProfile {
            target_key: key,
            diff: &descriptor.diff,
            lines_added,
            lines_removed,
        });
        task.estimated_duration = self.estimate_duration(task.priority, task.complexity);
        task
    }

    /// Resolve references between tasks and record them on both the graph
    /// and each task's dependency set.
    fn link_dependencies(
        &self,
        tasks: &mut [Task],
        descriptors: &[(String, &WorkDescriptor)],
    ) -> Result<DependencyGraph> {
        let mut graph = DependencyGraph::new();
        for task in tasks.iter() {
            graph.add_task(task.id.clone());
        }

        let keys: Vec<(TaskId, String)> = tasks.iter().map(|t| (t.id.clone(), t.target_key.clone())).collect();
        for (task, (_, descriptor)) in tasks.iter_mut().zip(descriptors) {
            let mut references = extract_references(&descriptor.diff);
            references.extend(descriptor.depends_on.iter().cloned());

            for reference in &references {
                for (other_id, other_key) in &keys {
                    if other_id == &task.id || !reference_matches(reference, other_key) {
                        continue;
                    }
                    if graph.add_dependency(other_id, &task.id)? {
                        debug!(
                            dependent = %task.target_key,
                            dependency = %other_key,
                            reference = %reference,
                            "dependency found"
                        );
                    }
                    task.dependencies.insert(other_id.clone());
                }
            }
        }
        Ok(graph)
    }

    /// Greedy packing. A task joins the open batch only if the batch has
    /// room, the summed estimate stays within the batch ceiling, and no
    /// member is linked to it in either direction. Otherwise the batch is
    /// closed and a new one started.
    fn pack_batches(&self, ordered: Vec<Task>, graph: &DependencyGraph) -> Vec<Batch> {
        let mut batches = Vec::new();
        let mut current: Vec<Task> = Vec::new();
        let mut current_duration = Duration::ZERO;

        for task in ordered {
            let fits = current.is_empty()
                || (current.len() < self.config.max_parallel_tasks
                    && current_duration + task.estimated_duration <= self.config.max_batch_duration
                    && !current.iter().any(|member| {
                        graph.has_dependency(&member.id, &task.id) || graph.has_dependency(&task.id, &member.id)
                    }));

            if !fits {
                batches.push(Batch::new(batches.len(), std::mem::take(&mut current)));
                current_duration = Duration::ZERO;
            }
            current_duration += task.estimated_duration;
            current.push(task);
        }
        if !current.is_empty() {
            batches.push(Batch::new(batches.len(), current));
        }
        batches
    }
}
