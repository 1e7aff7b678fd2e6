//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Scripted analysis workers with per-target behaviour
//! - Small, fast configurations
//! - Predefined change sets and an unreachable provider
//! - A sink that records every progress snapshot

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use reviewflow::capability::{AnalysisResult, AnalysisWorker, ChangeSetProvider, ProgressSink, RunContext, WorkerFactory};
use reviewflow::config::{Config, DurationTable, PoolConfig, SchedulerConfig};
use reviewflow::core::{Task, WorkDescriptor};
use reviewflow::run::{OrchestrationProgress, OrchestrationState};
use reviewflow::{Error, Result};

/// What a scripted worker does for one target.
#[derive(Debug, Clone)]
pub enum Behaviour {
    Succeed { issues: usize },
    Fail,
    Sleep(Duration),
}

/// Per-target behaviour shared by every worker a factory creates.
#[derive(Debug, Default)]
pub struct Script {
    behaviours: HashMap<String, Behaviour>,
    delay: Duration,
    calls: AtomicUsize,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay applied to every successful task.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn on(mut self, target_key: &str, behaviour: Behaviour) -> Self {
        self.behaviours.insert(target_key.to_string(), behaviour);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub struct ScriptedWorker {
    script: Arc<Script>,
}

#[async_trait]
impl AnalysisWorker for ScriptedWorker {
    async fn run(&self, task: &Task) -> Result<AnalysisResult> {
        self.script.calls.fetch_add(1, Ordering::SeqCst);
        let behaviour = self
            .script
            .behaviours
            .get(&task.target_key)
            .cloned()
            .unwrap_or(Behaviour::Succeed { issues: 1 });
        match behaviour {
            Behaviour::Succeed { issues } => {
                tokio::time::sleep(self.script.delay).await;
                Ok(AnalysisResult {
                    issues_found: issues,
                    confidence_score: 0.8,
                    ..Default::default()
                })
            }
            Behaviour::Fail => Err(Error::Analysis(format!("scripted failure for {}", task.target_key))),
            Behaviour::Sleep(d) => {
                tokio::time::sleep(d).await;
                Ok(AnalysisResult::default())
            }
        }
    }
}

pub fn scripted_factory(script: Arc<Script>) -> Arc<dyn WorkerFactory> {
    Arc::new(move || -> Result<Arc<dyn AnalysisWorker>> {
        Ok(Arc::new(ScriptedWorker {
            script: Arc::clone(&script),
        }))
    })
}

/// Configuration with millisecond estimates and a short safety margin.
pub fn fast_config(min_workers: usize, max_workers: usize, max_parallel_tasks: usize) -> Config {
    let mut config = Config::default();
    config.scheduler = SchedulerConfig {
        max_parallel_tasks,
        base_durations: DurationTable::uniform(Duration::from_millis(50)),
        max_analysis_time_per_file: Duration::from_secs(1),
        max_batch_duration: Duration::from_secs(60),
        ..SchedulerConfig::default()
    };
    config.pool = PoolConfig {
        idle_timeout: Duration::from_millis(10),
        maintenance_interval: Duration::from_millis(20),
        ..PoolConfig::with_bounds(min_workers, max_workers)
    };
    config.orchestrator.safety_margin = Duration::from_secs(2);
    config
}

/// `n` unrelated targets named `f0.py` .. `f{n-1}.py`.
pub fn independent_items(n: usize) -> Vec<WorkDescriptor> {
    (0..n).map(|i| WorkDescriptor::new(format!("f{}.py", i))).collect()
}

/// Each key explicitly depends on the previous one.
pub fn chain_items(keys: &[&str]) -> Vec<WorkDescriptor> {
    keys.iter()
        .enumerate()
        .map(|(i, key)| {
            let item = WorkDescriptor::new(*key);
            match i.checked_sub(1) {
                Some(prev) => item.with_dependency(keys[prev]),
                None => item,
            }
        })
        .collect()
}

/// A change set provider whose source is unreachable.
pub struct OfflineProvider;

#[async_trait]
impl ChangeSetProvider for OfflineProvider {
    async fn list_changed_items(&self, _ctx: &RunContext) -> Result<Vec<WorkDescriptor>> {
        Err(Error::Provider("change set source is offline".to_string()))
    }

    async fn get_item_content(&self, _key: &str) -> Result<Option<String>> {
        Err(Error::Provider("change set source is offline".to_string()))
    }
}

/// Records every progress snapshot it receives.
#[derive(Default)]
pub struct RecordingSink {
    updates: Mutex<Vec<OrchestrationProgress>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn updates(&self) -> Vec<OrchestrationProgress> {
        self.updates.lock().unwrap().clone()
    }

    /// Observed states with consecutive repeats collapsed.
    pub fn states(&self) -> Vec<OrchestrationState> {
        let mut states: Vec<OrchestrationState> = self.updates().iter().map(|p| p.state).collect();
        states.dedup();
        states
    }
}

impl ProgressSink for RecordingSink {
    fn on_update(&self, progress: &OrchestrationProgress) {
        self.updates.lock().unwrap().push(progress.clone());
    }
}
