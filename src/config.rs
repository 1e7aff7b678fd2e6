use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::{Error, Result};

/// Top-level configuration, stored as TOML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub pool: PoolConfig,
    pub orchestrator: OrchestratorSettings,
}

/// Planning limits and classification rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum number of tasks in one batch.
    pub max_parallel_tasks: usize,
    /// Ceiling on a single task's estimated duration.
    #[serde(with = "humantime_serde")]
    pub max_analysis_time_per_file: Duration,
    /// Ceiling on the summed estimates of one batch.
    #[serde(with = "humantime_serde")]
    pub max_batch_duration: Duration,
    pub base_durations: DurationTable,
    pub priority_rules: PriorityRules,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_parallel_tasks: 4,
            max_analysis_time_per_file: Duration::from_secs(600),
            max_batch_duration: Duration::from_secs(1200),
            base_durations: DurationTable::default(),
            priority_rules: PriorityRules::default(),
        }
    }
}

/// Base analysis time per complexity level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DurationTable {
    #[serde(with = "humantime_serde")]
    pub simple: Duration,
    #[serde(with = "humantime_serde")]
    pub moderate: Duration,
    #[serde(with = "humantime_serde")]
    pub complex: Duration,
}

impl Default for DurationTable {
    fn default() -> Self {
        Self {
            simple: Duration::from_secs(120),
            moderate: Duration::from_secs(300),
            complex: Duration::from_secs(600),
        }
    }
}

impl DurationTable {
    /// Same base time for every complexity level.
    pub fn uniform(duration: Duration) -> Self {
        Self {
            simple: duration,
            moderate: duration,
            complex: duration,
        }
    }
}

const CODE_EXT: &str = r"\.(py|js|ts|java|go)$";

/// Ordered target-key patterns used to classify priority.
///
/// Patterns are matched case-insensitively; the first list with a match
/// wins, checked in the order critical, high, low.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityRules {
    pub critical: Vec<String>,
    pub high: Vec<String>,
    pub low: Vec<String>,
}

impl Default for PriorityRules {
    fn default() -> Self {
        Self {
            critical: vec![
                format!(r"(^|/)(main|index|app){}", CODE_EXT),
                format!(r"(^|/)models?/.*{}", CODE_EXT),
                format!(r"(^|/)services?/.*{}", CODE_EXT),
                format!(r"(^|/)controllers?/.*{}", CODE_EXT),
            ],
            high: vec![
                format!(r"(^|/)auth.*{}", CODE_EXT),
                format!(r"(^|/)security.*{}", CODE_EXT),
                format!(r"(^|/)(api|endpoints?)/.*{}", CODE_EXT),
                format!(r"(^|/)database.*{}", CODE_EXT),
            ],
            low: vec![
                r"\.(md|txt|yml|yaml|json)$".to_string(),
                r"(^|/)tests?/".to_string(),
                r"(^|/)docs?/".to_string(),
                r"(^|/)(config|settings?)".to_string(),
            ],
        }
    }
}

/// Worker pool sizing and scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub min_workers: usize,
    pub max_workers: usize,
    pub auto_scale: bool,
    /// Busy ratio above which a new worker may be created.
    pub scale_up_threshold: f64,
    /// Idle time after which a worker above the minimum is reclaimed.
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub maintenance_interval: Duration,
    /// Response time that earns a full speed score.
    #[serde(with = "humantime_serde")]
    pub reference_duration: Duration,
    /// Lower bound applied to average response time when scoring speed.
    #[serde(with = "humantime_serde")]
    pub response_time_floor: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_workers: 8,
            max_workers: 32,
            auto_scale: true,
            scale_up_threshold: 0.8,
            idle_timeout: Duration::from_secs(600),
            maintenance_interval: Duration::from_secs(30),
            reference_duration: Duration::from_secs(300),
            response_time_floor: Duration::from_secs(30),
        }
    }
}

impl PoolConfig {
    pub fn with_bounds(min_workers: usize, max_workers: usize) -> Self {
        Self {
            min_workers,
            max_workers,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    /// Added to a task's estimate to form its completion deadline.
    #[serde(with = "humantime_serde")]
    pub safety_margin: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            safety_margin: Duration::from_secs(60),
        }
    }
}

impl Config {
    pub fn reviewflow_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".reviewflow"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::reviewflow_dir()?.join("config.toml"))
    }

    /// Load from the default location, falling back to defaults.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "loading config");
        if !path.exists() {
            debug!("config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        debug!(path = %path.display(), "config saved");
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.scheduler.validate()?;
        self.pool.validate()
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_parallel_tasks == 0 {
            return Err(Error::Config("max_parallel_tasks must be at least 1".into()));
        }
        crate::orchestration::detection::PriorityMatcher::compile(&self.priority_rules)?;
        Ok(())
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(Error::Config("max_workers must be at least 1".into()));
        }
        if self.min_workers > self.max_workers {
            return Err(Error::Config(format!(
                "min_workers ({}) exceeds max_workers ({})",
                self.min_workers, self.max_workers
            )));
        }
        if !(self.scale_up_threshold > 0.0 && self.scale_up_threshold <= 1.0) {
            return Err(Error::Config(format!(
                "scale_up_threshold must be in (0, 1], got {}",
                self.scale_up_threshold
            )));
        }
        Ok(())
    }
}
