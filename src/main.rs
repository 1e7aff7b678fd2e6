use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::debug;

use reviewflow::analyzers::DiffHeuristicAnalyzer;
use reviewflow::capability::{AnalysisWorker, ChangeSetProvider, RunContext, WorkerFactory};
use reviewflow::changeset::JsonChangeSet;
use reviewflow::config::Config;
use reviewflow::run::OrchestrationProgress;
use reviewflow::util::format_duration;
use reviewflow::{logging, Orchestrator, Result, RunId, TaskScheduler};

/// reviewflow - dependency-aware parallel code review orchestration
#[derive(Parser, Debug)]
#[command(name = "reviewflow")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    REVIEWFLOW_DEBUG=1     Enable debug logging (alternative to --debug)")]
pub struct Cli {
    /// Configuration file (defaults to ~/.reviewflow/config.toml)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging on stderr
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Print the execution plan for a change set as JSON
    Plan {
        /// Change set file
        changes: PathBuf,

        /// Run id used to derive task ids
        #[arg(long)]
        run_id: Option<String>,
    },

    /// Review a change set and print the report as JSON
    Run {
        /// Change set file
        changes: PathBuf,

        /// Run id (generated if not given)
        #[arg(long)]
        run_id: Option<String>,

        /// Upper bound on concurrent workers
        #[arg(short = 'w', long)]
        workers: Option<usize>,
    },

    /// Show the effective configuration
    Config {
        /// Write the default configuration if none exists
        #[arg(long)]
        init: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.debug || logging::debug_from_env());

    match cli.command {
        Command::Plan { changes, run_id } => run_plan(cli.config.as_deref(), &changes, run_id),
        Command::Run {
            changes,
            run_id,
            workers,
        } => run_review(cli.config.as_deref(), &changes, run_id, workers),
        Command::Config { init } => run_config(cli.config.as_deref(), init),
    }
}

fn config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => Config::config_path(),
    }
}

fn load_config(explicit: Option<&Path>) -> Result<Config> {
    Config::load_from(&config_path(explicit)?)
}

/// Resolve file content relative to the change set's directory.
async fn open_change_set(path: &Path) -> Result<JsonChangeSet> {
    let set = JsonChangeSet::open(path).await?;
    Ok(match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(dir) => set.with_content_root(dir),
        None => set.with_content_root("."),
    })
}

fn run_plan(config: Option<&Path>, changes: &Path, run_id: Option<String>) -> Result<()> {
    let config = load_config(config)?;
    let run_id = run_id.map(RunId::from).unwrap_or_else(RunId::generate);
    let rt = tokio::runtime::Runtime::new()?;

    let plan = rt.block_on(async {
        let set = open_change_set(changes).await?;
        let ctx = RunContext {
            run_id: Some(run_id.clone()),
            metadata: set.metadata(),
        };
        let items = set.list_changed_items(&ctx).await?;
        TaskScheduler::new(config.scheduler)?.create_plan(&run_id, &items, &ctx.metadata)
    })?;

    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

fn run_review(
    config: Option<&Path>,
    changes: &Path,
    run_id: Option<String>,
    workers: Option<usize>,
) -> Result<()> {
    let mut config = load_config(config)?;
    if let Some(n) = workers {
        config.pool.max_workers = n.max(1);
        config.pool.min_workers = config.pool.min_workers.min(config.pool.max_workers);
    }
    config.validate()?;
    let run_id = run_id.map(RunId::from).unwrap_or_else(RunId::generate);
    debug!(run_id = %run_id, changes = %changes.display(), "starting review");

    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(async {
        let set: Arc<dyn ChangeSetProvider> = Arc::new(open_change_set(changes).await?);
        let provider = Arc::clone(&set);
        let factory: Arc<dyn WorkerFactory> = Arc::new(move || -> Result<Arc<dyn AnalysisWorker>> {
            Ok(Arc::new(DiffHeuristicAnalyzer::with_provider(Arc::clone(&provider))))
        });

        let orchestrator = Orchestrator::new(&config, factory)?;
        let sink = |p: &OrchestrationProgress| {
            eprintln!(
                "[{}] {} ({}/{} tasks, {} failed)",
                p.state,
                p.current_operation,
                p.processed_tasks(),
                p.total_tasks,
                p.failed_tasks
            );
        };
        let handle = orchestrator.start_from_provider(run_id, set, Arc::new(sink))?;
        let report = handle.wait().await;
        orchestrator.shutdown();
        report
    })?;

    eprintln!(
        "{}: {} analyzed, {} failed, {} issues in {}",
        report.state,
        report.total_tasks_analyzed,
        report.total_tasks_failed,
        report.summary.total_issues_found,
        format_duration(report.summary.elapsed)
    );
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run_config(config: Option<&Path>, init: bool) -> Result<()> {
    let path = config_path(config)?;
    if init && !path.exists() {
        Config::default().save_to(&path)?;
        eprintln!("Wrote default configuration to {}", path.display());
    }
    let config = Config::load_from(&path)?;
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
