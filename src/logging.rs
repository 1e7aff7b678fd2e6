//! Logging setup.
//!
//! Log levels:
//! - ERROR: worker failures and progress sink panics
//! - WARN: dependency cycles, timeouts, rejected or expired work
//! - INFO: plans, pool resizing, queued tasks, run outcomes
//! - DEBUG: per-task detail
//! - TRACE: maintenance ticks
//!
//! Debug mode can be enabled with the `--debug` flag or `REVIEWFLOW_DEBUG=1`.
//! `RUST_LOG` overrides both.

use tracing::debug;
use tracing_subscriber::EnvFilter;

pub const DEBUG_ENV: &str = "REVIEWFLOW_DEBUG";

/// Whether the debug environment variable is set to a truthy value.
pub fn debug_from_env() -> bool {
    std::env::var(DEBUG_ENV)
        .map(|v| is_truthy(&v))
        .unwrap_or(false)
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Filter directive used when `RUST_LOG` is not set.
pub fn default_directive(debug: bool) -> &'static str {
    if debug {
        "reviewflow=debug"
    } else {
        "reviewflow=info"
    }
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init(debug: bool) {
    let verbose = debug || debug_from_env();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose)
        .with_line_number(verbose)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok();

    if installed {
        debug!(verbose, "logging initialized");
    }
}
