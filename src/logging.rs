//! Log output for the `rampart` binary.
//!
//! `plan`, `list` and `validate` only inspect the host, so they log to stderr
//! ([`init_cli`]). `run` changes the host and keeps an audit trail: when a
//! logs directory is available it also writes JSON lines to a daily file
//! ([`init_run`]). Both honor `RUST_LOG` and default to `info`.

use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Log file prefix inside the logs directory; files rotate daily.
pub const LOG_FILE_PREFIX: &str = "rampart.log";

/// Keeps the JSON file writer alive; dropping it flushes pending lines.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Stderr logging for the read-only subcommands.
pub fn init_cli() {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_writer(std::io::stderr)
        .try_init();
    if installed.is_err() {
        tracing::debug!("log subscriber already installed");
    }
}

/// Logging for `rampart run`.
///
/// With `logs_dir`, run events also go to `{logs_dir}/rampart.log.YYYY-MM-DD`
/// as JSON. If that directory cannot be used the run still proceeds with
/// stderr only, and the reason is logged as a warning.
pub fn init_run(logs_dir: Option<&Path>) -> Option<LoggingGuard> {
    let dir = match logs_dir {
        Some(dir) => dir,
        None => {
            init_cli();
            return None;
        }
    };
    match init_with_file(dir) {
        Ok(guard) => Some(guard),
        Err(e) => {
            init_cli();
            tracing::warn!(error = %format!("{e:#}"), "run log file unavailable, logging to stderr only");
            None
        }
    }
}

/// Install stderr plus a daily JSON file under `logs_dir`.
///
/// # Errors
///
/// Returns an error if `logs_dir` cannot be created or a subscriber is
/// already installed.
pub fn init_with_file(logs_dir: &Path) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(logs_dir)
        .with_context(|| format!("failed to create logs directory {}", logs_dir.display()))?;

    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX));

    tracing_subscriber::registry()
        .with(filter())
        .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .context("log subscriber already installed")?;

    Ok(LoggingGuard { _guard: guard })
}
