//! Tracing setup for the CLI.
//!
//! Logs go to journald on Linux when the journal socket is reachable and to
//! a daily file otherwise. Stdout carries detection results only.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_ENV: &str = "FACECASCADE_LOG";

static GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Install the global subscriber. Level comes from `FACECASCADE_LOG`
/// (default `info`; `debug` adds per-stage candidate counts).
pub fn init(log_dir: Option<PathBuf>) -> Result<()> {
    let env_filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

    #[cfg(target_os = "linux")]
    {
        if let Ok(journald_layer) = tracing_journald::layer() {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(journald_layer)
                .try_init()?;
            tracing::debug!("Logging to journald");
            return Ok(());
        }
    }

    let log_dir = log_dir.unwrap_or_else(default_log_dir);
    let writer = file_writer(&log_dir)?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .try_init()?;

    tracing::debug!(dir = ?log_dir, "Logging to file");
    Ok(())
}

fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("facecascade")
        .join("logs")
}

/// Daily-rolling writer under `dir`. The worker guard lives for the process.
fn file_writer(dir: &Path) -> Result<NonBlocking> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

    let appender = tracing_appender::rolling::daily(dir, "facecascade.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let _ = GUARD.set(guard);
    Ok(writer)
}
