use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

const FALLBACK_LOG_FILE: &str = "meme-picker.log";

/// Routes `tracing` output to the configured log file. The terminal is owned by the
/// UI, so nothing is written to stdout or stderr. Keep the guard alive until exit.
pub fn init(cfg: &LogConfig) -> Result<WorkerGuard> {
    let path = log_path(cfg);
    let (dir, file_name) = split_log_path(&path)?;
    fs::create_dir_all(dir)
        .with_context(|| format!("logging: create directory {}", dir.display()))?;

    let file_appender = tracing_appender::rolling::never(dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| anyhow::anyhow!("logging: install subscriber: {}", err))?;

    Ok(guard)
}

/// Without a configured file (no cache directory), logs land in the working directory.
fn log_path(cfg: &LogConfig) -> PathBuf {
    cfg.file
        .clone()
        .unwrap_or_else(|| PathBuf::from(FALLBACK_LOG_FILE))
}

fn split_log_path(path: &Path) -> Result<(&Path, &std::ffi::OsStr)> {
    let file_name = path
        .file_name()
        .with_context(|| format!("logging: {} has no file name", path.display()))?;
    let dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    Ok((dir, file_name))
}
