// ============================================
// catalogsetup - logging.rs
// ============================================
// Two outputs:
//   - catalog.log (append-only, next to where the tool runs): everything at
//     `log_level` and above, so failed registry writes are on record
//   - stderr: warnings and errors only (debug with --verbose)
//
// RUST_LOG overrides the file filter.
// ============================================

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::ToolConfig;

/// Install the global subscriber.
///
/// Keep the returned guard alive until exit or buffered lines are lost.
pub fn init_logging(config: &ToolConfig, verbose: bool) -> Result<WorkerGuard> {
    let log_path = &config.log_file;
    let dir = match log_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let file_name = log_path
        .file_name()
        .with_context(|| format!("Log file {} has no file name", log_path.display()))?;

    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

    let file_appender = tracing_appender::rolling::never(dir, file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(format!("catalogsetup={}", config.log_level))
            .with_context(|| format!("Invalid log_level '{}'", config.log_level))?,
    };

    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_target(false)
        .with_filter(file_filter);

    let console_level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .with_filter(console_level);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .context("Failed to install the logger")?;

    Ok(guard)
}
