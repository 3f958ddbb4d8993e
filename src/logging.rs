//! Log output setup.
//!
//! The configured level applies to feedhook itself and to the HTTP trace
//! layer. Storage and client libraries stay at `warn` so a debug run is not
//! drowned in per-query and per-connection noise. `RUST_LOG`, when set,
//! replaces the whole filter.

use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::{FeedhookError, Result};

/// Library targets kept quiet regardless of the configured level.
const QUIET_TARGETS: &[&str] = &["sqlx", "hyper", "reqwest"];

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Filter directives for a configured level.
fn directives(level: &str) -> String {
    let level = parse_level(level).as_str().to_lowercase();
    let mut parts = vec![
        "warn".to_string(),
        format!("feedhook={level}"),
        format!("tower_http={level}"),
    ];
    parts.extend(QUIET_TARGETS.iter().map(|target| format!("{target}=warn")));
    parts.join(",")
}

fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives(level)))
}

/// Create the log file and any missing parent directories.
fn open_log_file(path: &str) -> Result<File> {
    let open_error = |e: std::io::Error| FeedhookError::Config(format!("log file {path}: {e}"));

    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(open_error)?;
        }
    }
    File::create(path).map_err(open_error)
}

/// Log to stdout and to the configured file.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let log_file = Arc::new(open_log_file(&config.file)?);
    let writer = std::io::stdout.and(log_file);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false),
        )
        .with(build_filter(&config.level))
        .init();

    Ok(())
}

/// Log to stdout only. Fallback for when the log file cannot be opened.
pub fn init_console_only(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_ansi(true)
                .with_target(true),
        )
        .with(build_filter(level))
        .init();
}
