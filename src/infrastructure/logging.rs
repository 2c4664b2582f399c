//! Logging system configuration and initialization
//!
//! This module provides the logging setup shared by every command:
//! - Console output and daily-rolling file output
//! - Configuration file based log level control with `RUST_LOG` override
//! - Structured JSON logging (optional)
//! - Startup cleanup of old log files

use anyhow::{Context, Result, anyhow};
use chrono::Local;
use lazy_static::lazy_static;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

pub use crate::infrastructure::config::LoggingConfig;
use crate::infrastructure::config::ConfigManager;

/// Prefix of every log file written by the daily appender
pub const LOG_FILE_PREFIX: &str = "catalog-feed-sync.log";

// Global guard to keep the log file writer alive
lazy_static! {
    static ref LOG_GUARDS: Mutex<Vec<tracing_appender::non_blocking::WorkerGuard>> =
        Mutex::new(Vec::new());
}

/// Local wall-clock timestamps with millisecond precision
struct LocalTimeFormatter;

impl FormatTime for LocalTimeFormatter {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%d %H:%M:%S%.3f %:z"))
    }
}

/// Log directory inside the application data directory, next to the
/// executable when no data directory exists
pub fn get_log_directory() -> PathBuf {
    ConfigManager::get_app_data_dir().map_or_else(
        |_| {
            std::env::current_exe()
                .ok()
                .and_then(|p| p.parent().map(Path::to_path_buf))
                .unwrap_or_default()
                .join("logs")
        },
        |dir| dir.join("logs"),
    )
}

/// Initialize the logging system with default configuration
pub fn init_logging() -> Result<()> {
    init_logging_with_config(&LoggingConfig::default(), None)
}

/// Environment filter for the configured level.
///
/// `RUST_LOG` wins when set. Otherwise SQL and runtime internals are held at
/// their module filter unless TRACE is requested.
pub fn build_env_filter(config: &LoggingConfig) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    let mut filter = EnvFilter::new(&config.level);
    if config.level.to_lowercase().contains("trace") {
        return filter;
    }

    let mut modules: Vec<_> = config.module_filters.iter().collect();
    modules.sort();
    for (module, level) in modules {
        match format!("{module}={level}").parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("Ignoring invalid log filter {module}={level}: {e}"),
        }
    }
    filter
}

/// Initialize logging with custom configuration
///
/// # Environment Variable Override
/// ```bash
/// # Show every per-record decision and SQL statement
/// RUST_LOG="trace" catalog-feed-sync sync feed.xml
///
/// # Engine at debug, dependencies quiet
/// RUST_LOG="info,catalog_feed_sync=debug,sqlx=error" catalog-feed-sync sync feed.xml
/// ```
pub fn init_logging_with_config(config: &LoggingConfig, log_dir: Option<PathBuf>) -> Result<()> {
    let log_dir = log_dir.unwrap_or_else(get_log_directory);

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    let mut removed_logs = 0;
    if config.file_output {
        removed_logs = prepare_log_directory(config, &log_dir)?;

        let file_appender = rolling::daily(&log_dir, LOG_FILE_PREFIX);
        let (file_writer, file_guard) = non_blocking(file_appender);
        // Store the guard globally to prevent it from being dropped
        LOG_GUARDS
            .lock()
            .map_err(|_| anyhow!("Log guard registry poisoned"))?
            .push(file_guard);

        if config.json_format {
            layers.push(
                fmt::Layer::new()
                    .json()
                    .with_writer(file_writer)
                    .with_timer(LocalTimeFormatter)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_ansi(false)
                    .boxed(),
            );
        } else {
            layers.push(
                fmt::Layer::new()
                    .with_writer(file_writer)
                    .with_timer(LocalTimeFormatter)
                    .with_target(false)
                    .with_ansi(false)
                    .boxed(),
            );
        }
    }

    if config.console_output {
        layers.push(
            fmt::Layer::new()
                .with_writer(std::io::stderr)
                .with_timer(LocalTimeFormatter)
                .with_target(false)
                .boxed(),
        );
    }

    if layers.is_empty() {
        return Err(anyhow!("No logging output configured"));
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(build_env_filter(config))
        .try_init()
        .context("Failed to install tracing subscriber")?;

    info!("Logging system initialized");
    info!("Log directory: {:?}", log_dir);
    info!("Log level: {}", config.level);
    info!("JSON format: {}", config.json_format);
    if removed_logs > 0 {
        info!("🧹 Removed {} old log files", removed_logs);
    }
    Ok(())
}

/// Create the log directory and apply the retention limit when enabled
fn prepare_log_directory(config: &LoggingConfig, log_dir: &Path) -> Result<usize> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;
    if config.auto_cleanup_logs {
        cleanup_old_logs(log_dir, config.max_files)
    } else {
        Ok(0)
    }
}

/// Log system information for diagnostics
pub fn log_system_info() {
    info!("=== Catalog Feed Sync ===");
    info!("Application version: {}", env!("CARGO_PKG_VERSION"));
    info!("Operating system: {}", std::env::consts::OS);
    info!("Architecture: {}", std::env::consts::ARCH);
    if let Ok(current_dir) = std::env::current_dir() {
        info!("Working directory: {:?}", current_dir);
    }
}

/// Remove the oldest log files beyond `max_files`, returning how many went
pub fn cleanup_old_logs(log_dir: &Path, max_files: u32) -> Result<usize> {
    if !log_dir.exists() {
        return Ok(0);
    }

    let mut log_files = Vec::new();
    for entry in std::fs::read_dir(log_dir)? {
        let entry = entry?;
        let path = entry.path();
        let is_log = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(LOG_FILE_PREFIX));
        if !path.is_file() || !is_log {
            continue;
        }
        if let Ok(modified) = entry.metadata().and_then(|m| m.modified()) {
            log_files.push((path, modified));
        }
    }

    // Newest first
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    let keep = max_files as usize;
    let mut removed = 0;
    for (path, _) in log_files.iter().skip(keep) {
        if let Err(e) = std::fs::remove_file(path) {
            warn!("Failed to remove old log file {:?}: {}", path, e);
        } else {
            removed += 1;
        }
    }
    if removed > 0 {
        info!("Removed {} old log files (keeping {})", removed, keep);
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};
    use tempfile::tempdir;

    #[test]
    fn test_logging_config_default() {
        let config = LoggingConfig::default();
        assert!(!config.level.is_empty());
        assert!(config.console_output);
        assert!(config.file_output);
    }

    #[test]
    fn test_log_directory_creation() {
        let log_dir = get_log_directory();
        assert!(log_dir.to_string_lossy().ends_with("logs"));
    }

    #[test]
    fn cleanup_keeps_newest_files_only() -> Result<()> {
        let dir = tempdir()?;
        let now = SystemTime::now();
        for day in 0..5u64 {
            let path = dir.path().join(format!("{LOG_FILE_PREFIX}.2026-10-0{day}"));
            let file = std::fs::File::create(&path)?;
            file.set_modified(now - Duration::from_secs(86_400 * (5 - day)))?;
        }
        std::fs::write(dir.path().join("unrelated.txt"), "keep me")?;

        let removed = cleanup_old_logs(dir.path(), 2)?;
        assert_eq!(removed, 3);
        assert!(dir.path().join(format!("{LOG_FILE_PREFIX}.2026-10-04")).exists());
        assert!(dir.path().join(format!("{LOG_FILE_PREFIX}.2026-10-03")).exists());
        assert!(!dir.path().join(format!("{LOG_FILE_PREFIX}.2026-10-00")).exists());
        assert!(dir.path().join("unrelated.txt").exists());
        Ok(())
    }

    #[test]
    fn log_directory_is_created_and_trimmed_only_when_enabled() -> Result<()> {
        let dir = tempdir()?;
        let log_dir = dir.path().join("logs");
        let mut config = LoggingConfig {
            max_files: 1,
            auto_cleanup_logs: false,
            ..LoggingConfig::default()
        };

        assert_eq!(prepare_log_directory(&config, &log_dir)?, 0);
        assert!(log_dir.is_dir());
        for day in 1..=3 {
            std::fs::write(log_dir.join(format!("{LOG_FILE_PREFIX}.2026-10-0{day}")), "")?;
        }
        assert_eq!(prepare_log_directory(&config, &log_dir)?, 0);

        config.auto_cleanup_logs = true;
        assert_eq!(prepare_log_directory(&config, &log_dir)?, 2);
        assert_eq!(prepare_log_directory(&config, &log_dir)?, 0);
        Ok(())
    }
}
