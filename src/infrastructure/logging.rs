//! Logging system configuration and initialization
//!
//! - Console output and daily-rotated file output (non-blocking writer)
//! - Level from configuration, `RUST_LOG` takes precedence when set
//! - Optional JSON formatting for the file layer
//! - Old rotated files are pruned on startup

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use lazy_static::lazy_static;
use tracing::{info, warn, Subscriber};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    fmt::{self, time::FormatTime},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

pub use crate::infrastructure::config::LoggingConfig;
use crate::infrastructure::config::default_log_dir;

/// Daily files are named `url-monitor.log.YYYY-MM-DD`
const LOG_FILE_PREFIX: &str = "url-monitor.log";

// Global guard to keep the log file writer alive
lazy_static! {
    static ref LOG_GUARDS: Mutex<Vec<WorkerGuard>> = Mutex::new(Vec::new());
}

struct UtcTimeFormatter;

impl FormatTime for UtcTimeFormatter {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"))
    }
}

/// Platform log directory (`<data_local_dir>/url-monitor/logs`)
pub fn get_log_directory() -> PathBuf {
    default_log_dir()
}

/// Initialize the logging system with default configuration
pub fn init_logging() -> Result<()> {
    init_logging_with_config(LoggingConfig::default())
}

/// Initialize logging with custom configuration
///
/// Dependency chatter (`reqwest`, `hyper`, `h2`) is damped to `warn` unless
/// the configured level is `trace`. Override everything with `RUST_LOG`:
/// ```bash
/// RUST_LOG="debug,reqwest=debug" url-monitor
/// ```
pub fn init_logging_with_config(config: LoggingConfig) -> Result<()> {
    let log_dir = config.log_dir.clone().unwrap_or_else(get_log_directory);

    if config.file_output {
        std::fs::create_dir_all(&log_dir)
            .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

        if config.auto_cleanup_logs {
            cleanup_old_logs(&log_dir, config.max_files)?;
        }
    }

    let registry = Registry::default().with(build_env_filter(&config)?);

    match (config.file_output, config.json_format) {
        (true, true) => {
            let file_layer = fmt::Layer::new()
                .json()
                .with_writer(file_writer(&log_dir)?)
                .with_timer(UtcTimeFormatter)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false);
            registry
                .with(file_layer)
                .with(console_layer(config.console_output))
                .try_init()?;
        }
        (true, false) => {
            let file_layer = fmt::Layer::new()
                .with_writer(file_writer(&log_dir)?)
                .with_timer(UtcTimeFormatter)
                .with_target(false)
                .with_ansi(false);
            registry
                .with(file_layer)
                .with(console_layer(config.console_output))
                .try_init()?;
        }
        (false, _) => {
            if !config.console_output {
                return Err(anyhow!("No logging output configured"));
            }
            registry.with(console_layer(true)).try_init()?;
        }
    }

    info!("📝 Logging system initialized");
    info!(level = %config.level, json = config.json_format, console = config.console_output, file = config.file_output, "Log settings");
    if config.file_output {
        info!("Log directory: {:?}", log_dir);
    }

    Ok(())
}

fn console_layer<S>(enabled: bool) -> Option<impl Layer<S>>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    enabled.then(|| {
        fmt::Layer::new()
            .with_writer(std::io::stdout)
            .with_timer(UtcTimeFormatter)
            .with_target(false)
    })
}

fn file_writer(log_dir: &Path) -> Result<NonBlocking> {
    let appender = rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = non_blocking(appender);

    // Store the guard globally to prevent it from being dropped
    LOG_GUARDS
        .lock()
        .map_err(|_| anyhow!("log guard registry poisoned"))?
        .push(guard);
    Ok(writer)
}

fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let mut filter = EnvFilter::try_new(&config.level)
        .with_context(|| format!("Invalid log level '{}'", config.level))?;

    if !config.level.eq_ignore_ascii_case("trace") {
        for directive in ["reqwest=warn", "hyper=warn", "hyper_util=warn", "h2=warn"] {
            filter = filter.add_directive(directive.parse()?);
        }
    }

    for (module, level) in &config.module_filters {
        filter = filter.add_directive(
            format!("{module}={level}")
                .parse()
                .with_context(|| format!("Invalid filter for module '{module}'"))?,
        );
    }

    Ok(filter)
}

/// Keep at most `max_files` rotated log files, newest first
fn cleanup_old_logs(log_dir: &Path, max_files: u32) -> Result<usize> {
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
            .is_some_and(|name| name.starts_with(LOG_FILE_PREFIX));
        if path.is_file() && is_log {
            if let Ok(modified) = entry.metadata().and_then(|m| m.modified()) {
                log_files.push((path, modified));
            }
        }
    }

    // Sort by modification time (newest first)
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    let mut removed = 0;
    for (path, _) in log_files.iter().skip(max_files as usize) {
        match std::fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => warn!("Failed to remove old log file {:?}: {}", path, e),
        }
    }
    if removed > 0 {
        info!("🧹 Removed {} old log files (keeping {})", removed, max_files);
    }
    Ok(removed)
}

/// Log system information for diagnostics
pub fn log_system_info() {
    info!("=== URL Monitor ===");
    info!("Application version: {}", env!("CARGO_PKG_VERSION"));
    info!("Operating system: {}", std::env::consts::OS);
    info!("Architecture: {}", std::env::consts::ARCH);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_config_default() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert!(config.console_output);
        assert!(config.file_output);
    }

    #[test]
    fn test_log_directory_location() {
        assert!(get_log_directory().ends_with("logs"));
    }

    #[test]
    fn test_env_filter_accepts_module_filters() {
        let mut config = LoggingConfig::default();
        config.module_filters.insert("url_monitor_lib".to_string(), "debug".to_string());
        assert!(build_env_filter(&config).is_ok());
    }

    #[test]
    fn test_cleanup_keeps_newest_files() {
        let dir = tempfile::tempdir().unwrap();
        for day in 1..=5 {
            let name = format!("{LOG_FILE_PREFIX}.2026-01-0{day}");
            std::fs::write(dir.path().join(name), "entry\n").unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "keep me").unwrap();

        let removed = cleanup_old_logs(dir.path(), 2).unwrap();
        assert_eq!(removed, 3);

        let remaining: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(remaining.len(), 3);
        assert!(remaining.contains(&"notes.txt".to_string()));
    }
}
