//! Configuration infrastructure
//!
//! Settings are layered with the `config` crate:
//! 1. Built-in defaults (every section is `#[serde(default)]`)
//! 2. Optional settings file (`<config_dir>/url-monitor/settings.{json,toml,yaml}`,
//!    or the file named by `URL_MONITOR_CONFIG`)
//! 3. Environment variables, e.g. `URL_MONITOR__LOGGING__LEVEL=debug`

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Directory name used under the platform config/data directories
pub const APP_DIR_NAME: &str = "url-monitor";
/// Environment prefix for overrides
pub const ENV_PREFIX: &str = "URL_MONITOR";
/// Environment variable naming an explicit settings file
pub const CONFIG_PATH_ENV: &str = "URL_MONITOR_CONFIG";

const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config: {source}")]
    FileLoad {
        #[from]
        source: config::ConfigError,
    },

    #[error("Configuration validation failed: {message}")]
    Validation { message: String },
}

impl ConfigError {
    fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub fetcher: FetcherSettings,
    pub logging: LoggingConfig,
    pub storage: StorageConfig,
    pub notifications: NotificationConfig,
}

/// HTTP fetch and extraction policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetcherSettings {
    /// Timeout for one attempt in seconds
    pub request_timeout_seconds: u64,
    /// Total attempts per fetch, first one included
    pub max_attempts: u32,
    /// Delay before the second attempt, doubled for each further one
    pub base_backoff_ms: u64,
    pub max_redirects: usize,
    pub max_body_bytes: usize,
    pub user_agent: String,
    /// Bound on a single regex extraction
    pub regex_timeout_ms: u64,
}

impl Default for FetcherSettings {
    fn default() -> Self {
        Self {
            request_timeout_seconds: 30,
            max_attempts: 3,
            base_backoff_ms: 1000,
            max_redirects: 10,
            max_body_bytes: 10 * 1024 * 1024,
            user_agent: "URL-Monitor/1.0".to_string(),
            regex_timeout_ms: 5000,
        }
    }
}

impl FetcherSettings {
    pub const fn regex_timeout(&self) -> Duration {
        Duration::from_millis(self.regex_timeout_ms)
    }
}

/// Logging configuration settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// Enable JSON formatted file logs
    pub json_format: bool,

    pub console_output: bool,

    pub file_output: bool,

    /// Overrides the platform log directory
    pub log_dir: Option<PathBuf>,

    /// Number of log files to keep (older files will be deleted)
    pub max_files: u32,

    /// Enable automatic log cleanup on startup
    pub auto_cleanup_logs: bool,

    /// Module-specific log level filters (e.g., "reqwest": "info")
    pub module_filters: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            console_output: true,
            file_output: true,
            log_dir: None,
            max_files: 7,
            auto_cleanup_logs: true,
            module_filters: HashMap::new(),
        }
    }
}

/// Where the rule set lives
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Overrides `<config_dir>/url-monitor/rules.json`
    pub rules_path: Option<PathBuf>,
}

impl StorageConfig {
    pub fn rules_file(&self) -> PathBuf {
        self.rules_path.clone().unwrap_or_else(default_rules_path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// When false the headless runner installs a no-op notifier
    pub enabled: bool,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl AppConfig {
    /// Load from the default locations (or `URL_MONITOR_CONFIG`) plus environment
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
        Self::load_from(explicit.as_deref())
    }

    /// Load with an explicit settings file; a missing explicit file is an error
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        let environment = config::Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true);
        Self::build(path, environment)
    }

    fn build(path: Option<&Path>, environment: config::Environment) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        match path {
            Some(path) => {
                info!("📋 Loading settings from {:?}", path);
                builder = builder.add_source(config::File::from(path).required(true));
            }
            None => {
                if let Some(dir) = app_config_dir() {
                    let stem = dir.join("settings");
                    builder = builder
                        .add_source(config::File::with_name(&stem.to_string_lossy()).required(false));
                }
            }
        }

        let settings = builder.add_source(environment).build()?;
        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Settings value validation
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fetcher = &self.fetcher;
        if fetcher.request_timeout_seconds == 0 {
            return Err(ConfigError::validation("fetcher.request_timeout_seconds must be greater than 0"));
        }
        if fetcher.max_attempts == 0 {
            return Err(ConfigError::validation("fetcher.max_attempts must be at least 1"));
        }
        if fetcher.max_body_bytes == 0 {
            return Err(ConfigError::validation("fetcher.max_body_bytes must be greater than 0"));
        }
        if fetcher.max_redirects > 100 {
            return Err(ConfigError::validation("fetcher.max_redirects must not exceed 100"));
        }
        if fetcher.regex_timeout_ms == 0 {
            return Err(ConfigError::validation("fetcher.regex_timeout_ms must be greater than 0"));
        }

        let level = self.logging.level.to_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::validation(format!(
                "logging.level must be one of {LOG_LEVELS:?}, got '{}'",
                self.logging.level
            )));
        }

        Ok(())
    }
}

/// `<config_dir>/url-monitor`
pub fn app_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR_NAME))
}

/// `<config_dir>/url-monitor/rules.json`, falling back to the working directory
pub fn default_rules_path() -> PathBuf {
    app_config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rules.json")
}

/// `<data_local_dir>/url-monitor/logs`, falling back to `./logs`
pub fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join(APP_DIR_NAME).join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"))
}
