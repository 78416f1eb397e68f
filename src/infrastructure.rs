//! Infrastructure layer: HTTP transport, extraction, persistence, notification,
//! configuration and logging.

pub mod config;
pub mod extraction;
pub mod http_fetcher;
pub mod logging;
pub mod notification;
pub mod rule_store;

// Re-export commonly used items
pub use config::{AppConfig, ConfigError, FetcherSettings, LoggingConfig, NotificationConfig, StorageConfig};
pub use extraction::{ContentExtractor, ExtractionError, ExtractorFactory};
pub use http_fetcher::{FetchError, FetchRequest, FetchResponse, Fetcher, HttpFetcher, HttpFetcherConfig};
pub use logging::{get_log_directory, init_logging, init_logging_with_config};
pub use notification::{LogNotifier, NoopNotifier, Notifier, NotifierHandle};
pub use rule_store::{JsonRuleStore, RuleStore, StoreError};
