//! URL Monitor - periodic web content change detection
//!
//! Rules describe a URL, an HTTP request and an extractor (CSS selector,
//! regular expression or JSON path). Each enabled rule is checked on its own
//! interval; a change in the extracted content raises an event and, when
//! enabled, a user notification.

// Module declarations
pub mod application;
pub mod domain;
pub mod infrastructure;

#[doc(hidden)]
pub mod test_utils;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};

use crate::application::LoggingEventListener;
use crate::infrastructure::logging::log_system_info;
use crate::infrastructure::{
    init_logging_with_config, AppConfig, ExtractorFactory, HttpFetcher, HttpFetcherConfig, JsonRuleStore,
    LogNotifier, Notifier, NotifierHandle, NoopNotifier,
};

pub use application::{EventListener, MonitorEngine};
pub use domain::{Event, EventKind, ExtractorKind, HttpMethod, MonitorError, MonitorResult, MonitorRule, RuleStatus};

/// Headless runner: load settings, monitor every enabled rule until Ctrl+C,
/// then persist the rule set.
pub async fn run() -> Result<()> {
    let config = AppConfig::load().context("Failed to load settings")?;

    init_logging_with_config(config.logging.clone()).context("Failed to initialize logging")?;
    log_system_info();

    let rules_file = config.storage.rules_file();
    info!("📂 Rules file: {}", rules_file.display());
    let store = JsonRuleStore::open(rules_file).await?;

    let fetcher = HttpFetcher::with_config(HttpFetcherConfig::from_settings(&config.fetcher))
        .context("Failed to build HTTP client")?;

    let notifier: Arc<dyn Notifier> = if config.notifications.enabled {
        Arc::new(LogNotifier)
    } else {
        Arc::new(NoopNotifier)
    };

    let engine = MonitorEngine::new(
        Arc::new(store),
        Arc::new(fetcher),
        NotifierHandle::new(notifier),
        ExtractorFactory::new(config.fetcher.regex_timeout()),
    );
    engine.subscribe(Arc::new(LoggingEventListener)).await;
    engine.initialize().await?;

    info!("👀 Monitoring {} rules, press Ctrl+C to stop", engine.get_rules().await.len());
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }

    engine.shutdown().await?;
    Ok(())
}
