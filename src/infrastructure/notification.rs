//! User notification delivery
//!
//! [`NotifierHandle`] is shared by the service and every task; swapping the
//! notifier behind it takes effect on the next delivery.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, title: &str, message: &str) -> Result<()>;
}

/// Used when no delivery context exists yet
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _title: &str, _message: &str) -> Result<()> {
        Ok(())
    }
}

/// Delivers notifications as structured log lines
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, title: &str, message: &str) -> Result<()> {
        info!(title = %title, message = %message, "🔔 Notification");
        Ok(())
    }
}

/// Clonable, hot-swappable notifier
#[derive(Clone)]
pub struct NotifierHandle {
    inner: Arc<RwLock<Arc<dyn Notifier>>>,
}

impl NotifierHandle {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(notifier)),
        }
    }

    pub fn noop() -> Self {
        Self::new(Arc::new(NoopNotifier))
    }

    /// Replace the delivery mechanism for every holder of this handle
    pub async fn replace(&self, notifier: Arc<dyn Notifier>) {
        *self.inner.write().await = notifier;
    }

    pub async fn current(&self) -> Arc<dyn Notifier> {
        Arc::clone(&*self.inner.read().await)
    }

    pub async fn notify(&self, title: &str, message: &str) -> Result<()> {
        // release the lock before delivering so a slow notifier never blocks a swap
        let notifier = self.current().await;
        notifier.notify(title, message).await
    }
}

impl Default for NotifierHandle {
    fn default() -> Self {
        Self::noop()
    }
}

impl std::fmt::Debug for NotifierHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifierHandle").finish_non_exhaustive()
    }
}
