//! Task-set manager
//!
//! Keyed registry of [`MonitorTask`]s behind a single reader/writer lock. At
//! most one task exists per rule id.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::application::monitor_task::{MonitorTask, RuleUpdateSender};
use crate::domain::errors::{MonitorError, MonitorResult};
use crate::domain::rule::{MonitorRule, RuleStatus};
use crate::infrastructure::extraction::ExtractorFactory;
use crate::infrastructure::http_fetcher::Fetcher;
use crate::infrastructure::notification::{Notifier, NotifierHandle};

pub struct MonitorService {
    tasks: RwLock<HashMap<String, Arc<MonitorTask>>>,
    fetcher: Arc<dyn Fetcher>,
    factory: ExtractorFactory,
    notifier: NotifierHandle,
    updates: RuleUpdateSender,
}

impl MonitorService {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        factory: ExtractorFactory,
        notifier: NotifierHandle,
        updates: RuleUpdateSender,
    ) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            fetcher,
            factory,
            notifier,
            updates,
        }
    }

    /// Create and start a task for `rule`; a stopped leftover is replaced
    pub async fn start_task(&self, rule: MonitorRule) -> MonitorResult<()> {
        let mut tasks = self.tasks.write().await;

        if let Some(existing) = tasks.get(&rule.id) {
            if existing.is_running().await {
                return Err(MonitorError::conflict(format!("task already running: {}", rule.id)));
            }
            existing.stop().await;
            tasks.remove(&rule.id);
        }

        let id = rule.id.clone();
        let name = rule.name.clone();
        let task = MonitorTask::new(
            rule,
            Arc::clone(&self.fetcher),
            self.factory.clone(),
            self.notifier.clone(),
            self.updates.clone(),
        )?;
        task.start().await?;
        tasks.insert(id.clone(), Arc::new(task));

        info!(rule_id = %id, rule_name = %name, "▶️ Task registered");
        Ok(())
    }

    pub async fn stop_task(&self, id: &str) -> MonitorResult<()> {
        let task = self
            .tasks
            .write()
            .await
            .remove(id)
            .ok_or_else(|| MonitorError::not_found(format!("no task for rule {id}")))?;
        task.stop().await;

        info!(rule_id = %id, "⏹️ Task deregistered");
        Ok(())
    }

    /// Stop and deregister every task; returns how many were removed
    pub async fn stop_all(&self) -> usize {
        let drained: Vec<_> = self.tasks.write().await.drain().collect();
        let count = drained.len();
        for (_, task) in drained {
            task.stop().await;
        }

        info!(count, "🛑 All tasks stopped");
        count
    }

    /// Reconfigure a registered task, restarting it when it was running.
    /// The registry lock is released before the task is touched.
    pub async fn update_task(&self, rule: MonitorRule) -> MonitorResult<()> {
        let task = self
            .tasks
            .read()
            .await
            .get(&rule.id)
            .cloned()
            .ok_or_else(|| MonitorError::not_found(format!("no task for rule {}", rule.id)))?;

        let was_running = task.is_running().await;
        if was_running {
            task.stop().await;
        }

        let id = rule.id.clone();
        let updated = task.update(rule).await;

        // a rejected configuration leaves the old one running
        if was_running {
            task.start().await?;
        }
        updated?;

        info!(rule_id = %id, restarted = was_running, "🔁 Task updated");
        Ok(())
    }

    /// Manual check of a registered task; the registry lock is not held while it runs
    pub async fn run_task_once(&self, id: &str) -> MonitorResult<()> {
        let task = self.tasks.read().await.get(id).cloned().ok_or_else(|| {
            MonitorError::not_found(format!("rule {id} is not being monitored; start monitoring first"))
        })?;

        info!(rule_id = %id, "👆 Manual check");
        task.run_once().await
    }

    pub async fn is_task_running(&self, id: &str) -> bool {
        match self.tasks.read().await.get(id) {
            Some(task) => task.is_running().await,
            None => false,
        }
    }

    /// Status of the registered task, `Idle` when none exists
    pub async fn get_task_status(&self, id: &str) -> RuleStatus {
        self.tasks
            .read()
            .await
            .get(id)
            .map_or(RuleStatus::Idle, |task| task.status())
    }

    pub async fn is_registered(&self, id: &str) -> bool {
        self.tasks.read().await.contains_key(id)
    }

    pub async fn active_task_count(&self) -> usize {
        self.tasks.read().await.len()
    }

    /// Swap the notifier used by every current and future task
    pub async fn update_notifier(&self, notifier: Arc<dyn Notifier>) {
        self.notifier.replace(notifier).await;
        info!("🔔 Notifier updated");
    }

    pub const fn notifier(&self) -> &NotifierHandle {
        &self.notifier
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rule::ExtractorKind;
    use crate::test_utils::{RecordingNotifier, ScriptedFetcher};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn rule(id: &str) -> MonitorRule {
        MonitorRule::new(
            format!("rule {id}"),
            "https://example.com",
            Duration::from_secs(60),
            ExtractorKind::Regex,
            r"v(\d+)",
        )
        .with_id(id)
        .with_notify(true)
    }

    fn service() -> (MonitorService, Arc<ScriptedFetcher>, mpsc::UnboundedReceiver<MonitorRule>) {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.set_default_body("v1");
        let (tx, rx) = mpsc::unbounded_channel();
        let service = MonitorService::new(fetcher.clone(), ExtractorFactory::default(), NotifierHandle::noop(), tx);
        (service, fetcher, rx)
    }

    #[tokio::test]
    async fn test_start_twice_is_conflict() {
        let (service, _, _rx) = service();
        service.start_task(rule("a")).await.unwrap();

        let err = service.start_task(rule("a")).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(service.active_task_count().await, 1);
        service.stop_all().await;
    }

    #[tokio::test]
    async fn test_stop_unknown_is_not_found() {
        let (service, _, _rx) = service();
        assert!(service.stop_task("ghost").await.unwrap_err().is_not_found());
        assert!(service.update_task(rule("ghost")).await.unwrap_err().is_not_found());
        assert!(service.run_task_once("ghost").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_queries_for_unknown_ids() {
        let (service, _, _rx) = service();
        assert!(!service.is_task_running("ghost").await);
        assert_eq!(service.get_task_status("ghost").await, RuleStatus::Idle);
    }

    #[tokio::test]
    async fn test_stop_deregisters() {
        let (service, _, _rx) = service();
        service.start_task(rule("a")).await.unwrap();
        assert!(service.is_task_running("a").await);

        service.stop_task("a").await.unwrap();
        assert!(!service.is_task_running("a").await);
        assert_eq!(service.active_task_count().await, 0);
    }

    #[tokio::test]
    async fn test_stop_all_clears_registry() {
        let (service, _, _rx) = service();
        for id in ["a", "b", "c"] {
            service.start_task(rule(id)).await.unwrap();
        }
        assert_eq!(service.stop_all().await, 3);
        assert_eq!(service.active_task_count().await, 0);
    }

    #[tokio::test]
    async fn test_invalid_extractor_is_not_registered() {
        let (service, _, _rx) = service();
        let mut broken = rule("bad");
        broken.extractor_expr = "(".to_string();

        assert!(service.start_task(broken).await.is_err());
        assert!(!service.is_registered("bad").await);
    }

    #[tokio::test]
    async fn test_run_once_and_status() {
        let (service, fetcher, _rx) = service();
        service.start_task(rule("a")).await.unwrap();
        assert!(fetcher.wait_for_calls(1, Duration::from_secs(2)).await);

        service.run_task_once("a").await.unwrap();
        assert_eq!(service.get_task_status("a").await, RuleStatus::Running);
        service.stop_all().await;
    }

    #[tokio::test]
    async fn test_update_keeps_running_state() {
        let (service, _, _rx) = service();
        service.start_task(rule("a")).await.unwrap();

        let mut changed = rule("a");
        changed.interval = Duration::from_secs(5);
        service.update_task(changed).await.unwrap();
        assert!(service.is_task_running("a").await);
        service.stop_all().await;
    }

    #[tokio::test]
    async fn test_update_during_slow_fetch_leaves_registry_free() {
        let fetcher = Arc::new(ScriptedFetcher::with_delay(Duration::from_millis(1500)));
        fetcher.set_default_body("v1");
        let (tx, _rx) = mpsc::unbounded_channel();
        let service = Arc::new(MonitorService::new(
            fetcher.clone(),
            ExtractorFactory::default(),
            NotifierHandle::noop(),
            tx,
        ));
        service.start_task(rule("a")).await.unwrap();
        assert!(fetcher.wait_for_calls(1, Duration::from_secs(2)).await);

        let mut changed = rule("a");
        changed.interval = Duration::from_secs(5);
        let updating = {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.update_task(changed).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = std::time::Instant::now();
        assert!(!service.is_task_running("unrelated").await);
        let waited = started.elapsed();
        assert!(waited < Duration::from_millis(500), "registry waited {waited:?}");

        updating.await.unwrap().unwrap();
        assert!(service.is_task_running("a").await);
        service.stop_all().await;
    }

    #[tokio::test]
    async fn test_failed_update_keeps_task_running() {
        let (service, _, _rx) = service();
        service.start_task(rule("a")).await.unwrap();

        let mut broken = rule("a");
        broken.extractor_expr = "(".to_string();
        assert!(service.update_task(broken).await.is_err());
        assert!(service.is_task_running("a").await);
        service.stop_all().await;
    }

    #[tokio::test]
    async fn test_update_notifier_reaches_existing_tasks() {
        let (service, fetcher, _rx) = service();
        service.start_task(rule("a")).await.unwrap();
        assert!(fetcher.wait_for_calls(1, Duration::from_secs(2)).await);

        let recorder = Arc::new(RecordingNotifier::new());
        service.update_notifier(recorder.clone()).await;

        fetcher.push_body("v2");
        service.run_task_once("a").await.unwrap();
        assert_eq!(recorder.count().await, 1);
        service.stop_all().await;
    }
}
