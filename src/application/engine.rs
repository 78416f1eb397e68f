//! Rule-lifecycle authority
//!
//! [`MonitorEngine`] owns the canonical in-memory rule list, persists every
//! mutation through the [`RuleStore`], reconciles live tasks with rule
//! configuration and republishes task-originated status changes as events.
//!
//! Rule mutations and the task reconciliation that follows them run under one
//! lifecycle lock, so the task set always matches the last applied mutation.
//!
//! Task snapshots arrive over an unbounded channel drained by a single status
//! pump. The pump is the only path by which background execution mutates
//! engine-owned state.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::application::event_bus::{EventBus, EventListener};
use crate::application::monitor_service::MonitorService;
use crate::domain::errors::{MonitorError, MonitorResult};
use crate::domain::events::{Event, EventKind};
use crate::domain::rule::{MonitorRule, RuleStatus};
use crate::infrastructure::extraction::ExtractorFactory;
use crate::infrastructure::http_fetcher::Fetcher;
use crate::infrastructure::notification::{Notifier, NotifierHandle};
use crate::infrastructure::rule_store::RuleStore;

type SharedRules = Arc<RwLock<Vec<MonitorRule>>>;

pub struct MonitorEngine {
    rules: SharedRules,
    lifecycle: Mutex<()>,
    store: Arc<dyn RuleStore>,
    service: MonitorService,
    bus: Arc<EventBus>,
    status_pump: JoinHandle<()>,
}

impl MonitorEngine {
    /// Build an engine and spawn its status pump; must be called inside a tokio runtime
    pub fn new(
        store: Arc<dyn RuleStore>,
        fetcher: Arc<dyn Fetcher>,
        notifier: NotifierHandle,
        factory: ExtractorFactory,
    ) -> Self {
        let rules: SharedRules = Arc::new(RwLock::new(Vec::new()));
        let bus = Arc::new(EventBus::new());
        let (updates, snapshots) = mpsc::unbounded_channel();

        let status_pump = tokio::spawn(apply_status_updates(
            snapshots,
            Arc::clone(&rules),
            Arc::clone(&store),
            Arc::clone(&bus),
        ));

        Self {
            rules,
            lifecycle: Mutex::new(()),
            store,
            service: MonitorService::new(fetcher, factory, notifier, updates),
            bus,
            status_pump,
        }
    }

    /// Load persisted rules and start a task for every enabled one
    pub async fn initialize(&self) -> MonitorResult<()> {
        info!("🚀 Initializing monitor engine");

        let loaded = self.store.load().await.map_err(MonitorError::persistence)?;
        let enabled: Vec<MonitorRule> = loaded.iter().filter(|r| r.enabled).cloned().collect();
        let count = loaded.len();
        *self.rules.write().await = loaded;

        for rule in enabled {
            let id = rule.id.clone();
            if let Err(e) = self.service.start_task(rule).await {
                error!(rule_id = %id, error = %e, "❌ Failed to start monitor task");
            }
        }

        info!(rules_count = count, active = self.service.active_task_count().await, "✅ Monitor engine initialized");
        Ok(())
    }

    /// Stop every task, then persist the in-memory rule set
    pub async fn shutdown(&self) -> MonitorResult<()> {
        info!("🛑 Shutting down monitor engine");
        self.service.stop_all().await;

        let rules = self.rules.read().await.clone();
        self.store.save(&rules).await.map_err(|e| {
            error!(error = %e, "❌ Failed to save rules on shutdown");
            MonitorError::persistence(e)
        })?;

        info!("✅ Monitor engine shut down");
        Ok(())
    }

    /// Snapshot of every rule
    pub async fn get_rules(&self) -> Vec<MonitorRule> {
        self.rules.read().await.clone()
    }

    pub async fn get_rule(&self, id: &str) -> MonitorResult<MonitorRule> {
        self.rules
            .read()
            .await
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| rule_not_found(id))
    }

    /// Validate, assign an id when absent, persist and optionally start monitoring.
    /// Returns the stored rule.
    pub async fn add_rule(&self, mut rule: MonitorRule) -> MonitorResult<MonitorRule> {
        rule.validate()?;
        if rule.id.is_empty() {
            rule.id = Uuid::new_v4().to_string();
        }
        rule.status = RuleStatus::Idle;

        let _lifecycle = self.lifecycle.lock().await;
        {
            let mut rules = self.rules.write().await;
            if rules.iter().any(|r| r.id == rule.id) {
                return Err(MonitorError::conflict(format!("rule already exists: {}", rule.id)));
            }

            rules.push(rule.clone());
            if let Err(e) = self.store.add_rule(&rule).await {
                rules.retain(|r| r.id != rule.id);
                return Err(MonitorError::persistence(e));
            }
        }

        if rule.enabled {
            if let Err(e) = self.service.start_task(rule.clone()).await {
                error!(rule_id = %rule.id, error = %e, "❌ Failed to start monitor task");
            }
        }

        self.bus.publish(Event::for_rule(EventKind::RuleAdded, &rule)).await;
        info!(rule_id = %rule.id, rule_name = %rule.name, "➕ Rule added");
        Ok(rule)
    }

    /// Replace an existing rule's configuration, persist it and reconcile its task.
    /// Observed content, check time and error stay the engine's own; status
    /// follows the caller.
    pub async fn update_rule(&self, rule: MonitorRule) -> MonitorResult<()> {
        let _lifecycle = self.lifecycle.lock().await;
        self.replace_rule(rule).await
    }

    async fn replace_rule(&self, mut rule: MonitorRule) -> MonitorResult<()> {
        rule.validate()?;

        {
            let mut rules = self.rules.write().await;
            let slot = rules
                .iter_mut()
                .find(|r| r.id == rule.id)
                .ok_or_else(|| rule_not_found(&rule.id))?;

            let status = rule.status;
            rule.absorb_observation(slot);
            rule.status = status;

            self.store.update_rule(&rule).await.map_err(MonitorError::persistence)?;
            *slot = rule.clone();
        }

        self.reconcile(&rule).await;

        self.bus.publish(Event::for_rule(EventKind::RuleUpdated, &rule)).await;
        info!(rule_id = %rule.id, rule_name = %rule.name, "📝 Rule updated");
        Ok(())
    }

    /// Bring the task set in line with `rule.enabled` using the smallest transition
    async fn reconcile(&self, rule: &MonitorRule) {
        let id = rule.id.as_str();
        let outcome = if rule.enabled {
            if self.service.is_task_running(id).await {
                self.service.update_task(rule.clone()).await
            } else {
                self.service.start_task(rule.clone()).await
            }
        } else if self.service.is_registered(id).await {
            self.service.stop_task(id).await
        } else {
            Ok(())
        };

        if let Err(e) = outcome {
            error!(rule_id = %id, error = %e, "❌ Failed to reconcile monitor task");
        }
    }

    /// Remove a rule, stop its task and delete it from persistence
    pub async fn delete_rule(&self, id: &str) -> MonitorResult<()> {
        let _lifecycle = self.lifecycle.lock().await;
        {
            let mut rules = self.rules.write().await;
            let index = rules
                .iter()
                .position(|r| r.id == id)
                .ok_or_else(|| rule_not_found(id))?;
            rules.remove(index);
        }

        if self.service.is_registered(id).await {
            if let Err(e) = self.service.stop_task(id).await {
                error!(rule_id = %id, error = %e, "❌ Failed to stop monitor task");
            }
        }

        self.store.delete_rule(id).await.map_err(MonitorError::persistence)?;

        self.bus.publish(Event::new(EventKind::RuleDeleted, id)).await;
        info!(rule_id = %id, "🗑️ Rule deleted");
        Ok(())
    }

    /// Enable a rule and start its task
    pub async fn start_monitoring(&self, id: &str) -> MonitorResult<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let mut rule = self.get_rule(id).await?;
        if self.service.is_task_running(id).await {
            return Err(MonitorError::conflict(format!("rule {id} is already being monitored")));
        }

        rule.enabled = true;
        rule.status = RuleStatus::Idle;
        self.replace_rule(rule).await
    }

    /// Stop a rule's task and persist it as disabled and paused
    pub async fn stop_monitoring(&self, id: &str) -> MonitorResult<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let mut rule = self.get_rule(id).await?;

        match self.service.stop_task(id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => debug!(rule_id = %id, "No live task to stop"),
            Err(e) => return Err(e),
        }

        rule.enabled = false;
        rule.status = RuleStatus::Paused;
        self.replace_rule(rule).await
    }

    /// Stop every task and persist every rule as disabled and paused
    pub async fn stop_all_monitoring(&self) -> MonitorResult<()> {
        let _lifecycle = self.lifecycle.lock().await;
        self.service.stop_all().await;

        let (snapshot, changed) = {
            let mut rules = self.rules.write().await;
            let mut changed = Vec::new();
            for rule in rules.iter_mut() {
                if rule.enabled || rule.status != RuleStatus::Paused {
                    rule.enabled = false;
                    rule.status = RuleStatus::Paused;
                    changed.push(rule.clone());
                }
            }
            (rules.clone(), changed)
        };

        self.store.save(&snapshot).await.map_err(MonitorError::persistence)?;

        for rule in &changed {
            self.bus.publish(Event::for_rule(EventKind::RuleUpdated, rule)).await;
        }
        info!(stopped = changed.len(), "🛑 All monitoring stopped");
        Ok(())
    }

    /// Run one check now; the rule must be actively monitored
    pub async fn check_now(&self, id: &str) -> MonitorResult<()> {
        self.service.run_task_once(id).await
    }

    pub async fn subscribe(&self, listener: Arc<dyn EventListener>) {
        self.bus.subscribe(listener).await;
    }

    pub async fn unsubscribe(&self, listener: &Arc<dyn EventListener>) {
        self.bus.unsubscribe(listener).await;
    }

    /// Replace the notifier used by every task
    pub async fn update_notifier(&self, notifier: Arc<dyn Notifier>) {
        self.service.update_notifier(notifier).await;
    }

    pub const fn service(&self) -> &MonitorService {
        &self.service
    }
}

impl Drop for MonitorEngine {
    fn drop(&mut self) {
        self.status_pump.abort();
    }
}

fn rule_not_found(id: &str) -> MonitorError {
    MonitorError::not_found(format!("rule {id}"))
}

/// Apply task snapshots to the engine's rules, persist and publish
async fn apply_status_updates(
    mut snapshots: mpsc::UnboundedReceiver<MonitorRule>,
    rules: SharedRules,
    store: Arc<dyn RuleStore>,
    bus: Arc<EventBus>,
) {
    while let Some(observed) = snapshots.recv().await {
        let (updated, previous_content) = {
            let mut rules = rules.write().await;
            let Some(rule) = rules.iter_mut().find(|r| r.id == observed.id) else {
                debug!(rule_id = %observed.id, "Snapshot for unknown rule dropped");
                continue;
            };

            let previous_content = std::mem::take(&mut rule.last_content);
            rule.absorb_observation(&observed);
            if !rule.enabled {
                // a late cycle must not flip a stopped rule back to running
                rule.status = RuleStatus::Paused;
            }
            let updated = rule.clone();

            if let Err(e) = store.update_rule(&updated).await {
                warn!(rule_id = %updated.id, error = %e, "⚠️ Failed to persist rule status");
            }
            (updated, previous_content)
        };

        bus.publish(Event::for_rule(EventKind::RuleStatusChanged, &updated)).await;

        if !previous_content.is_empty() && previous_content != updated.last_content {
            let event = Event::for_rule(EventKind::ContentChanged, &updated).with_payload(json!({
                "previous": previous_content,
                "current": updated.last_content,
            }));
            bus.publish(event).await;
        }

        if observed.status == RuleStatus::Error {
            let event = Event::for_rule(EventKind::MonitorError, &updated)
                .with_payload(json!({ "message": observed.error_message }));
            bus.publish(event).await;
        }
    }

    debug!("Status pump exited");
}
