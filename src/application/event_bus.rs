//! Publish/subscribe fan-out of domain events
//!
//! Every subscriber gets its own delivery queue drained by a dedicated tokio
//! task, so `publish` only enqueues. A panicking listener is caught per event
//! and keeps receiving later events.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};

use crate::domain::events::{Event, EventKind};

#[async_trait]
pub trait EventListener: Send + Sync {
    async fn on_event(&self, event: &Event);
}

struct Subscription {
    listener: Arc<dyn EventListener>,
    queue: mpsc::UnboundedSender<Arc<Event>>,
}

/// Listener identity is the address of the shared allocation
fn same_listener(a: &Arc<dyn EventListener>, b: &Arc<dyn EventListener>) -> bool {
    std::ptr::eq(Arc::as_ptr(a).cast::<()>(), Arc::as_ptr(b).cast::<()>())
}

#[derive(Default)]
pub struct EventBus {
    subscriptions: RwLock<Vec<Subscription>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener`; registering the same listener twice has no effect
    pub async fn subscribe(&self, listener: Arc<dyn EventListener>) {
        let mut subscriptions = self.subscriptions.write().await;
        if subscriptions.iter().any(|s| same_listener(&s.listener, &listener)) {
            debug!("Listener already subscribed");
            return;
        }

        let (queue, mut deliveries) = mpsc::unbounded_channel::<Arc<Event>>();
        let worker_listener = Arc::clone(&listener);
        tokio::spawn(async move {
            while let Some(event) = deliveries.recv().await {
                let delivery = AssertUnwindSafe(worker_listener.on_event(&event)).catch_unwind();
                if delivery.await.is_err() {
                    error!(event = %event.kind, rule_id = %event.rule_id, "💥 Event listener panicked");
                }
            }
        });

        subscriptions.push(Subscription { listener, queue });
    }

    /// Remove `listener`; unknown listeners are ignored. Events already queued
    /// for it are still delivered.
    pub async fn unsubscribe(&self, listener: &Arc<dyn EventListener>) {
        self.subscriptions
            .write()
            .await
            .retain(|s| !same_listener(&s.listener, listener));
    }

    /// Enqueue `event` for every current subscriber without waiting on any of them
    pub async fn publish(&self, event: Event) {
        let queues: Vec<_> = self
            .subscriptions
            .read()
            .await
            .iter()
            .map(|s| s.queue.clone())
            .collect();

        let event = Arc::new(event);
        for queue in queues {
            if queue.send(Arc::clone(&event)).is_err() {
                warn!(event = %event.kind, "⚠️ Listener queue closed, event dropped");
            }
        }
    }

    pub async fn listener_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }
}

/// Logs every event, keyed by kind
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingEventListener;

#[async_trait]
impl EventListener for LoggingEventListener {
    async fn on_event(&self, event: &Event) {
        let rule_name = event.rule.as_ref().map_or("", |r| r.name.as_str());
        match event.kind {
            EventKind::RuleAdded | EventKind::RuleUpdated | EventKind::RuleDeleted => {
                info!(event = %event.kind, rule_id = %event.rule_id, rule_name, "📋 Rule event");
            }
            EventKind::RuleStatusChanged => {
                let status = event.rule.as_ref().map(|r| r.status.as_str()).unwrap_or_default();
                debug!(rule_id = %event.rule_id, rule_name, status, "Rule status changed");
            }
            EventKind::ContentChanged => {
                info!(rule_id = %event.rule_id, rule_name, payload = ?event.payload, "🔄 Content changed");
            }
            EventKind::MonitorError => {
                warn!(rule_id = %event.rule_id, rule_name, payload = ?event.payload, "⚠️ Monitor error");
            }
        }
    }
}
