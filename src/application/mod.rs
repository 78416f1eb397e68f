//! Application layer - task scheduling, rule lifecycle and event fan-out
//!
//! Coordinates domain rules with the infrastructure adapters: one
//! [`MonitorTask`] per monitored rule, a [`MonitorService`] registry, the
//! [`MonitorEngine`] that owns the rule set, and the [`EventBus`].

pub mod engine;
pub mod event_bus;
pub mod monitor_service;
pub mod monitor_task;

// Re-export commonly used items
pub use engine::MonitorEngine;
pub use event_bus::{EventBus, EventListener, LoggingEventListener};
pub use monitor_service::MonitorService;
pub use monitor_task::{change_notification, truncate_content, MonitorTask, NOTIFICATION_PREVIEW_CHARS};
