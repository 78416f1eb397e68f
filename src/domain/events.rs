//! Domain events broadcast to UI and log listeners
//!
//! Events are immutable notices published once per occurrence. Shells forward
//! them keyed by [`EventKind::event_name`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::rule::MonitorRule;

/// What happened
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RuleAdded,
    RuleUpdated,
    RuleDeleted,
    RuleStatusChanged,
    ContentChanged,
    MonitorError,
}

impl EventKind {
    /// Stable wire name used by event consumers
    pub const fn event_name(self) -> &'static str {
        match self {
            Self::RuleAdded => "rule_added",
            Self::RuleUpdated => "rule_updated",
            Self::RuleDeleted => "rule_deleted",
            Self::RuleStatusChanged => "rule_status_changed",
            Self::ContentChanged => "content_changed",
            Self::MonitorError => "monitor_error",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.event_name())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub rule_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<MonitorRule>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl Event {
    pub fn new(kind: EventKind, rule_id: impl Into<String>) -> Self {
        Self {
            kind,
            rule_id: rule_id.into(),
            rule: None,
            timestamp: Utc::now(),
            payload: None,
        }
    }

    /// Event carrying a snapshot of the affected rule
    pub fn for_rule(kind: EventKind, rule: &MonitorRule) -> Self {
        Self {
            rule: Some(rule.clone()),
            ..Self::new(kind, rule.id.clone())
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rule::ExtractorKind;
    use std::time::Duration;

    #[test]
    fn test_event_serializes_with_wire_names() {
        let rule = MonitorRule::new(
            "Prices",
            "https://example.com",
            Duration::from_secs(60),
            ExtractorKind::Json,
            "data.price",
        )
        .with_id("r-1");

        let event = Event::for_rule(EventKind::RuleStatusChanged, &rule)
            .with_payload(serde_json::json!({ "message": "ok" }));
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["type"], "rule_status_changed");
        assert_eq!(value["rule_id"], "r-1");
        assert_eq!(value["rule"]["name"], "Prices");
        assert_eq!(value["payload"]["message"], "ok");
        assert_eq!(EventKind::RuleDeleted.to_string(), "rule_deleted");
    }

    #[test]
    fn test_deleted_event_has_no_snapshot() {
        let event = Event::new(EventKind::RuleDeleted, "gone");
        let value = serde_json::to_value(&event).unwrap();
        assert!(value.get("rule").is_none());
        assert!(value.get("payload").is_none());
    }
}
