//! Rule persistence
//!
//! The rule set is stored as one versioned JSON document. Writes go to a
//! sibling `*.tmp` file that is then renamed over the target.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::rule::MonitorRule;

pub const DOCUMENT_VERSION: &str = "1.0";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("rule already exists: {0}")]
    DuplicateId(String),

    #[error("rule not found: {0}")]
    NotFound(String),
}

/// Load/save contract plus single-rule conveniences built on it
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn load(&self) -> Result<Vec<MonitorRule>>;
    async fn save(&self, rules: &[MonitorRule]) -> Result<()>;
    async fn add_rule(&self, rule: &MonitorRule) -> Result<()>;
    async fn update_rule(&self, rule: &MonitorRule) -> Result<()>;
    async fn delete_rule(&self, id: &str) -> Result<()>;
    async fn get_rule(&self, id: &str) -> Result<MonitorRule>;
}

#[derive(Debug, Serialize, Deserialize)]
struct RuleDocument {
    version: String,
    #[serde(default)]
    rules: Vec<MonitorRule>,
}

/// File-backed [`RuleStore`]
#[derive(Debug)]
pub struct JsonRuleStore {
    path: PathBuf,
    // serializes read-modify-write cycles
    lock: Mutex<()>,
}

impl JsonRuleStore {
    /// Open a store at `path`, creating the parent directory if needed
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create rule store directory {}", parent.display()))?;
        }
        info!("📂 Rule store at {}", path.display());
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    async fn read_rules(&self) -> Result<Vec<MonitorRule>> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Rule file {} absent, starting empty", self.path.display());
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read rule file {}", self.path.display()));
            }
        };

        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        let document: RuleDocument = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse rule file {}", self.path.display()))?;
        if document.version != DOCUMENT_VERSION {
            warn!(version = %document.version, "⚠️ Unexpected rule file version, reading anyway");
        }
        Ok(document.rules)
    }

    async fn write_rules(&self, rules: &[MonitorRule]) -> Result<()> {
        let document = RuleDocument {
            version: DOCUMENT_VERSION.to_string(),
            rules: rules.to_vec(),
        };
        let content = serde_json::to_string_pretty(&document).context("Failed to serialize rules")?;

        let temp = self.temp_path();
        fs::write(&temp, content)
            .await
            .with_context(|| format!("Failed to write {}", temp.display()))?;

        if let Err(e) = fs::rename(&temp, &self.path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e).with_context(|| format!("Failed to replace rule file {}", self.path.display()));
        }

        debug!(count = rules.len(), "💾 Rules saved");
        Ok(())
    }
}

#[async_trait]
impl RuleStore for JsonRuleStore {
    async fn load(&self) -> Result<Vec<MonitorRule>> {
        let _guard = self.lock.lock().await;
        self.read_rules().await
    }

    async fn save(&self, rules: &[MonitorRule]) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.write_rules(rules).await
    }

    async fn add_rule(&self, rule: &MonitorRule) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut rules = self.read_rules().await?;
        if rules.iter().any(|r| r.id == rule.id) {
            return Err(StoreError::DuplicateId(rule.id.clone()).into());
        }
        rules.push(rule.clone());
        self.write_rules(&rules).await
    }

    async fn update_rule(&self, rule: &MonitorRule) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut rules = self.read_rules().await?;
        let slot = rules
            .iter_mut()
            .find(|r| r.id == rule.id)
            .ok_or_else(|| StoreError::NotFound(rule.id.clone()))?;
        *slot = rule.clone();
        self.write_rules(&rules).await
    }

    async fn delete_rule(&self, id: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut rules = self.read_rules().await?;
        let before = rules.len();
        rules.retain(|r| r.id != id);
        if rules.len() == before {
            return Err(StoreError::NotFound(id.to_string()).into());
        }
        self.write_rules(&rules).await
    }

    async fn get_rule(&self, id: &str) -> Result<MonitorRule> {
        let _guard = self.lock.lock().await;
        self.read_rules()
            .await?
            .into_iter()
            .find(|r| r.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rule::{ExtractorKind, HttpMethod};
    use std::time::Duration;

    fn rule(id: &str) -> MonitorRule {
        MonitorRule::new(
            format!("rule {id}"),
            "https://example.com/api",
            Duration::from_secs(30),
            ExtractorKind::Json,
            "data.version",
        )
        .with_id(id)
    }

    #[tokio::test]
    async fn test_absent_file_is_empty_set() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonRuleStore::open(dir.path().join("nested/rules.json")).await.unwrap();
        assert!(store.load().await.unwrap().is_empty());
        assert!(dir.path().join("nested").is_dir());
    }

    #[tokio::test]
    async fn test_document_shape() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonRuleStore::open(dir.path().join("rules.json")).await.unwrap();
        store.save(&[rule("a")]).await.unwrap();

        let raw = std::fs::read_to_string(store.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["version"], "1.0");
        assert_eq!(value["rules"][0]["interval"], "30s");
        assert_eq!(value["rules"][0]["extractor_type"], "json");
        assert!(value["rules"][0].get("headers").is_none());
        assert!(!store.temp_path().exists());
    }

    #[tokio::test]
    async fn test_round_trip_preserves_every_field() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonRuleStore::open(dir.path().join("rules.json")).await.unwrap();

        let mut detailed = rule("full")
            .with_method(HttpMethod::Post)
            .with_header("Authorization", "Bearer t")
            .with_body(r#"{"q":1}"#)
            .with_description("watch release")
            .with_notify(true)
            .with_enabled(true);
        detailed.interval = Duration::from_millis(1500);
        detailed.last_content = "v1".to_string();
        detailed.last_checked = Some(chrono::Utc::now());

        let rules = vec![detailed, rule("plain")];
        store.save(&rules).await.unwrap();
        assert_eq!(store.load().await.unwrap(), rules);
    }

    #[tokio::test]
    async fn test_convenience_operations() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonRuleStore::open(dir.path().join("rules.json")).await.unwrap();

        store.add_rule(&rule("a")).await.unwrap();
        let err = store.add_rule(&rule("a")).await.unwrap_err();
        assert_eq!(err.downcast_ref::<StoreError>(), Some(&StoreError::DuplicateId("a".into())));
        assert_eq!(store.load().await.unwrap().len(), 1);

        let mut changed = rule("a");
        changed.name = "renamed".to_string();
        store.update_rule(&changed).await.unwrap();
        assert_eq!(store.get_rule("a").await.unwrap().name, "renamed");

        assert!(store.update_rule(&rule("ghost")).await.is_err());
        assert!(store.get_rule("ghost").await.is_err());
        assert!(store.delete_rule("ghost").await.is_err());

        store.delete_rule("a").await.unwrap();
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_adds_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(JsonRuleStore::open(dir.path().join("rules.json")).await.unwrap());

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move { store.add_rule(&rule(&format!("r{i}"))).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.load().await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = JsonRuleStore::open(&path).await.unwrap();
        assert!(store.load().await.is_err());
    }
}
