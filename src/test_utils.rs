//! Test doubles shared by unit and integration tests
//!
//! In-memory rule store with failure injection, a scripted fetcher, and
//! notifier/listener doubles that record what they receive.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::application::event_bus::EventListener;
use crate::domain::events::{Event, EventKind};
use crate::domain::rule::MonitorRule;
use crate::infrastructure::http_fetcher::{FetchError, FetchRequest, FetchResponse, Fetcher};
use crate::infrastructure::notification::Notifier;
use crate::infrastructure::rule_store::{RuleStore, StoreError};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Poll `probe` until it returns true or `limit` elapses
pub async fn eventually<F, Fut>(limit: Duration, mut probe: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if probe().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// [`RuleStore`] kept in memory
#[derive(Debug, Default)]
pub struct MemoryRuleStore {
    rules: Mutex<Vec<MonitorRule>>,
    fail_writes: AtomicBool,
    fail_loads: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: Vec<MonitorRule>) -> Self {
        Self {
            rules: Mutex::new(rules),
            ..Self::default()
        }
    }

    /// Make every write fail until reset
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    pub async fn rules(&self) -> Vec<MonitorRule> {
        self.rules.lock().await.clone()
    }

    /// Successful writes so far
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    fn check_write(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(anyhow!("injected write failure"));
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl RuleStore for MemoryRuleStore {
    async fn load(&self) -> Result<Vec<MonitorRule>> {
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(anyhow!("injected load failure"));
        }
        Ok(self.rules().await)
    }

    async fn save(&self, rules: &[MonitorRule]) -> Result<()> {
        self.check_write()?;
        *self.rules.lock().await = rules.to_vec();
        Ok(())
    }

    async fn add_rule(&self, rule: &MonitorRule) -> Result<()> {
        let mut rules = self.rules.lock().await;
        if rules.iter().any(|r| r.id == rule.id) {
            return Err(StoreError::DuplicateId(rule.id.clone()).into());
        }
        self.check_write()?;
        rules.push(rule.clone());
        Ok(())
    }

    async fn update_rule(&self, rule: &MonitorRule) -> Result<()> {
        let mut rules = self.rules.lock().await;
        let slot = rules
            .iter_mut()
            .find(|r| r.id == rule.id)
            .ok_or_else(|| StoreError::NotFound(rule.id.clone()))?;
        self.check_write()?;
        *slot = rule.clone();
        Ok(())
    }

    async fn delete_rule(&self, id: &str) -> Result<()> {
        let mut rules = self.rules.lock().await;
        let index = rules
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        self.check_write()?;
        rules.remove(index);
        Ok(())
    }

    async fn get_rule(&self, id: &str) -> Result<MonitorRule> {
        self.rules
            .lock()
            .await
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()).into())
    }
}

#[derive(Debug, Clone)]
enum Scripted {
    Body(String),
    Status(u16),
}

impl Scripted {
    fn into_result(self, url: &str) -> Result<FetchResponse, FetchError> {
        match self {
            Self::Body(body) => Ok(FetchResponse {
                body: body.into_bytes(),
                content_type: "text/plain".to_string(),
                status: 200,
            }),
            Self::Status(status) => Err(FetchError::HttpStatus {
                status,
                url: url.to_string(),
            }),
        }
    }
}

/// [`Fetcher`] that replays queued responses, then a default body
#[derive(Debug, Default)]
pub struct ScriptedFetcher {
    queue: std::sync::Mutex<VecDeque<Scripted>>,
    default_body: std::sync::Mutex<Option<String>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every fetch sleeps for `delay` before answering; the call counts on entry
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn push_body(&self, body: &str) {
        self.with_queue(|q| q.push_back(Scripted::Body(body.to_string())));
    }

    pub fn push_status(&self, status: u16) {
        self.with_queue(|q| q.push_back(Scripted::Status(status)));
    }

    /// Returned once the queue is empty
    pub fn set_default_body(&self, body: &str) {
        let mut slot = self
            .default_body
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *slot = Some(body.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn wait_for_calls(&self, count: usize, limit: Duration) -> bool {
        eventually(limit, move || async move { self.calls() >= count }).await
    }

    fn with_queue<R>(&self, f: impl FnOnce(&mut VecDeque<Scripted>) -> R) -> R {
        let mut queue = self.queue.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut queue)
    }

    fn next(&self) -> Option<Scripted> {
        self.with_queue(VecDeque::pop_front).or_else(|| {
            self.default_body
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .clone()
                .map(Scripted::Body)
        })
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.next() {
            Some(scripted) => scripted.into_result(&request.url),
            None => Err(FetchError::Transport(format!("no scripted response for {}", request.url))),
        }
    }
}

/// [`Notifier`] that records every delivery
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records nothing and fails every delivery
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub async fn notifications(&self) -> Vec<(String, String)> {
        self.sent.lock().await.clone()
    }

    pub async fn count(&self) -> usize {
        self.sent.lock().await.len()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, title: &str, message: &str) -> Result<()> {
        if self.fail {
            return Err(anyhow!("notification backend unavailable"));
        }
        self.sent.lock().await.push((title.to_string(), message.to_string()));
        Ok(())
    }
}

/// [`EventListener`] that records every event, optionally after a delay
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<Event>>,
    delay: Option<Duration>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub async fn events(&self) -> Vec<Event> {
        self.events.lock().await.clone()
    }

    pub async fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().await.iter().map(|e| e.kind).collect()
    }

    pub async fn first_of(&self, kind: EventKind) -> Option<Event> {
        self.events.lock().await.iter().find(|e| e.kind == kind).cloned()
    }

    pub async fn wait_for(&self, count: usize, limit: Duration) -> bool {
        eventually(limit, move || async move { self.events.lock().await.len() >= count }).await
    }

    pub async fn wait_for_kind(&self, kind: EventKind, limit: Duration) -> bool {
        eventually(limit, move || async move { self.first_of(kind).await.is_some() }).await
    }
}

#[async_trait]
impl EventListener for RecordingListener {
    async fn on_event(&self, event: &Event) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.events.lock().await.push(event.clone());
    }
}

/// [`EventListener`] that panics on every event
#[derive(Debug, Default, Clone, Copy)]
pub struct PanickingListener;

#[async_trait]
impl EventListener for PanickingListener {
    async fn on_event(&self, event: &Event) {
        panic!("listener failure on {}", event.kind);
    }
}
