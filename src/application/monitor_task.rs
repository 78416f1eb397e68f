//! Per-rule check loop
//!
//! A [`MonitorTask`] owns one rule's recurring fetch → extract → diff → notify
//! cycle. Every cycle, scheduled or manual, runs under the task's state lock
//! so their effects serialize. Each observable change to the rule is sent to
//! the engine as a snapshot over an unbounded channel.

use std::sync::{Arc, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, warn};

use crate::domain::errors::{MonitorError, MonitorResult};
use crate::domain::rule::{MonitorRule, RuleStatus};
use crate::infrastructure::extraction::{ContentExtractor, ExtractorFactory};
use crate::infrastructure::http_fetcher::{FetchRequest, Fetcher};
use crate::infrastructure::notification::NotifierHandle;

/// Characters of new content included in a change notification
pub const NOTIFICATION_PREVIEW_CHARS: usize = 200;

/// Channel on which tasks announce rule snapshots
pub type RuleUpdateSender = mpsc::UnboundedSender<MonitorRule>;

/// Cut `content` to at most `max_chars` characters, marking the cut with `...`
pub fn truncate_content(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &content[..cut]),
        None => content.to_string(),
    }
}

/// Title and body of the change notification for `rule`
pub fn change_notification(rule: &MonitorRule, content: &str) -> (String, String) {
    let title = format!("Content changed: {}", rule.name);
    let preview = truncate_content(content, NOTIFICATION_PREVIEW_CHARS);
    let message = if rule.description.is_empty() {
        preview
    } else {
        format!("{}\n\n{}", rule.description, preview)
    };
    (title, message)
}

struct TaskState {
    rule: MonitorRule,
    extractor: ContentExtractor,
}

impl TaskState {
    fn apply(&mut self, staged: StagedConfig) {
        let observed = std::mem::replace(&mut self.rule, staged.rule);
        self.rule.absorb_observation(&observed);
        if let Some(extractor) = staged.extractor {
            self.extractor = extractor;
        }
    }
}

/// Configuration accepted by `update`, applied when the next cycle starts
struct StagedConfig {
    rule: MonitorRule,
    extractor: Option<ContentExtractor>,
}

/// Shared between the task handle and its spawned loop
struct TaskCore {
    state: Mutex<TaskState>,
    staged: std::sync::Mutex<Option<StagedConfig>>,
    snapshot: watch::Sender<MonitorRule>,
    fetcher: Arc<dyn Fetcher>,
    notifier: NotifierHandle,
    updates: RuleUpdateSender,
}

impl TaskCore {
    fn staged(&self) -> MutexGuard<'_, Option<StagedConfig>> {
        self.staged.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn announce(&self, rule: &MonitorRule) {
        {
            // the public snapshot shows staged configuration with observed state
            let staged = self.staged();
            let snapshot = match staged.as_ref() {
                Some(config) => {
                    let mut snapshot = config.rule.clone();
                    snapshot.absorb_observation(rule);
                    snapshot
                }
                None => rule.clone(),
            };
            self.snapshot.send_replace(snapshot);
        }
        if self.updates.send(rule.clone()).is_err() {
            debug!(rule_id = %rule.id, "Status receiver gone, snapshot dropped");
        }
    }

    /// One full check. With a token, a cycle that only acquires the lock after
    /// cancellation does nothing.
    async fn run_cycle(&self, token: Option<&CancellationToken>) -> MonitorResult<()> {
        let mut state = self.state.lock().await;
        if token.is_some_and(CancellationToken::is_cancelled) {
            return Ok(());
        }
        let staged = self.staged().take();
        if let Some(config) = staged {
            state.apply(config);
            debug!(rule_id = %state.rule.id, "Staged configuration applied");
        }
        let TaskState { rule, extractor } = &mut *state;

        debug!(rule_id = %rule.id, rule_name = %rule.name, url = %rule.url, "🔍 Checking");

        rule.status = RuleStatus::Running;
        rule.error_message.clear();
        self.announce(rule);

        let content = match self.fetch_and_extract(rule, extractor).await {
            Ok(content) => content,
            Err(e) => {
                rule.status = RuleStatus::Error;
                rule.error_message = e.to_string();
                self.announce(rule);
                error!(rule_id = %rule.id, rule_name = %rule.name, error = %e, "❌ Check failed");
                return Err(e);
            }
        };

        rule.last_checked = Some(Utc::now());

        if !rule.last_content.is_empty() && rule.last_content != content {
            info!(rule_id = %rule.id, rule_name = %rule.name, "🔄 Content changed");
            if rule.notify_enabled {
                let (title, message) = change_notification(rule, &content);
                if let Err(e) = self.notifier.notify(&title, &message).await {
                    warn!(rule_id = %rule.id, error = %e, "⚠️ Failed to send notification");
                }
            }
        }

        rule.last_content = content;
        rule.status = RuleStatus::Running;
        self.announce(rule);

        debug!(rule_id = %rule.id, content_length = rule.last_content.len(), "✅ Check complete");
        Ok(())
    }

    async fn fetch_and_extract(&self, rule: &MonitorRule, extractor: &ContentExtractor) -> MonitorResult<String> {
        let request = FetchRequest {
            url: rule.url.clone(),
            method: rule.http_method()?,
            headers: rule.headers.clone(),
            body: rule.body.clone(),
        };
        let response = self.fetcher.fetch(&request).await?;
        Ok(extractor.extract(&response.body, &response.content_type).await?)
    }
}

struct RunningLoop {
    token: CancellationToken,
    interval_tx: watch::Sender<Duration>,
    handle: JoinHandle<()>,
    // cancels the loop when the task is dropped
    _guard: DropGuard,
}

impl RunningLoop {
    fn is_active(&self) -> bool {
        !self.token.is_cancelled() && !self.handle.is_finished()
    }
}

struct TaskControl {
    interval: Duration,
    running: Option<RunningLoop>,
}

/// Live, schedulable execution unit for one rule
pub struct MonitorTask {
    id: String,
    core: Arc<TaskCore>,
    control: Mutex<TaskControl>,
    factory: ExtractorFactory,
}

impl MonitorTask {
    /// Build a stopped task; fails when the rule's extractor cannot be constructed
    pub fn new(
        rule: MonitorRule,
        fetcher: Arc<dyn Fetcher>,
        factory: ExtractorFactory,
        notifier: NotifierHandle,
        updates: RuleUpdateSender,
    ) -> MonitorResult<Self> {
        let extractor = factory.create(&rule.extractor_kind, &rule.extractor_expr)?;
        let (snapshot, _) = watch::channel(rule.clone());

        Ok(Self {
            id: rule.id.clone(),
            control: Mutex::new(TaskControl {
                interval: rule.interval,
                running: None,
            }),
            core: Arc::new(TaskCore {
                state: Mutex::new(TaskState { rule, extractor }),
                staged: std::sync::Mutex::new(None),
                snapshot,
                fetcher,
                notifier,
                updates,
            }),
            factory,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Latest announced snapshot of the rule
    pub fn rule(&self) -> MonitorRule {
        self.core.snapshot.borrow().clone()
    }

    pub fn status(&self) -> RuleStatus {
        self.core.snapshot.borrow().status
    }

    pub async fn is_running(&self) -> bool {
        self.control
            .lock()
            .await
            .running
            .as_ref()
            .is_some_and(RunningLoop::is_active)
    }

    /// Launch the check loop; the first check runs immediately
    pub async fn start(&self) -> MonitorResult<()> {
        let mut control = self.control.lock().await;
        if control.running.as_ref().is_some_and(RunningLoop::is_active) {
            return Err(MonitorError::conflict(format!("task already running: {}", self.id)));
        }

        let token = CancellationToken::new();
        let (interval_tx, interval_rx) = watch::channel(control.interval);
        let handle = tokio::spawn(run_loop(Arc::clone(&self.core), token.clone(), interval_rx));

        control.running = Some(RunningLoop {
            _guard: token.clone().drop_guard(),
            token,
            interval_tx,
            handle,
        });

        info!(rule_id = %self.id, interval = ?control.interval, "🚀 Monitor task started");
        Ok(())
    }

    /// Cancel the loop. An in-flight cycle completes; no further cycle starts.
    pub async fn stop(&self) {
        let mut control = self.control.lock().await;
        if let Some(running) = control.running.take() {
            running.token.cancel();
            info!(rule_id = %self.id, "🛑 Monitor task stopped");
        }
    }

    /// Run one cycle now, independent of the schedule
    pub async fn run_once(&self) -> MonitorResult<()> {
        self.core.run_cycle(None).await
    }

    /// Apply new configuration without changing running state.
    ///
    /// Never waits for an in-flight cycle: the configuration is staged and the
    /// next cycle picks it up. The extractor is rebuilt only when its kind or
    /// expression changed, the schedule only when the interval changed.
    /// Observed state stays the task's own.
    pub async fn update(&self, rule: MonitorRule) -> MonitorResult<()> {
        let mut control = self.control.lock().await;
        let current = self.rule();

        let extractor = if rule.extractor_kind != current.extractor_kind || rule.extractor_expr != current.extractor_expr {
            let rebuilt = self.factory.create(&rule.extractor_kind, &rule.extractor_expr)?;
            debug!(rule_id = %self.id, kind = %rule.extractor_kind, "Extractor rebuilt");
            Some(rebuilt)
        } else {
            None
        };

        if rule.interval != control.interval {
            control.interval = rule.interval;
            if let Some(running) = control.running.as_ref().filter(|r| r.is_active()) {
                running.interval_tx.send_replace(rule.interval);
            }
        }

        let name = rule.name.clone();
        {
            let mut staged = self.core.staged();
            // an unchanged expression keeps whatever extractor is already staged
            let extractor = extractor.or_else(|| staged.take().and_then(|config| config.extractor));
            let mut snapshot = rule.clone();
            snapshot.absorb_observation(&self.core.snapshot.borrow());
            *staged = Some(StagedConfig { rule, extractor });
            self.core.snapshot.send_replace(snapshot);
        }

        info!(rule_id = %self.id, rule_name = %name, "📝 Task configuration updated");
        Ok(())
    }
}

fn ticker(start: Instant, period: Duration) -> Interval {
    let mut ticker = interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn run_loop(core: Arc<TaskCore>, token: CancellationToken, mut interval_rx: watch::Receiver<Duration>) {
    // first tick fires immediately
    let mut schedule = ticker(Instant::now(), *interval_rx.borrow_and_update());

    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => break,
            changed = interval_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let period = *interval_rx.borrow_and_update();
                schedule = ticker(Instant::now() + period, period);
                continue;
            }
            _ = schedule.tick() => {}
        }

        if token.is_cancelled() {
            break;
        }
        // errors are already recorded on the rule
        let _ = core.run_cycle(Some(&token)).await;
    }

    debug!("Check loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rule::ExtractorKind;
    use crate::test_utils::{RecordingNotifier, ScriptedFetcher};
    use proptest::prelude::*;

    fn rule() -> MonitorRule {
        MonitorRule::new(
            "Docs",
            "https://example.com/docs",
            Duration::from_secs(60),
            ExtractorKind::Css,
            "h1",
        )
        .with_id("docs")
        .with_notify(true)
    }

    struct Harness {
        task: MonitorTask,
        fetcher: Arc<ScriptedFetcher>,
        notifier: Arc<RecordingNotifier>,
        updates: mpsc::UnboundedReceiver<MonitorRule>,
    }

    fn harness(rule: MonitorRule) -> Harness {
        harness_with(rule, ScriptedFetcher::new())
    }

    fn harness_with(rule: MonitorRule, fetcher: ScriptedFetcher) -> Harness {
        let fetcher = Arc::new(fetcher);
        let notifier = Arc::new(RecordingNotifier::new());
        let (tx, updates) = mpsc::unbounded_channel();
        let task = MonitorTask::new(
            rule,
            fetcher.clone(),
            ExtractorFactory::default(),
            NotifierHandle::new(notifier.clone()),
            tx,
        )
        .unwrap();
        Harness {
            task,
            fetcher,
            notifier,
            updates,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<MonitorRule>) -> Vec<MonitorRule> {
        let mut out = Vec::new();
        while let Ok(rule) = rx.try_recv() {
            out.push(rule);
        }
        out
    }

    #[tokio::test]
    async fn test_first_check_only_baselines() {
        let mut h = harness(rule());
        h.fetcher.push_body("<h1>v1</h1>");

        h.task.run_once().await.unwrap();

        assert_eq!(h.notifier.count().await, 0);
        let snapshot = h.task.rule();
        assert_eq!(snapshot.last_content, "v1");
        assert_eq!(snapshot.status, RuleStatus::Running);
        assert!(snapshot.last_checked.is_some());

        let announced = drain(&mut h.updates);
        assert_eq!(announced.len(), 2);
        assert_eq!(announced[1].last_content, "v1");
    }

    #[tokio::test]
    async fn test_change_notifies_exactly_once() {
        let h = harness(rule().with_description("release page"));
        h.fetcher.push_body("<h1>v1</h1>");
        h.fetcher.push_body("<h1>v2</h1>");
        h.fetcher.push_body("<h1>v2</h1>");

        h.task.run_once().await.unwrap();
        h.task.run_once().await.unwrap();
        h.task.run_once().await.unwrap();

        let sent = h.notifier.notifications().await;
        assert_eq!(sent.len(), 1);
        assert!(sent[0].0.contains("Docs"));
        assert_eq!(sent[0].1, "release page\n\nv2");
    }

    #[tokio::test]
    async fn test_notify_disabled_stays_silent() {
        let h = harness(rule().with_notify(false));
        h.fetcher.push_body("<h1>a</h1>");
        h.fetcher.push_body("<h1>b</h1>");

        h.task.run_once().await.unwrap();
        h.task.run_once().await.unwrap();

        assert_eq!(h.notifier.count().await, 0);
        assert_eq!(h.task.rule().last_content, "b");
    }

    #[tokio::test]
    async fn test_failure_records_error_and_propagates() {
        let mut h = harness(rule());
        h.fetcher.push_body("<h1>v1</h1>");
        h.fetcher.push_status(503);

        h.task.run_once().await.unwrap();
        let err = h.task.run_once().await.unwrap_err();
        assert!(matches!(err, MonitorError::Transport(_)));

        let snapshot = h.task.rule();
        assert_eq!(snapshot.status, RuleStatus::Error);
        assert!(!snapshot.error_message.is_empty());
        assert_eq!(snapshot.last_content, "v1");
        assert_eq!(h.notifier.count().await, 0);

        let last = drain(&mut h.updates).pop().unwrap();
        assert_eq!(last.status, RuleStatus::Error);
    }

    #[tokio::test]
    async fn test_extraction_failure_is_recorded() {
        let h = harness(rule());
        h.fetcher.push_body("<p>no heading</p>");

        let err = h.task.run_once().await.unwrap_err();
        assert!(matches!(err, MonitorError::Extraction(_)));
        assert_eq!(h.task.status(), RuleStatus::Error);
    }

    #[tokio::test]
    async fn test_success_clears_previous_error() {
        let h = harness(rule());
        h.fetcher.push_status(500);
        h.fetcher.push_body("<h1>ok</h1>");

        assert!(h.task.run_once().await.is_err());
        h.task.run_once().await.unwrap();

        let snapshot = h.task.rule();
        assert_eq!(snapshot.status, RuleStatus::Running);
        assert!(snapshot.error_message.is_empty());
    }

    #[tokio::test]
    async fn test_start_runs_immediately_and_rejects_double_start() {
        let h = harness(rule());
        h.fetcher.set_default_body("<h1>steady</h1>");

        h.task.start().await.unwrap();
        assert!(h.task.is_running().await);
        assert!(h.task.start().await.unwrap_err().is_conflict());

        assert!(h.fetcher.wait_for_calls(1, Duration::from_secs(2)).await);
        h.task.stop().await;
        assert!(!h.task.is_running().await);

        // stop is idempotent and the task can be restarted
        h.task.stop().await;
        h.task.start().await.unwrap();
        assert!(h.task.is_running().await);
        h.task.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_follows_interval_and_stops() {
        let h = harness(rule());
        h.fetcher.set_default_body("<h1>steady</h1>");

        h.task.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(125)).await;
        assert_eq!(h.fetcher.calls(), 3);

        h.task.stop().await;
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(h.fetcher.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_reschedules_running_loop() {
        let h = harness(rule());
        h.fetcher.set_default_body("<h1>steady</h1>");
        h.task.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.fetcher.calls(), 1);

        let mut faster = rule();
        faster.interval = Duration::from_secs(10);
        h.task.update(faster).await.unwrap();
        assert!(h.task.is_running().await);

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(h.fetcher.calls(), 4);
        h.task.stop().await;
    }

    #[tokio::test]
    async fn test_update_keeps_stopped_task_stopped_and_swaps_extractor() {
        let h = harness(rule());
        h.fetcher.push_body(r#"<h1>title</h1><p class="v">1.0</p>"#);
        h.task.run_once().await.unwrap();

        let mut changed = rule();
        changed.extractor_expr = "p.v".to_string();
        changed.name = "Docs v".to_string();
        h.task.update(changed).await.unwrap();
        assert!(!h.task.is_running().await);

        let snapshot = h.task.rule();
        assert_eq!(snapshot.name, "Docs v");
        assert_eq!(snapshot.last_content, "title");

        h.fetcher.push_body(r#"<h1>title</h1><p class="v">1.0</p>"#);
        h.task.run_once().await.unwrap();
        assert_eq!(h.task.rule().last_content, "1.0");
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_does_not_wait_for_in_flight_cycle() {
        let h = harness_with(rule(), ScriptedFetcher::with_delay(Duration::from_secs(10)));
        h.fetcher.set_default_body(r#"<h1>title</h1><p class="v">1.0</p>"#);
        h.task.start().await.unwrap();
        assert!(h.fetcher.wait_for_calls(1, Duration::from_secs(1)).await);

        let mut changed = rule();
        changed.extractor_expr = "p.v".to_string();
        changed.name = "Docs v".to_string();
        let applied = tokio::time::timeout(Duration::from_millis(1), h.task.update(changed)).await;
        assert!(matches!(applied, Ok(Ok(()))));
        assert_eq!(h.task.rule().name, "Docs v");

        // the in-flight cycle finishes with the extractor it started with
        tokio::time::sleep(Duration::from_secs(12)).await;
        let snapshot = h.task.rule();
        assert_eq!(snapshot.last_content, "title");
        assert_eq!(snapshot.name, "Docs v");

        h.task.stop().await;
        h.task.run_once().await.unwrap();
        assert_eq!(h.task.rule().last_content, "1.0");
    }

    #[tokio::test]
    async fn test_update_with_bad_expression_changes_nothing() {
        let h = harness(rule());
        let mut broken = rule();
        broken.extractor_kind = "regex".to_string();
        broken.extractor_expr = "(unclosed".to_string();
        broken.name = "renamed".to_string();

        assert!(h.task.update(broken).await.is_err());
        assert_eq!(h.task.rule().name, "Docs");
    }

    #[test]
    fn test_truncation_marks_cut() {
        let long = "é".repeat(250);
        let cut = truncate_content(&long, 200);
        assert_eq!(cut.chars().count(), 203);
        assert!(cut.ends_with("..."));
        assert_eq!(truncate_content("short", 200), "short");
        assert_eq!(truncate_content(&"x".repeat(200), 200), "x".repeat(200));
    }

    proptest! {
        #[test]
        fn prop_truncation_is_a_bounded_prefix(content in ".{0,400}") {
            let cut = truncate_content(&content, NOTIFICATION_PREVIEW_CHARS);
            prop_assert!(cut.chars().count() <= NOTIFICATION_PREVIEW_CHARS + 3);
            let kept = cut.strip_suffix("...").filter(|_| content.chars().count() > NOTIFICATION_PREVIEW_CHARS).unwrap_or(&cut);
            prop_assert!(content.starts_with(kept));
        }
    }
}
