//! Monitor rule entity
//!
//! A rule is one monitored endpoint: how to request it, how often, how to pull a
//! comparable value out of the response, and the state observed by the last check.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::duration_format;
use crate::domain::errors::{MonitorError, MonitorResult};

/// Shortest polling interval a rule may use
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Content extraction strategy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ExtractorKind {
    /// CSS selector over an HTML document
    Css,
    /// Regular expression over the raw body
    Regex,
    /// Path expression over a JSON document
    Json,
}

impl ExtractorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Css => "css",
            Self::Regex => "regex",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for ExtractorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExtractorKind {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "css" => Ok(Self::Css),
            "regex" => Ok(Self::Regex),
            "json" => Ok(Self::Json),
            other => Err(MonitorError::validation(format!(
                "invalid extractor type: {other}"
            ))),
        }
    }
}

/// HTTP methods a rule may use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl HttpMethod {
    pub const ALL: [Self; 7] = [
        Self::Get,
        Self::Post,
        Self::Put,
        Self::Delete,
        Self::Patch,
        Self::Head,
        Self::Options,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = MonitorError;

    /// Method names are matched exactly, the way HTTP spells them.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| MonitorError::validation(format!("invalid HTTP method: {s}")))
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => Self::GET,
            HttpMethod::Post => Self::POST,
            HttpMethod::Put => Self::PUT,
            HttpMethod::Delete => Self::DELETE,
            HttpMethod::Patch => Self::PATCH,
            HttpMethod::Head => Self::HEAD,
            HttpMethod::Options => Self::OPTIONS,
        }
    }
}

/// Observed status of a rule
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuleStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Error,
}

impl RuleStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for RuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One monitored endpoint with its schedule, extractor and observed state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MonitorRule {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub url: String,
    /// Kept as text so a rule can arrive with an empty or unknown method and be
    /// normalized (or rejected) by [`MonitorRule::validate`].
    #[serde(default)]
    pub method: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub body: String,
    #[serde(with = "duration_format")]
    pub interval: Duration,
    /// Kept as text for the same reason as `method`.
    #[serde(rename = "extractor_type")]
    pub extractor_kind: String,
    #[serde(rename = "extractor_expr")]
    pub extractor_expr: String,
    #[serde(default)]
    pub notify_enabled: bool,
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub last_content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checked: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: RuleStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_message: String,
}

impl MonitorRule {
    /// Create a rule with the required fields; everything else takes its default.
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        interval: Duration,
        extractor_kind: ExtractorKind,
        extractor_expr: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            description: String::new(),
            url: url.into(),
            method: String::new(),
            headers: HashMap::new(),
            body: String::new(),
            interval,
            extractor_kind: extractor_kind.as_str().to_string(),
            extractor_expr: extractor_expr.into(),
            notify_enabled: false,
            enabled: false,
            last_content: String::new(),
            last_checked: None,
            status: RuleStatus::Idle,
            error_message: String::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = method.as_str().to_string();
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_notify(mut self, notify_enabled: bool) -> Self {
        self.notify_enabled = notify_enabled;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Check every configuration field and normalize an empty method to GET.
    ///
    /// Observed-state fields are not inspected.
    pub fn validate(&mut self) -> MonitorResult<()> {
        if self.name.trim().is_empty() {
            return Err(MonitorError::validation("rule name must not be empty"));
        }

        if self.url.trim().is_empty() {
            return Err(MonitorError::validation("URL must not be empty"));
        }

        url::Url::parse(&self.url)
            .map_err(|e| MonitorError::validation(format!("invalid URL '{}': {e}", self.url)))?;

        if self.method.is_empty() {
            self.method = HttpMethod::default().as_str().to_string();
        }
        self.method.parse::<HttpMethod>()?;

        if self.interval < MIN_INTERVAL {
            return Err(MonitorError::validation(format!(
                "check interval must be at least 1s, got {}",
                duration_format::format_duration(self.interval)
            )));
        }

        if self.extractor_expr.is_empty() {
            return Err(MonitorError::validation(
                "extractor expression must not be empty",
            ));
        }

        self.extractor_kind.parse::<ExtractorKind>()?;

        Ok(())
    }

    /// Parsed HTTP method; an empty method means GET.
    pub fn http_method(&self) -> MonitorResult<HttpMethod> {
        if self.method.is_empty() {
            return Ok(HttpMethod::default());
        }
        self.method.parse()
    }

    pub fn extractor(&self) -> MonitorResult<ExtractorKind> {
        self.extractor_kind.parse()
    }

    /// Overwrite the observed-state fields with those of `observed`, leaving
    /// configuration untouched.
    pub fn absorb_observation(&mut self, observed: &Self) {
        self.status = observed.status;
        self.last_content.clone_from(&observed.last_content);
        self.last_checked = observed.last_checked;
        self.error_message.clone_from(&observed.error_message);
    }
}
