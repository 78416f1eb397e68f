//! Regular expression extraction with a bounded match time

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tokio::time::timeout;
use tracing::warn;

use super::{ExtractionError, DEFAULT_REGEX_TIMEOUT};

/// Collects every non-overlapping match (capture group 1 when the pattern has
/// groups), one per line.
#[derive(Debug, Clone)]
pub struct RegexExtractor {
    pattern: Arc<Regex>,
    timeout: Duration,
}

impl RegexExtractor {
    pub fn new(pattern: &str) -> Result<Self, ExtractionError> {
        Self::with_timeout(pattern, DEFAULT_REGEX_TIMEOUT)
    }

    pub fn with_timeout(pattern: &str, limit: Duration) -> Result<Self, ExtractionError> {
        let compiled = Regex::new(pattern).map_err(|e| ExtractionError::InvalidPattern(e.to_string()))?;
        Ok(Self {
            pattern: Arc::new(compiled),
            timeout: limit,
        })
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub async fn extract(&self, body: &[u8], _content_type: &str) -> Result<String, ExtractionError> {
        let pattern = Arc::clone(&self.pattern);
        let text = String::from_utf8_lossy(body).into_owned();

        let matching = tokio::task::spawn_blocking(move || collect_matches(&pattern, &text));

        match timeout(self.timeout, matching).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(ExtractionError::Internal(join_error.to_string())),
            Err(_) => {
                warn!(pattern = %self.pattern, limit = ?self.timeout, "⏱️ Regex matching timed out");
                Err(ExtractionError::Timeout(self.timeout))
            }
        }
    }
}

fn collect_matches(pattern: &Regex, text: &str) -> Result<String, ExtractionError> {
    let has_group = pattern.captures_len() > 1;
    let results: Vec<&str> = pattern
        .captures_iter(text)
        .map(|caps| {
            let group = if has_group { caps.get(1) } else { caps.get(0) };
            group.map_or("", |m| m.as_str())
        })
        .collect();

    if results.is_empty() {
        return Err(ExtractionError::NoMatch {
            expression: pattern.as_str().to_string(),
        });
    }
    Ok(results.join("\n"))
}
