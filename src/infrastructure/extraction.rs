//! Content extraction strategies
//!
//! Turns a raw response body into the comparable string a rule watches.
//! The set of strategies is closed: CSS selector, regex and JSON path.

pub mod css_extractor;
pub mod json_extractor;
pub mod regex_extractor;

use std::time::Duration;

use thiserror::Error;

use crate::domain::rule::ExtractorKind;

pub use css_extractor::CssExtractor;
pub use json_extractor::JsonExtractor;
pub use regex_extractor::RegexExtractor;

/// Default bound on a single regex extraction
pub const DEFAULT_REGEX_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("no match for '{expression}'")]
    NoMatch { expression: String },

    #[error("matched elements have no text content for '{selector}'")]
    EmptyText { selector: String },

    #[error("invalid CSS selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("invalid regular expression: {0}")]
    InvalidPattern(String),

    #[error("invalid JSON document: {0}")]
    InvalidJson(String),

    #[error("JSON path not found: {0}")]
    PathNotFound(String),

    #[error("invalid JSON path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("regex matching timed out after {0:?} (possible catastrophic pattern)")]
    Timeout(Duration),

    #[error("unsupported extractor type: {0}")]
    UnsupportedKind(String),

    #[error("extraction aborted: {0}")]
    Internal(String),
}

/// A constructed extractor, ready to run against response bodies
#[derive(Debug, Clone)]
pub enum ContentExtractor {
    Css(CssExtractor),
    Regex(RegexExtractor),
    Json(JsonExtractor),
}

impl ContentExtractor {
    pub const fn kind(&self) -> ExtractorKind {
        match self {
            Self::Css(_) => ExtractorKind::Css,
            Self::Regex(_) => ExtractorKind::Regex,
            Self::Json(_) => ExtractorKind::Json,
        }
    }

    pub async fn extract(&self, body: &[u8], content_type: &str) -> Result<String, ExtractionError> {
        match self {
            Self::Css(extractor) => extractor.extract(body, content_type),
            Self::Regex(extractor) => extractor.extract(body, content_type).await,
            Self::Json(extractor) => extractor.extract(body, content_type),
        }
    }
}

/// Builds extractors from a rule's extractor type and expression
#[derive(Debug, Clone)]
pub struct ExtractorFactory {
    regex_timeout: Duration,
}

impl Default for ExtractorFactory {
    fn default() -> Self {
        Self::new(DEFAULT_REGEX_TIMEOUT)
    }
}

impl ExtractorFactory {
    pub const fn new(regex_timeout: Duration) -> Self {
        Self { regex_timeout }
    }

    pub fn create(&self, kind: &str, expression: &str) -> Result<ContentExtractor, ExtractionError> {
        let kind: ExtractorKind = kind
            .parse()
            .map_err(|_| ExtractionError::UnsupportedKind(kind.to_string()))?;
        self.create_kind(kind, expression)
    }

    pub fn create_kind(
        &self,
        kind: ExtractorKind,
        expression: &str,
    ) -> Result<ContentExtractor, ExtractionError> {
        Ok(match kind {
            ExtractorKind::Css => ContentExtractor::Css(CssExtractor::new(expression)?),
            ExtractorKind::Regex => {
                ContentExtractor::Regex(RegexExtractor::with_timeout(expression, self.regex_timeout)?)
            }
            ExtractorKind::Json => ContentExtractor::Json(JsonExtractor::new(expression)?),
        })
    }
}
