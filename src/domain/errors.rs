//! Error taxonomy shared across the monitor
//!
//! `MonitorError` is the only error type that crosses the engine boundary.
//! Subsystems keep their own detailed errors (`FetchError`, `ExtractionError`)
//! and convert at the seam.

use std::time::Duration;

use thiserror::Error;

use crate::infrastructure::extraction::ExtractionError;
use crate::infrastructure::http_fetcher::FetchError;

pub type MonitorResult<T> = Result<T, MonitorError>;

#[derive(Error, Debug)]
pub enum MonitorError {
    /// Bad rule fields; the requested mutation is not applied
    #[error("validation failed: {0}")]
    Validation(String),

    /// Duplicate id or a task that is already running
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transport error: {0}")]
    Transport(#[from] FetchError),

    #[error("extraction error: {0}")]
    Extraction(ExtractionError),

    #[error("extraction timed out after {0:?}")]
    Timeout(Duration),

    #[error("persistence error: {0:#}")]
    Persistence(#[source] anyhow::Error),
}

impl MonitorError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn persistence(err: anyhow::Error) -> Self {
        Self::Persistence(err)
    }

    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<ExtractionError> for MonitorError {
    fn from(err: ExtractionError) -> Self {
        match err {
            ExtractionError::Timeout(limit) => Self::Timeout(limit),
            other => Self::Extraction(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extraction_timeout_maps_to_timeout_kind() {
        let err: MonitorError = ExtractionError::Timeout(Duration::from_secs(5)).into();
        assert!(matches!(err, MonitorError::Timeout(d) if d == Duration::from_secs(5)));

        let err: MonitorError = ExtractionError::InvalidJson("eof".to_string()).into();
        assert!(matches!(err, MonitorError::Extraction(_)));
    }

    #[test]
    fn test_persistence_error_keeps_context_chain() {
        let inner = anyhow::anyhow!("disk full").context("Failed to write rules file");
        let err = MonitorError::persistence(inner);
        let rendered = err.to_string();
        assert!(rendered.contains("Failed to write rules file"));
        assert!(rendered.contains("disk full"));
    }
}
