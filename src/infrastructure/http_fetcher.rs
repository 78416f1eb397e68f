//! HTTP fetcher for monitor checks
//!
//! One request per call with retry + exponential backoff, a redirect cap,
//! a response size cap and a per-attempt timeout covering the whole round trip.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, ClientBuilder};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::domain::rule::HttpMethod;
use crate::infrastructure::config::FetcherSettings;

/// Outgoing request description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub method: HttpMethod,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: HttpMethod::Get,
            headers: HashMap::new(),
            body: String::new(),
        }
    }
}

/// Successful response
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub body: Vec<u8>,
    pub content_type: String,
    pub status: u16,
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("HTTP request failed: {0}")]
    Transport(String),

    #[error("HTTP error {status} for {url}")]
    HttpStatus { status: u16, url: String },

    #[error("response body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("request failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<FetchError>,
    },
}

impl FetchError {
    /// The failure of the final attempt, looking through `RetriesExhausted`
    pub fn last_failure(&self) -> &Self {
        match self {
            Self::RetriesExhausted { source, .. } => source.last_failure(),
            other => other,
        }
    }
}

/// Transport abstraction used by monitor tasks
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError>;
}

/// Configuration for fetcher behavior
#[derive(Debug, Clone)]
pub struct HttpFetcherConfig {
    /// Timeout for one attempt (connect + transfer)
    pub timeout: Duration,
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for each further attempt
    pub base_backoff: Duration,
    /// Redirect hops followed before the attempt fails
    pub max_redirects: usize,
    /// Largest accepted response body
    pub max_body_bytes: usize,
    /// Default `User-Agent`; rule headers may override it
    pub user_agent: String,
}

impl HttpFetcherConfig {
    /// Create HttpFetcherConfig from the application settings
    pub fn from_settings(settings: &FetcherSettings) -> Self {
        Self {
            timeout: Duration::from_secs(settings.request_timeout_seconds),
            max_attempts: settings.max_attempts,
            base_backoff: Duration::from_millis(settings.base_backoff_ms),
            max_redirects: settings.max_redirects,
            max_body_bytes: settings.max_body_bytes,
            user_agent: settings.user_agent.clone(),
        }
    }
}

impl Default for HttpFetcherConfig {
    fn default() -> Self {
        Self::from_settings(&FetcherSettings::default())
    }
}

/// reqwest-backed [`Fetcher`]
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    config: HttpFetcherConfig,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        Self::with_config(HttpFetcherConfig::default())
    }

    /// Create a new fetcher with custom configuration
    pub fn with_config(config: HttpFetcherConfig) -> Result<Self, FetchError> {
        let client = ClientBuilder::new()
            .timeout(config.timeout)
            .gzip(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| FetchError::Transport(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    pub const fn config(&self) -> &HttpFetcherConfig {
        &self.config
    }

    /// Backoff before `attempt` (1-based); zero before the first attempt
    fn backoff_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        self.config.base_backoff.saturating_mul(2_u32.saturating_pow(attempt - 2))
    }

    fn build_headers(&self, request: &FetchRequest) -> Result<HeaderMap, FetchError> {
        let mut headers = HeaderMap::new();
        let agent = HeaderValue::from_str(&self.config.user_agent)
            .map_err(|e| FetchError::InvalidRequest(format!("invalid user agent: {e}")))?;
        headers.insert(USER_AGENT, agent);

        for (key, value) in &request.headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| FetchError::InvalidRequest(format!("invalid header name '{key}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| FetchError::InvalidRequest(format!("invalid value for header '{key}': {e}")))?;
            // caller headers replace defaults, including User-Agent
            headers.insert(name, value);
        }
        Ok(headers)
    }

    /// Single attempt
    async fn fetch_once(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        let headers = self.build_headers(request)?;
        let mut builder = self
            .client
            .request(request.method.into(), &request.url)
            .headers(headers);
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let mut response = builder.send().await.map_err(|e| {
            if e.is_redirect() {
                FetchError::Transport(format!("too many redirects (limit {}): {e}", self.config.max_redirects))
            } else {
                FetchError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: request.url.clone(),
            });
        }

        let limit = self.config.max_body_bytes;
        let declared_len = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        if declared_len.is_some_and(|len| len > limit as u64) {
            return Err(FetchError::BodyTooLarge { limit });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| FetchError::Transport(format!("failed to read response body: {e}")))?
        {
            if body.len() + chunk.len() > limit {
                return Err(FetchError::BodyTooLarge { limit });
            }
            body.extend_from_slice(&chunk);
        }

        Ok(FetchResponse {
            body,
            content_type,
            status: status.as_u16(),
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        debug!(url = %request.url, method = %request.method, "🌐 Fetching");

        let attempts = self.config.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            let delay = self.backoff_before(attempt);
            if !delay.is_zero() {
                sleep(delay).await;
            }

            match self.fetch_once(request).await {
                Ok(response) => {
                    if attempt > 1 {
                        info!(url = %request.url, attempt, "✅ Request succeeded after retry");
                    }
                    return Ok(response);
                }
                Err(FetchError::InvalidRequest(message)) => {
                    // retrying cannot fix a malformed request
                    return Err(FetchError::InvalidRequest(message));
                }
                Err(e) => {
                    warn!(url = %request.url, attempt, max_attempts = attempts, error = %e, "⚠️ Fetch attempt failed");
                    last_error = Some(e);
                }
            }
        }

        Err(FetchError::RetriesExhausted {
            attempts,
            source: Box::new(
                last_error.unwrap_or_else(|| FetchError::Transport(format!("unknown error for {}", request.url))),
            ),
        })
    }
}
