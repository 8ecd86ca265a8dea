//! Fetching source pages and feeds over HTTP, or from disk for `file://` urls.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;
use tracing::{info_span, warn, Instrument};

/// Throttling and server-side failures are worth another attempt.
pub fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

/// Timeouts and connection failures are worth another attempt; malformed
/// responses and redirect loops are not.
pub fn is_transient_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

/// How often, and how patiently, a failed feed fetch is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySchedule {
    pub retries: u32,
    pub first_delay: Duration,
    pub ceiling: Duration,
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self {
            retries: 3,
            first_delay: Duration::from_millis(500),
            ceiling: Duration::from_secs(8),
        }
    }
}

impl RetrySchedule {
    /// Wait before retry number `retry` (0-based), doubling up to the ceiling.
    pub fn delay_before(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.first_delay.saturating_mul(factor).min(self.ceiling)
    }
}

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub retry: RetrySchedule,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
            retry: RetrySchedule::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed after {attempts} attempt(s): {source}")]
    Request {
        url: String,
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered {status} after {attempts} attempt(s)")]
    HttpStatus {
        url: String,
        status: u16,
        attempts: u32,
    },
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Turns a source url into its text body. The sync pipeline depends only on this.
#[async_trait]
pub trait TextFetcher: Send + Sync {
    async fn fetch_text(&self, source_id: &str, url: &str) -> Result<String, FetchError>;
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    retry: RetrySchedule,
}

/// One failed attempt, and whether the schedule allows another.
enum Attempt {
    Status(StatusCode),
    Transport(reqwest::Error),
}

impl Attempt {
    fn is_transient(&self) -> bool {
        match self {
            Attempt::Status(status) => is_transient_status(*status),
            Attempt::Transport(err) => is_transient_error(err),
        }
    }

    fn into_error(self, url: &str, attempts: u32) -> FetchError {
        match self {
            Attempt::Status(status) => FetchError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
                attempts,
            },
            Attempt::Transport(source) => FetchError::Request {
                url: url.to_string(),
                attempts,
                source,
            },
        }
    }
}

impl HttpFetcher {
    pub fn new(config: FetcherConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = config.user_agent {
            builder = builder.user_agent(user_agent);
        }
        Ok(Self {
            client: builder.build().context("building http client for source fetches")?,
            retry: config.retry,
        })
    }

    async fn attempt(&self, url: &str) -> Result<String, Attempt> {
        let response = self.client.get(url).send().await.map_err(Attempt::Transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(Attempt::Status(status));
        }
        response.text().await.map_err(Attempt::Transport)
    }

    async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        let mut retry = 0u32;
        loop {
            let failure = match self.attempt(url).await {
                Ok(text) => return Ok(text),
                Err(failure) => failure,
            };
            if retry >= self.retry.retries || !failure.is_transient() {
                return Err(failure.into_error(url, retry + 1));
            }
            let delay = self.retry.delay_before(retry);
            match &failure {
                Attempt::Status(status) => warn!(
                    status = status.as_u16(),
                    retry,
                    ?delay,
                    "source answered with an error, retrying"
                ),
                Attempt::Transport(err) => {
                    warn!(error = %err, retry, ?delay, "source unreachable, retrying")
                }
            }
            tokio::time::sleep(delay).await;
            retry += 1;
        }
    }
}

#[async_trait]
impl TextFetcher for HttpFetcher {
    /// `file://` urls are read from disk, which lets a registry point at fixtures.
    async fn fetch_text(&self, source_id: &str, url: &str) -> Result<String, FetchError> {
        let span = info_span!("source_fetch", source_id, url);
        match url.strip_prefix("file://") {
            Some(path) => tokio::fs::read_to_string(path)
                .instrument(span)
                .await
                .map_err(|source| FetchError::Io {
                    path: path.to_string(),
                    source,
                }),
            None => self.get_text(url).instrument(span).await,
        }
    }
}
