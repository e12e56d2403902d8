use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::backoff::RetryPolicy;
use crate::config::FetchCfg;

#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("nothing at {0}")]
    NotFound(String),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::Transport(_) => true,
            Self::Status(code) => *code == 429 || *code >= 500,
            Self::NotFound(_) => false,
        }
    }
}

/// Source of image bytes by URL.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
    fn name(&self) -> &'static str;
}

pub struct HttpFetcher {
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(cfg: &FetchCfg) -> Result<Self, FetchError> {
        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs.max(1)))
            .connect_timeout(Duration::from_secs(cfg.timeout_secs.clamp(1, 10)));
        if let Some(ua) = &cfg.user_agent {
            builder = builder.user_agent(ua.clone());
        }
        let client = builder.build().map_err(|e| FetchError::Transport(e.to_string()))?;
        Ok(Self { client, retry: RetryPolicy::from(cfg) })
    }

    async fn get_once(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let resp = self.client.get(url).send().await.map_err(classify)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let body = resp.bytes().await.map_err(classify)?;
        Ok(body.to_vec())
    }
}

fn classify(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else if let Some(status) = e.status() {
        FetchError::Status(status.as_u16())
    } else {
        FetchError::Transport(e.to_string())
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let mut attempt = 1;
        loop {
            match self.get_once(url).await {
                Ok(bytes) => {
                    debug!(url, bytes = bytes.len(), attempt, "fetched image");
                    return Ok(bytes);
                }
                Err(e) if e.is_retryable() && attempt < self.retry.attempts => {
                    let delay = self.retry.delay(attempt);
                    warn!(url, attempt, error = %e, ?delay, "fetch failed, retrying");
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// In-memory fetcher serving canned responses.
#[derive(Default)]
pub struct MockFetcher {
    responses: Mutex<HashMap<String, Result<Vec<u8>, FetchError>>>,
    hits: Mutex<HashMap<String, usize>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, url: impl Into<String>, bytes: Vec<u8>) -> &Self {
        self.responses.lock().insert(url.into(), Ok(bytes));
        self
    }

    pub fn fail(&self, url: impl Into<String>, err: FetchError) -> &Self {
        self.responses.lock().insert(url.into(), Err(err));
        self
    }

    pub fn hits(&self, url: &str) -> usize {
        self.hits.lock().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        *self.hits.lock().entry(url.to_string()).or_default() += 1;
        self.responses
            .lock()
            .get(url)
            .cloned()
            .unwrap_or_else(|| Err(FetchError::NotFound(url.to_string())))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_serves_and_counts() {
        let m = MockFetcher::new();
        m.serve("https://a/x", vec![1, 2, 3]).fail("https://a/y", FetchError::Status(503));
        assert_eq!(m.fetch("https://a/x").await.unwrap(), vec![1, 2, 3]);
        assert!(matches!(m.fetch("https://a/y").await, Err(FetchError::Status(503))));
        assert!(matches!(m.fetch("https://a/z").await, Err(FetchError::NotFound(_))));
        assert_eq!(m.hits("https://a/x"), 1);
        assert_eq!(m.hits("https://a/q"), 0);
    }

    #[test]
    fn retryable_statuses() {
        assert!(FetchError::Status(503).is_retryable());
        assert!(FetchError::Status(429).is_retryable());
        assert!(!FetchError::Status(404).is_retryable());
        assert!(FetchError::Timeout.is_retryable());
    }
}
