use async_trait::async_trait;
use foreman_core::{ForemanError, Message, Result};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

use crate::provider::*;

/// Maximum retry attempts for transient errors (429, 500, 502, 503).
const MAX_RETRIES: u32 = 3;
/// Base delay for exponential backoff (doubles each retry).
const BASE_DELAY_MS: u64 = 1000;

/// Wraps a model and retries transient failures with exponential backoff.
pub struct RetryingModel {
    inner: Arc<dyn ModelCapability>,
    max_retries: u32,
    base_delay: Duration,
}

/// Check if an error is transient and worth retrying.
fn is_retryable(err: &ForemanError) -> bool {
    match err {
        ForemanError::RateLimited { .. } => true,
        ForemanError::Model(msg) => {
            msg.starts_with("HTTP 429")
                || msg.starts_with("HTTP 500")
                || msg.starts_with("HTTP 502")
                || msg.starts_with("HTTP 503")
                || msg.contains("timed out")
                || msg.contains("connection reset")
                || msg.contains("connection closed")
                || msg.contains("overloaded")
        }
        _ => false,
    }
}

impl RetryingModel {
    pub fn new(inner: Arc<dyn ModelCapability>) -> Self {
        Self {
            inner,
            max_retries: MAX_RETRIES,
            base_delay: Duration::from_millis(BASE_DELAY_MS),
        }
    }

    pub fn with_backoff(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.base_delay = base_delay;
        self
    }

    async fn with_retry<T, F, Fut>(&self, op: &str, f: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match f().await {
                Err(e) if is_retryable(&e) && attempt < self.max_retries => {
                    let delay = match &e {
                        ForemanError::RateLimited { retry_after_secs } => {
                            Duration::from_secs(*retry_after_secs)
                        }
                        _ => self.base_delay * 2u32.pow(attempt),
                    };
                    warn!(
                        model = self.inner.name(),
                        op,
                        attempt = attempt + 1,
                        max = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying after transient error"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

#[async_trait]
impl ModelCapability for RetryingModel {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn decide(&self, request: &DecisionRequest) -> Result<Message> {
        self.with_retry("decide", || self.inner.decide(request)).await
    }

    async fn extract(&self, request: &ExtractionRequest) -> Result<Vec<Value>> {
        self.with_retry("extract", || self.inner.extract(request)).await
    }

    /// Only the request that opens the stream is retried.
    async fn stream_decide(&self, request: &DecisionRequest) -> Result<mpsc::Receiver<ModelChunk>> {
        self.with_retry("stream_decide", || self.inner.stream_decide(request))
            .await
    }
}
