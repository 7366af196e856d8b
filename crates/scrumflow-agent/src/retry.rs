//! Bounded retry and timeout policy around a reasoning service

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::service::{ReasoningRequest, ReasoningResponse, ReasoningService};
use scrumflow_core::config::RetryConfig;
use scrumflow_core::{Result, ScrumError};

const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Per-attempt timeout
    pub timeout: Duration,
    /// First backoff delay, doubled after each retry
    pub initial_backoff: Duration,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            timeout: config.timeout(),
            initial_backoff: config.initial_backoff(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

/// Retries transient failures and timeouts; other errors pass straight through
///
/// Exhausting the retries yields [`ScrumError::ServiceUnavailable`].
pub struct RetryingService {
    inner: Arc<dyn ReasoningService>,
    policy: RetryPolicy,
}

impl RetryingService {
    pub fn new(inner: Arc<dyn ReasoningService>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl ReasoningService for RetryingService {
    async fn invoke(&self, request: &ReasoningRequest) -> Result<ReasoningResponse> {
        let attempts = self.policy.max_retries + 1;
        let mut backoff = self.policy.initial_backoff;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match tokio::time::timeout(self.policy.timeout, self.inner.invoke(request)).await {
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(e)) if e.is_transient() => last_error = e.to_string(),
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    last_error = format!("timed out after {}s", self.policy.timeout.as_secs_f32())
                }
            }

            if attempt < attempts {
                warn!(
                    "Reasoning call for '{}' failed (attempt {}/{}): {}. Retrying in {:?}",
                    request.agent, attempt, attempts, last_error, backoff
                );
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }

        Err(ScrumError::ServiceUnavailable {
            attempts,
            message: last_error,
        })
    }
}
