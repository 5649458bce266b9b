//! Sending one prepared request with bounded retries.

use crate::record::Outcome;
use model::{ChatRequest, ChatResponse, ModelError, ModelProvider, ModelResult, StreamAggregator};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Process-wide count of dispatch attempts, retries included.
#[derive(Debug, Default)]
pub struct AttemptCounter(AtomicU64);

impl AttemptCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(0, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub timeout: Duration,
    pub backoff_unit: Duration,
    pub backoff_cap: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout: Duration::from_secs(600),
            backoff_unit: Duration::from_secs(1),
            backoff_cap: 32,
        }
    }
}

impl RetryPolicy {
    /// Sleep after the failed attempt `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt).min(self.backoff_cap);
        self.backoff_unit.saturating_mul(factor)
    }
}

pub struct Dispatcher {
    provider: Arc<dyn ModelProvider>,
    policy: RetryPolicy,
    attempts: Arc<AttemptCounter>,
}

impl Dispatcher {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        policy: RetryPolicy,
        attempts: Arc<AttemptCounter>,
    ) -> Self {
        Self {
            provider,
            policy,
            attempts,
        }
    }

    pub fn attempts(&self) -> &Arc<AttemptCounter> {
        &self.attempts
    }

    /// Dispatch `request` until it succeeds or attempts run out. Errors never
    /// escape; the last one is captured in a failed outcome.
    pub async fn send(&self, request: &ChatRequest) -> Outcome {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 0..max_attempts {
            self.attempts.increment();

            match self.attempt(request).await {
                Ok(response) => {
                    debug!(attempt = attempt + 1, "Request succeeded");
                    return Outcome::success(response);
                }
                Err(e) if attempt + 1 < max_attempts => {
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max_attempts,
                        error = %e,
                        "Request failed, retrying in {:?}",
                        delay
                    );
                    last_error = Some(e);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(max_attempts, error = %e, "Request failed after all attempts");
                    last_error = Some(e);
                }
            }
        }

        Outcome::failure(
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempt was made".to_string()),
        )
    }

    async fn attempt(&self, request: &ChatRequest) -> ModelResult<ChatResponse> {
        let call = async {
            if request.is_streaming() {
                let stream = self.provider.chat_stream(request).await?;
                StreamAggregator::collect(stream, &request.model).await
            } else {
                self.provider.chat(request).await
            }
        };
        tokio::time::timeout(self.policy.timeout, call)
            .await
            .map_err(|_| ModelError::Timeout)?
    }
}
