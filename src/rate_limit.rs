use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use rand::Rng;

use crate::config::RetryConfig;
use crate::error::{HistoryError, RetryClass};

/// Token bucket plus retry policy for one provider identity.
///
/// Every outbound call goes through [`ProviderLimiter::call`]: a token is acquired, the call
/// runs under the provider's deadline, and 429/5xx/transport failures are retried with
/// exponential backoff and jitter.
#[derive(Debug)]
pub struct ProviderLimiter {
    provider: String,
    bucket: DefaultDirectRateLimiter,
    retry: RetryConfig,
    timeout: Duration,
}

impl ProviderLimiter {
    pub fn new(
        provider: impl Into<String>,
        requests_per_second: u32,
        burst: u32,
        timeout_ms: u64,
        retry: RetryConfig,
    ) -> Arc<Self> {
        let provider = provider.into();
        let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN))
            .allow_burst(NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN));

        tracing::debug!(
            provider = %provider,
            requests_per_second,
            burst,
            timeout_ms,
            "Initialized provider rate limiter"
        );

        Arc::new(Self {
            provider,
            bucket: RateLimiter::direct(quota),
            retry,
            timeout: Duration::from_millis(timeout_ms),
        })
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Suspend until the bucket grants a token.
    pub async fn acquire(&self) {
        self.bucket.until_ready().await;
    }

    pub async fn call<F, Fut, T>(&self, method: &str, mut f: F) -> Result<T, HistoryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, HistoryError>>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            self.acquire().await;

            let outcome = match tokio::time::timeout(self.timeout, f()).await {
                Ok(result) => result,
                Err(_) => Err(HistoryError::Timeout {
                    provider: self.provider.clone(),
                    timeout_ms: self.timeout.as_millis() as u64,
                }),
            };

            let err = match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(
                            provider = %self.provider,
                            method,
                            attempt,
                            "Call succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            let class = err.retry_class();
            if class == RetryClass::Fatal {
                tracing::debug!(provider = %self.provider, method, error = %err, "Non-retryable failure");
                return Err(err);
            }
            if attempt >= max_attempts {
                tracing::warn!(
                    provider = %self.provider,
                    method,
                    attempts = attempt,
                    error = %err,
                    "Retries exhausted"
                );
                return Err(err.exhausted(attempt));
            }

            let delay = self.backoff(attempt, class);
            tracing::warn!(
                provider = %self.provider,
                method,
                attempt,
                max_attempts,
                error = %err,
                delay_ms = delay.as_millis() as u64,
                "Call failed, retrying..."
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Exponential backoff from the initial delay, doubled again for rate limits, plus jitter.
    fn backoff(&self, attempt: u32, class: RetryClass) -> Duration {
        let exp = self
            .retry
            .initial_backoff_ms
            .saturating_mul(1u64 << (attempt - 1).min(16));
        let base = match class {
            RetryClass::RateLimit => exp.saturating_mul(2),
            _ => exp,
        };
        let jitter = if self.retry.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.retry.jitter_ms)
        } else {
            0
        };
        Duration::from_millis(base.min(self.retry.max_backoff_ms) + jitter)
    }
}
