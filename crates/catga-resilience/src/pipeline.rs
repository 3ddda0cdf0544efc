//! Composes Timeout -> Retry -> Bulkhead -> CircuitBreaker in the
//! fixed order spec §4.F mandates, with independent per-category
//! configuration (spec §4.F "each stage has independent per-category
//! configuration (mediator, transport-publish, transport-send,
//! persistence)").

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use catga_core::ErrorCode;
use tracing::{debug, warn};

use crate::bulkhead::{Bulkhead, BulkheadConfig};
use crate::circuit_breaker::CircuitBreaker;
use crate::retry::{backoff_delay, RetryConfig};

#[derive(Clone)]
pub struct ResilienceConfig {
    pub timeout: Duration,
    pub retry: RetryConfig,
    pub bulkhead: BulkheadConfig,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(30), retry: RetryConfig::default(), bulkhead: BulkheadConfig::default() }
    }
}

/// One instance per category (e.g. "mediator", "transport-publish").
/// Holds its own bulkhead (bounded concurrency) and references a
/// shared named circuit breaker from the registry.
pub struct ResiliencePipeline {
    category: String,
    config: ResilienceConfig,
    bulkhead: Bulkhead,
    breaker: Arc<CircuitBreaker>,
    /// Classifies which `ErrorCode`s the retry stage treats as
    /// transient for this category; defaults to the spec §7 set but
    /// the flow engine passes a narrower one that also allows
    /// `ConcurrencyConflict` (spec §7 "flow engine only").
    is_retryable: fn(ErrorCode) -> bool,
}

impl ResiliencePipeline {
    pub fn new(category: impl Into<String>, config: ResilienceConfig, breaker: Arc<CircuitBreaker>) -> Self {
        let bulkhead = Bulkhead::new(config.bulkhead);
        Self { category: category.into(), config, bulkhead, breaker, is_retryable: crate::retry::is_transient }
    }

    pub fn with_retry_classifier(mut self, classifier: fn(ErrorCode) -> bool) -> Self {
        self.is_retryable = classifier;
        self
    }

    /// Executes `op`, retrying on transient failure inside the bulkhead
    /// and circuit breaker, with the whole attempt sequence bounded by
    /// `self.config.timeout`.
    pub async fn execute<F, Fut, T>(&self, mut op: F) -> Result<T, ErrorCode>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ErrorCode>>,
    {
        let category = self.category.clone();
        let result = tokio::time::timeout(self.config.timeout, async {
            let mut attempt: u32 = 0;
            loop {
                attempt += 1;

                let permit = match self.bulkhead.acquire().await {
                    Ok(p) => p,
                    Err(code) => return Err(code),
                };

                if !self.breaker.allow_request() {
                    drop(permit);
                    return Err(ErrorCode::CircuitOpen);
                }

                let outcome = op().await;
                match &outcome {
                    Ok(_) => self.breaker.record_success(),
                    Err(_) => self.breaker.record_failure(),
                }
                drop(permit);

                match outcome {
                    Ok(value) => return Ok(value),
                    Err(code) if attempt < self.config.retry.max_attempts && (self.is_retryable)(code) => {
                        let delay = backoff_delay(&self.config.retry, attempt);
                        debug!(category = %category, attempt, ?delay, code = %code, "resilience pipeline retrying");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    Err(code) => return Err(code),
                }
            }
        })
        .await;

        match result {
            Ok(inner) => inner,
            Err(_) => {
                warn!(category = %self.category, "resilience pipeline timed out");
                Err(ErrorCode::Timeout)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitBreakerConfig;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let breaker = Arc::new(CircuitBreaker::new("t", CircuitBreakerConfig::default()));
        let pipeline = ResiliencePipeline::new(
            "test",
            ResilienceConfig { retry: RetryConfig { max_attempts: 5, jitter: false, ..RetryConfig::default() }, ..ResilienceConfig::default() },
            breaker,
        );
        let calls = AtomicU32::new(0);
        let result = pipeline
            .execute(|| async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(ErrorCode::TransportFailed)
                } else {
                    Ok(42)
                }
            })
            .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_failure_short_circuits_immediately() {
        let breaker = Arc::new(CircuitBreaker::new("t2", CircuitBreakerConfig::default()));
        let pipeline = ResiliencePipeline::new("test2", ResilienceConfig::default(), breaker);
        let calls = AtomicU32::new(0);
        let result: Result<i32, ErrorCode> = pipeline
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ErrorCode::ValidationFailed)
            })
            .await;
        assert_eq!(result, Err(ErrorCode::ValidationFailed));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn open_breaker_rejects_before_invoking_op() {
        let breaker = Arc::new(CircuitBreaker::new("t3", CircuitBreakerConfig { failure_threshold: 1, ..CircuitBreakerConfig::default() }));
        let pipeline = ResiliencePipeline::new("test3", ResilienceConfig { retry: RetryConfig { max_attempts: 1, ..RetryConfig::default() }, ..ResilienceConfig::default() }, breaker);
        let _: Result<i32, ErrorCode> = pipeline.execute(|| async { Err(ErrorCode::TransportFailed) }).await;
        let calls = AtomicU32::new(0);
        let result: Result<i32, ErrorCode> = pipeline
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            })
            .await;
        assert_eq!(result, Err(ErrorCode::CircuitOpen));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
