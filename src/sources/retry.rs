//! Explicit retry policy for adapter calls
//!
//! Wraps each external call with bounded exponential backoff instead of
//! scattering catch-and-retry loops across call sites. Rate-limit errors
//! back off on the same schedule; permanent errors surface immediately.

use crate::config::RetryConfig;
use crate::errors::{PipelineError, PipelineResult};
use crate::logger::{self, LogTag};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    multiplier: f64,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            multiplier: config.multiplier.max(1.0),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// Backoff delay before attempt `attempt` (1-based), with jitter
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let base = self.base_delay.as_millis() as f64 * exp;
        let capped = base.min(self.max_delay.as_millis() as f64);
        // Up to 20% jitter so synchronized adapters do not retry in lockstep
        let jitter = rand::thread_rng().gen_range(0.0..0.2);
        Duration::from_millis((capped * (1.0 + jitter)) as u64)
    }

    /// Run `operation` up to `max_attempts` times.
    ///
    /// Transient failures (network, rate limit, HTTP 5xx) are retried with
    /// backoff; after the budget is spent the last error surfaces as
    /// `SourceUnavailable`.
    pub async fn run<T, F, Fut>(&self, source: &'static str, mut operation: F) -> PipelineResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = PipelineResult<T>>,
    {
        let mut last_error = String::new();
        for attempt in 1..=self.max_attempts {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if !Self::is_retryable(&err) {
                        return Err(err);
                    }
                    last_error = err.to_string();
                    if attempt < self.max_attempts {
                        let delay = self.delay_for(attempt);
                        logger::debug(
                            LogTag::Source,
                            &format!(
                                "{}: attempt {}/{} failed ({}), retrying in {:?}",
                                source, attempt, self.max_attempts, last_error, delay
                            ),
                        );
                        time::sleep(delay).await;
                    }
                }
            }
        }
        Err(PipelineError::SourceUnavailable {
            source: source.to_string(),
            attempts: self.max_attempts,
            last_error,
        })
    }

    fn is_retryable(err: &PipelineError) -> bool {
        matches!(
            err,
            PipelineError::SourceUnavailable { .. } | PipelineError::RateLimited { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(&RetryConfig {
            max_attempts,
            base_delay_ms: 10,
            multiplier: 2.0,
            max_delay_ms: 50,
        })
    }

    fn transient() -> PipelineError {
        PipelineError::SourceUnavailable {
            source: "stub".to_string(),
            attempts: 1,
            last_error: "connection reset".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let result = policy(3)
            .run("stub", move || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(transient())
                    } else {
                        Ok(42u32)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_surfaces_source_unavailable() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let result: PipelineResult<u32> = policy(3)
            .run("stub", move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(transient())
                }
            })
            .await;
        match result {
            Err(PipelineError::SourceUnavailable { attempts: n, .. }) => assert_eq!(n, 3),
            other => panic!("expected SourceUnavailable, got {:?}", other),
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_are_not_retried() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let result: PipelineResult<u32> = policy(3)
            .run("stub", move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(PipelineError::Database("corrupt".to_string()))
                }
            })
            .await;
        assert!(matches!(result, Err(PipelineError::Database(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
