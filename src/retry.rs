//! Fetch-with-retry.
//!
//! [`Backoff`] is the pure state machine (attempt count, next delay, give-up
//! decision); [`Retrier`] drives it against a single-shot fetch, sleeping
//! through an injected [`Sleeper`] and checking cancellation between attempts.

use crate::error::FetchError;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Up to this fraction of the computed delay is added as random jitter.
    pub jitter: f64,
    /// Upper bound applied to server "retry after" directives.
    pub max_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: 0.25,
            max_retry_after: Duration::from_secs(300),
        }
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Retry(Duration),
    GiveUp,
}

#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    attempts: u32,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    /// Count a new attempt and return its 1-based number.
    pub fn start_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    /// Delay before the attempt that follows attempt `attempt`, without jitter:
    /// `base * 2^(attempt - 1)`, capped at `max_delay`.
    pub fn computed_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.policy
            .base_delay
            .saturating_mul(1u32 << exp)
            .min(self.policy.max_delay)
    }

    /// Decide the next step after the current attempt failed with `err`.
    /// `jitter_sample` is a uniform sample in `[0, 1)`.
    pub fn on_failure(&self, err: &FetchError, jitter_sample: f64) -> Step {
        if !err.is_retryable() || self.attempts >= self.policy.max_attempts {
            return Step::GiveUp;
        }

        if let Some(retry_after) = err.retry_after() {
            return Step::Retry(retry_after.min(self.policy.max_retry_after));
        }

        let delay = self.computed_delay(self.attempts);
        let jitter = delay.mul_f64(self.policy.jitter.max(0.0) * jitter_sample.clamp(0.0, 1.0));
        Step::Retry(delay + jitter)
    }
}

/// Sleep abstraction so retry timing is testable without real timers.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, delay: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

#[derive(Clone)]
pub struct Retrier {
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl Retrier {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_sleeper(policy, Arc::new(TokioSleeper))
    }

    pub fn with_sleeper(policy: RetryPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
        Self { policy, sleeper }
    }

    /// Run `op` until it succeeds, fails permanently, runs out of attempts or
    /// `cancel` fires. Cancellation is only observed between attempts: the
    /// first attempt always runs, and one already in flight runs to completion.
    pub async fn run<T, F, Fut>(
        &self,
        label: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut backoff = Backoff::new(self.policy.clone());

        loop {
            let attempt = backoff.start_attempt();
            let err = match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!("{} succeeded on attempt {}", label, attempt);
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            match backoff.on_failure(&err, rand::random::<f64>()) {
                Step::Retry(delay) => {
                    if cancel.is_cancelled() {
                        warn!("{} attempt {} failed after cancellation: {}", label, attempt, err);
                        return Err(FetchError::Cancelled);
                    }
                    warn!(
                        "{} attempt {}/{} failed: {}. Retrying in {:?}",
                        label, attempt, self.policy.max_attempts, err, delay
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                        _ = self.sleeper.sleep(delay) => {}
                    }
                }
                Step::GiveUp if err.is_retryable() => {
                    warn!("{} failed after {} attempts: {}", label, attempt, err);
                    return Err(FetchError::Exhausted {
                        attempts: attempt,
                        last: Box::new(err),
                    });
                }
                Step::GiveUp => {
                    warn!("{} failed with a non-retryable error: {}", label, err);
                    return Err(err);
                }
            }
        }
    }
}
