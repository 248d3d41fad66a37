//! Exponential backoff for transient mailbox failures.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ConfigError, ExecutionError, MailboxError};

/// Upper bound on a server-provided `Retry-After` hint.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(120);

/// Backoff parameters for mailbox mutations.
///
/// Delay before attempt `n + 1` is `base * 2^(n - 1)`, capped at `max_delay`,
/// raised to any server-provided `Retry-After` (itself capped at
/// [`MAX_RETRY_AFTER`]), plus up to `jitter` × delay of random slack.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction in [0, 1].
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 0.0,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "TRIAGE_RETRY_MAX_ATTEMPTS".into(),
                message: "must be at least 1".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ConfigError::InvalidValue {
                key: "TRIAGE_RETRY_JITTER".into(),
                message: format!("{} is outside [0, 1]", self.jitter),
            });
        }
        if self.base_delay > self.max_delay {
            return Err(ConfigError::InvalidValue {
                key: "TRIAGE_RETRY_BASE_MS".into(),
                message: "base delay exceeds max delay".into(),
            });
        }
        Ok(())
    }

    /// Delay without jitter after `attempts_completed` failed attempts (≥ 1).
    pub fn base_backoff(&self, attempts_completed: u32, retry_after: Option<Duration>) -> Duration {
        let exponent = attempts_completed.saturating_sub(1).min(31);
        let backoff = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);
        match retry_after {
            Some(hint) => backoff.max(hint.min(MAX_RETRY_AFTER)),
            None => backoff,
        }
    }

    fn backoff_with_jitter(&self, attempts_completed: u32, retry_after: Option<Duration>) -> Duration {
        let backoff = self.base_backoff(attempts_completed, retry_after);
        if self.jitter <= 0.0 || backoff.is_zero() {
            return backoff;
        }
        let slack = rand::thread_rng().gen_range(0.0..=self.jitter * backoff.as_secs_f64());
        backoff + Duration::from_secs_f64(slack)
    }

    /// Run `operation` until it succeeds, fails permanently, exhausts the
    /// attempt budget, or `cancel` fires during a backoff wait.
    pub async fn run<F, Fut, T>(
        &self,
        operation_name: &str,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T, ExecutionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, MailboxError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            if attempt > 1 {
                debug!(operation = operation_name, attempt, "Retrying mailbox operation");
            }

            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_transient() {
                return Err(ExecutionError::Permanent(err));
            }
            if attempt >= self.max_attempts {
                warn!(
                    operation = operation_name,
                    attempt,
                    error = %err,
                    "Mailbox operation failed: retries exhausted"
                );
                return Err(ExecutionError::Exhausted {
                    attempts: attempt,
                    last: err,
                });
            }

            let delay = self.backoff_with_jitter(attempt, err.retry_after());
            warn!(
                operation = operation_name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Transient mailbox failure, backing off"
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(ExecutionError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
