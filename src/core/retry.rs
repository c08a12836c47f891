//! Bounded retry with backoff for provider calls.
//!
//! Attempts are counted from 1 and never exceed `MAX_ATTEMPTS_CEILING`,
//! whatever the configuration asks for. Only errors that
//! `ProviderError::is_retryable` accepts are retried; anything else fails on
//! the spot.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::cancel::CancellationToken;
use super::errors::ProviderError;

/// Hard upper bound on attempts per provider call.
pub const MAX_ATTEMPTS_CEILING: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    Fixed,
    #[default]
    Exponential,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
    base_delay: Duration,
    max_delay: Duration,
    jitter: bool,
}

#[derive(Debug, Error)]
pub enum RetryError {
    #[error("failed after {attempts} attempt(s): {source}")]
    Failed {
        attempts: u32,
        #[source]
        source: ProviderError,
    },
    #[error("cancelled")]
    Cancelled,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Backoff::Exponential, Duration::from_millis(500), Duration::from_secs(8))
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.clamp(1, MAX_ATTEMPTS_CEILING),
            backoff,
            base_delay,
            max_delay: max_delay.max(base_delay),
            jitter: false,
        }
    }

    /// Single attempt, no waiting.
    pub fn no_retry() -> Self {
        Self::new(1, Backoff::Fixed, Duration::ZERO, Duration::ZERO)
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let delay = match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Exponential => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                self.base_delay.saturating_mul(factor)
            }
        };
        delay.min(self.max_delay)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let spread = (delay.as_millis() as u64 / 4).max(1);
        let extra = rand::rng().random_range(0..=spread);
        (delay + Duration::from_millis(extra)).min(self.max_delay)
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, runs out
    /// of attempts, or `cancel` fires. `op` receives the attempt number.
    pub async fn run<T, F, Fut>(
        &self,
        label: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                result = op(attempt) => result,
            };

            match result {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!("{} succeeded on attempt {}", label, attempt);
                    }
                    return Ok(value);
                }
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.jittered(self.delay_after(attempt));
                    tracing::warn!(
                        "{} retryable error (attempt {}/{}), retrying in {:?}: {}",
                        label,
                        attempt,
                        self.max_attempts,
                        delay,
                        err
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(err) => {
                    return Err(RetryError::Failed {
                        attempts: attempt,
                        source: err,
                    });
                }
            }
        }
    }
}
