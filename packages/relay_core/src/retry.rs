//! Bounded retry with backoff, shared by thread provisioning and the
//! update poller.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// Same delay between every attempt.
    Fixed,
    /// delay * 2^attempt, capped at `max_delay`.
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
        }
    }

    pub fn exponential(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
        }
    }

    /// Delay to wait after the zero-based `attempt` failed.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let delay = match self.strategy {
            BackoffStrategy::Fixed => self.initial_delay,
            BackoffStrategy::Exponential => self
                .initial_delay
                .saturating_mul(2u32.saturating_pow(attempt)),
        };
        delay.min(self.max_delay)
    }

    /// Run `operation` until it succeeds or the attempts run out.
    ///
    /// The closure receives the one-based attempt number. On exhaustion the
    /// last error is returned together with the number of attempts made.
    pub async fn run<F, Fut, T, E>(&self, mut operation: F) -> Result<T, (E, u32)>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match operation(attempt + 1).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    attempt += 1;
                    if attempt >= attempts {
                        return Err((err, attempt));
                    }
                    let delay = self.delay_after(attempt - 1);
                    debug!(attempt, ?delay, "attempt failed, retrying: {}", err);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
