//! Retry policy for single host invocations
//!
//! Only `Transient` failures are retried, with exponential backoff:
//! attempt n waits `min(base_delay * 2^(n-1), max_delay)` before the next try.
//! The policy wraps one invocation at a time, never a whole transform.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::config::RetryConfig;
use crate::error::BridgeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no backoff
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// Delay after failed attempt `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let multiplier = 2u32.saturating_pow(attempt - 1);
        std::cmp::min(self.base_delay.saturating_mul(multiplier), self.max_delay)
    }

    /// Every delay the policy can wait, in order
    pub fn delays(&self) -> Vec<Duration> {
        (1..self.max_attempts).map(|n| self.delay_for(n)).collect()
    }

    /// Run `attempt` until it succeeds, fails non-transiently, or attempts run out
    pub async fn run<T, F, Fut>(&self, name: &str, mut attempt: F) -> Result<T, BridgeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BridgeError>>,
    {
        let mut tries = 0;
        loop {
            tries += 1;
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(err) if err.kind.is_retryable() && tries < self.max_attempts => {
                    let delay = self.delay_for(tries);
                    warn!(
                        "🔄 {} failed (attempt {}/{}), retrying in {:?}: {}",
                        name, tries, self.max_attempts, delay, err.message
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
