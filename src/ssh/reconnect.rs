//! SSH reconnect policy with exponential backoff and jitter.

use rand::Rng;
use std::future::Future;
use std::time::Duration;

use crate::config::ReconnectSettings;
use crate::error::SshError;

/// Policy for exponential backoff reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Total number of attempts, including the first one
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ReconnectSettings::default())
    }
}

impl From<&ReconnectSettings> for ReconnectPolicy {
    fn from(settings: &ReconnectSettings) -> Self {
        Self::new(
            settings.base_delay_ms,
            settings.max_delay_ms,
            settings.max_attempts,
        )
    }
}

impl ReconnectPolicy {
    pub fn new(base_delay_ms: u64, max_delay_ms: u64, max_attempts: u32) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
            max_attempts,
        }
    }

    /// Calculate the backoff delay for a given attempt (0-based) with jitter.
    pub fn delay_with_jitter(&self, attempt: u32) -> Duration {
        let delay_ms = self.raw_delay_ms(attempt);
        let jittered_ms = Self::apply_jitter(delay_ms);
        Duration::from_millis(jittered_ms.min(self.max_delay_ms))
    }

    fn raw_delay_ms(&self, attempt: u32) -> u64 {
        let shift = attempt.min(63);
        let multiplier = 1u64.checked_shl(shift).unwrap_or(u64::MAX);
        let delay = self.base_delay_ms.saturating_mul(multiplier);
        delay.min(self.max_delay_ms)
    }

    fn apply_jitter(delay_ms: u64) -> u64 {
        let mut rng = rand::thread_rng();
        let jitter: f64 = rng.gen_range(0.9..=1.1);
        ((delay_ms as f64) * jitter).round().max(0.0) as u64
    }

    /// Run `attempt` until it succeeds, fails with a non-transient error, or
    /// the attempt budget is spent. Returns the last error.
    pub async fn retry<T, F, Fut>(&self, mut attempt: F) -> Result<T, SshError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, SshError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut n = 0;
        loop {
            match attempt(n).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && n + 1 < attempts => {
                    let delay = self.delay_with_jitter(n);
                    tracing::info!(
                        "Connect attempt {}/{} failed: {}; retrying in {:?}",
                        n + 1,
                        attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    n += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
