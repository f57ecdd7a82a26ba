/*!
 * Retry backoff policy
 */

use std::time::Duration;

use rand::Rng;

use crate::config::OrchestratorConfig;

/// Exponential backoff with random jitter and a hard ceiling
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    base: Duration,
    max: Duration,
    jitter_ms: u64,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration, jitter_ms: u64) -> Self {
        Self {
            base,
            max,
            jitter_ms,
        }
    }

    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self::new(
            Duration::from_secs(config.retry_base_secs),
            Duration::from_secs(config.retry_max_secs),
            config.retry_jitter_ms,
        )
    }

    /// Delay before the attempt following `retry_count` prior failures:
    /// `base * 2^retry_count` plus jitter, with the ceiling applied to the
    /// final delay so jitter can never push past it.
    pub fn delay(&self, retry_count: u32) -> Duration {
        let factor = 2u32.checked_pow(retry_count).unwrap_or(u32::MAX);
        let scaled = self.base.checked_mul(factor).unwrap_or(self.max);

        let jitter = if self.jitter_ms > 0 {
            Duration::from_millis(rand::rng().random_range(0..=self.jitter_ms))
        } else {
            Duration::ZERO
        };
        (scaled + jitter).min(self.max)
    }
}
