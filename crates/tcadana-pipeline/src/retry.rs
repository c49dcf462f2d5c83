//! Bounded exponential backoff for retryable cache operations.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tcadana_cache::CacheError;

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum retry attempts after the first try
    pub max_retries: u32,
    /// Initial backoff (milliseconds)
    pub initial_backoff_ms: u64,
    /// Maximum backoff (milliseconds)
    pub max_backoff_ms: u64,
    /// Backoff multiplier
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 50,
            max_backoff_ms: 2_000,
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that tries once.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Backoff before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.saturating_sub(1) as i32);
        let ms = (self.initial_backoff_ms as f64 * factor).min(self.max_backoff_ms as f64);
        Duration::from_millis(ms as u64)
    }

    /// Run `op`, retrying while it fails with a retryable error.
    pub fn run<T>(&self, mut op: impl FnMut() -> Result<T, CacheError>) -> Result<T, CacheError> {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let backoff = self.backoff(attempt);
                    log::debug!("Retry attempt {} after {:?}: {}", attempt, backoff, e);
                    std::thread::sleep(backoff);
                }
                Err(e) => return Err(e),
            }
        }
    }
}
