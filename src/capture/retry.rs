use std::time::Duration;

use rand::Rng as _;

use crate::foundation::error::{DatelapseError, DatelapseResult};

/// Retry schedule for transient capture failures.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts per date, including the first.
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    /// Upper bound of the uniform jitter added to each delay.
    pub backoff_jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 400,
            backoff_jitter_ms: 200,
        }
    }
}

impl RetryPolicy {
    pub fn validate(&self) -> DatelapseResult<()> {
        if self.max_attempts == 0 {
            return Err(DatelapseError::config("retry.max_attempts must be at least 1"));
        }
        Ok(())
    }

    /// Deterministic part of the delay after the `failed_attempt`-th attempt (0-based):
    /// `backoff_base_ms * 2^failed_attempt`.
    pub fn base_delay(&self, failed_attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(failed_attempt).unwrap_or(u64::MAX);
        Duration::from_millis(self.backoff_base_ms.saturating_mul(factor))
    }

    /// Delay before retrying after the `failed_attempt`-th attempt (0-based).
    ///
    /// Jitter is drawn from `[0, backoff_jitter_ms]` but never exceeds the base delay itself, which
    /// keeps successive delays non-decreasing.
    pub fn delay_for(&self, failed_attempt: u32) -> Duration {
        let base = self.base_delay(failed_attempt);
        let cap = self.backoff_jitter_ms.min(base.as_millis() as u64);
        let jitter = if cap == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=cap)
        };
        base + Duration::from_millis(jitter)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/capture/retry.rs"]
mod tests;
