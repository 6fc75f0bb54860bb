use std::num::NonZeroU32;
use std::sync::Arc;

use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};

use crate::foundation::error::{DatelapseError, DatelapseResult};

/// Politeness limiter shared by every worker of one capture job.
///
/// Keyed by host, so the configured rate is an aggregate ceiling per host rather than per worker.
/// Cloning shares the same token state.
#[derive(Debug, Clone)]
pub struct HostRateLimiter {
    inner: Arc<DefaultKeyedRateLimiter<String>>,
    rps: NonZeroU32,
}

impl HostRateLimiter {
    pub fn new(requests_per_second: u32) -> DatelapseResult<Self> {
        let rps = NonZeroU32::new(requests_per_second).ok_or_else(|| {
            DatelapseError::config("requests per second must be at least 1")
        })?;
        let quota = Quota::per_second(rps).allow_burst(NonZeroU32::MIN);
        Ok(Self {
            inner: Arc::new(RateLimiter::keyed(quota)),
            rps,
        })
    }

    pub fn requests_per_second(&self) -> u32 {
        self.rps.get()
    }

    /// Handle drawing from the token bucket of `host`.
    pub fn throttle(&self, host: &str) -> HostThrottle {
        HostThrottle {
            limiter: Arc::clone(&self.inner),
            host: host.to_ascii_lowercase(),
        }
    }
}

/// Per-host view of a [`HostRateLimiter`], handed to each worker.
#[derive(Debug, Clone)]
pub struct HostThrottle {
    limiter: Arc<DefaultKeyedRateLimiter<String>>,
    host: String,
}

impl HostThrottle {
    /// Wait until the host's bucket has a token, then consume it.
    pub async fn acquire(&self) {
        self.limiter.until_key_ready(&self.host).await;
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}

#[cfg(test)]
#[path = "../../tests/unit/capture/limiter.rs"]
mod tests;
