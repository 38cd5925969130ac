use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounds for the retry phase of the driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts made after the initial conflict before giving up.
    pub max_retries: u32,
    /// Base delay before a retry in milliseconds; zero disables sleeping.
    pub backoff_base_ms: u64,
    /// Upper bound for the exponential delay in milliseconds.
    pub backoff_cap_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 0,
            backoff_cap_ms: 1_000,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff(mut self, base_ms: u64, cap_ms: u64) -> Self {
        self.backoff_base_ms = base_ms;
        self.backoff_cap_ms = cap_ms;
        self
    }

    /// Delay before retry number `attempt` (1-based), doubling from the base
    pub fn backoff(&self, attempt: u32) -> Option<Duration> {
        if self.backoff_base_ms == 0 {
            return None;
        }
        let cap = self.backoff_cap_ms.max(self.backoff_base_ms);

        let mut backoff = self.backoff_base_ms;
        for _ in 1..attempt {
            backoff = backoff.saturating_mul(2).min(cap);
        }
        Some(Duration::from_millis(backoff))
    }
}
