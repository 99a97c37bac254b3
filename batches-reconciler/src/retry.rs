//! Bounded retry with exponential backoff for errored changesets.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How often, and how far apart, failed attempts are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts after which an errored changeset stays errored.
    pub max_attempts: u32,
    pub min_backoff_secs: u64,
    pub max_backoff_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            min_backoff_secs: 10,
            max_backoff_secs: 300,
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after the `failures`-th failure (1-based).
    #[must_use]
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(32);
        let secs = self
            .min_backoff_secs
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_secs);
        Duration::from_secs(secs)
    }

    #[must_use]
    pub const fn should_retry(&self, failures: u32) -> bool {
        failures < self.max_attempts
    }
}
