//! Retry policy: decides backoff delays.

use std::time::Duration;

use serde::{Deserialize, Serialize};

const MAX_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Backoff between attempts of a failed task.
///
/// delay = base_delay * multiplier^(retry - 1). A zero `base_delay` requeues
/// immediately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    #[serde(with = "crate::config::duration_secs")]
    pub base_delay: Duration,

    pub multiplier: f64,
}

impl RetryPolicy {
    pub fn immediate() -> Self {
        Self {
            base_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Delay before retry number `retry` (1-indexed).
    pub fn next_delay(&self, retry: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let base_secs = self.base_delay.as_secs_f64();
        let delay_secs = base_secs * self.multiplier.powi(retry.saturating_sub(1) as i32);
        Duration::try_from_secs_f64(delay_secs)
            .unwrap_or(MAX_DELAY)
            .min(MAX_DELAY)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}
