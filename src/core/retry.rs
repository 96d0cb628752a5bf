//! Backoff policy for transient remote failures.
//!
//! Status checks against the remote service are retried when the service is
//! temporarily unreachable. Delays grow geometrically up to a cap.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How to retry a remote call that failed with a transient error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Maximum number of retries, not including the initial attempt (0 = no retries).
    /// For example, `max_attempts = 3` means up to 3 retries after the initial failure,
    /// for a total of 4 attempts.
    pub max_attempts: u32,

    /// Delay before the first retry.
    #[serde(with = "serde_millis")]
    pub initial_delay: Duration,

    /// Upper bound for any single delay.
    #[serde(with = "serde_millis")]
    pub max_delay: Duration,

    /// Factor applied to the delay after each retry.
    pub multiplier: f64,
}

impl BackoffPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Retry with a constant delay.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
        }
    }

    /// Retry with a delay doubling from `initial_delay` up to `max_delay`.
    pub fn exponential(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay,
            multiplier: 2.0,
        }
    }

    /// Check if retries are enabled.
    pub fn is_enabled(&self) -> bool {
        self.max_attempts > 0
    }

    /// Check if we should retry given the number of attempts already made.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts <= self.max_attempts
    }

    /// Delay before retry number `retry` (1-indexed).
    pub fn delay_for(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let factor = self.multiplier.max(1.0).powi(retry.saturating_sub(1) as i32);
        let millis = (self.initial_delay.as_millis() as f64 * factor).round();
        let cap = self.max_delay.max(self.initial_delay);
        Duration::from_millis(millis as u64).min(cap)
    }
}

impl Default for BackoffPolicy {
    /// Five retries, 500ms doubling up to 30s.
    fn default() -> Self {
        Self::exponential(5, Duration::from_millis(500), Duration::from_secs(30))
    }
}

/// Serializes Duration as milliseconds (matching the YAML settings format).
mod serde_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
