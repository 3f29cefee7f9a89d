//! Reconnection backoff

use std::time::Duration;

use crate::config::ChannelConfig;

/// Exponential backoff with a hard attempt cap.
///
/// Attempt `k` (1-indexed) waits `base_delay * 2^(k-1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_attempts: u32,
}

impl BackoffPolicy {
    pub fn new(base_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_attempts,
        }
    }

    /// Delay before attempt `attempt`, or `None` outside `1..=max_attempts`.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let multiplier = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        Some(self.base_delay.saturating_mul(multiplier))
    }

    /// Whether another attempt may follow `attempt` completed ones.
    pub fn allows(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Every delay the policy will ever produce, in order.
    pub fn schedule(&self) -> Vec<Duration> {
        (1..=self.max_attempts).filter_map(|k| self.delay(k)).collect()
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from(&ChannelConfig::default())
    }
}

impl From<&ChannelConfig> for BackoffPolicy {
    fn from(config: &ChannelConfig) -> Self {
        Self::new(config.base_delay, config.max_attempts)
    }
}
