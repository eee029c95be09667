use std::time::Duration;

use serde::{Deserialize, Serialize};

const DEFAULT_INTERVAL_MS: u64 = 3_000;
const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Delay growth between reconnection attempts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Backoff {
    /// Same interval before every attempt.
    #[default]
    Fixed,
    /// Interval doubles per attempt, capped at `max_delay_ms`.
    Exponential { max_delay_ms: u64 },
}

/// Reconnection budget and delay calculation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReconnectPolicy {
    interval_ms: u64,
    max_attempts: u32,
    backoff: Backoff,
}

impl ReconnectPolicy {
    /// Fixed-interval policy.
    pub fn new(interval_ms: u64, max_attempts: u32) -> Self {
        Self {
            interval_ms,
            max_attempts,
            backoff: Backoff::Fixed,
        }
    }

    /// Capped exponential policy starting at `base_delay_ms`.
    pub fn exponential(base_delay_ms: u64, max_delay_ms: u64, max_attempts: u32) -> Self {
        Self {
            interval_ms: base_delay_ms,
            max_attempts,
            backoff: Backoff::Exponential { max_delay_ms },
        }
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Delay before the 1-based `attempt`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => Duration::from_millis(self.interval_ms),
            Backoff::Exponential { max_delay_ms } => {
                let shift = attempt.saturating_sub(1).min(20);
                let multiplier = 1_u64 << shift;
                let calculated = self.interval_ms.saturating_mul(multiplier);
                Duration::from_millis(calculated.min(max_delay_ms))
            }
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_INTERVAL_MS, DEFAULT_MAX_ATTEMPTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_policy_uses_same_interval_for_every_attempt() {
        let policy = ReconnectPolicy::new(250, 3);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(250));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(250));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(250));
    }

    #[test]
    fn exponential_policy_starts_with_base_delay() {
        let policy = ReconnectPolicy::exponential(100, 10_000, 8);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(800));
    }

    #[test]
    fn exponential_policy_caps_delay_at_max() {
        let policy = ReconnectPolicy::exponential(1_000, 4_000, 8);
        assert_eq!(policy.delay_for_attempt(6), Duration::from_millis(4_000));
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_millis(4_000));
    }

    #[test]
    fn defaults_are_fixed_three_seconds_five_attempts() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.interval_ms(), 3_000);
        assert_eq!(policy.max_attempts(), 5);
        assert_eq!(policy.backoff(), Backoff::Fixed);
    }
}
