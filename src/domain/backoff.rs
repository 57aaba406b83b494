//! Bounded exponential backoff.
//!
//! Shared by the ground-truth fetch retries and the change-feed reconnect
//! loop: `delay(n) = min(base * 2^(n-1), max_delay)` for attempt `n >= 1`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry budget plus delay schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Maximum number of attempts (fetches) or reconnects (channels).
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub base_delay: Duration,
    /// Cap on any single delay.
    pub max_delay: Duration,
}

impl BackoffPolicy {
    pub const fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Fetch retry schedule: three attempts, 1s then 2s apart.
    pub const fn fetch_default() -> Self {
        Self::new(3, Duration::from_secs(1), Duration::from_secs(4))
    }

    /// Channel reconnect schedule: 1s doubling to 30s, five reconnects.
    pub const fn reconnect_default() -> Self {
        Self::new(5, Duration::from_secs(1), Duration::from_secs(30))
    }

    /// Delay to wait before retrying after failure number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Whether another attempt is allowed after `attempt` failures.
    pub const fn allows(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_schedule() {
        let policy = BackoffPolicy::fetch_default();
        assert_eq!(policy.delay(1), Duration::from_secs(1));
        assert_eq!(policy.delay(2), Duration::from_secs(2));
        assert_eq!(policy.delay(3), Duration::from_secs(4));
        assert_eq!(policy.delay(4), Duration::from_secs(4));

        // Only the gaps between the three attempts are ever slept.
        let slept: Duration = (1..)
            .take_while(|attempt| policy.allows(*attempt))
            .map(|attempt| policy.delay(attempt))
            .sum();
        assert_eq!(slept, Duration::from_secs(3));
    }

    #[test]
    fn test_delay_is_capped_without_overflow() {
        let policy = BackoffPolicy::reconnect_default();
        assert_eq!(policy.delay(6), Duration::from_secs(30));
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_attempt_budget() {
        let policy = BackoffPolicy::fetch_default();
        assert!(policy.allows(1));
        assert!(policy.allows(2));
        assert!(!policy.allows(3));
    }
}
