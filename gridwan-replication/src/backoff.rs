use crate::config::LinkConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// How long the resolver waits for a target to become ready, and how long it
/// backs off before moving on to the next target.
pub trait ConnectPolicy: Send + Sync {
    /// Readiness polls per target before it is rotated to the tail.
    fn attempts(&self) -> u32;

    /// Delay after the given (zero-based) unsuccessful poll.
    fn poll_delay(&self, attempt: u32) -> Duration;

    /// Delay before a failed target is appended back to the rotation.
    fn rotate_delay(&self) -> Duration;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    #[default]
    Fixed,
    Exponential,
}

/// Same delay between every poll. The default: 10 polls, 1 s apart.
#[derive(Debug, Clone)]
pub struct FixedPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for FixedPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            delay: Duration::from_secs(1),
        }
    }
}

impl ConnectPolicy for FixedPolicy {
    fn attempts(&self) -> u32 {
        self.attempts
    }

    fn poll_delay(&self, _attempt: u32) -> Duration {
        self.delay
    }

    fn rotate_delay(&self) -> Duration {
        self.delay
    }
}

/// Poll delay doubles from `base` up to `max`; rotation waits `base`.
#[derive(Debug, Clone)]
pub struct ExponentialPolicy {
    pub attempts: u32,
    pub base: Duration,
    pub max: Duration,
}

impl ConnectPolicy for ExponentialPolicy {
    fn attempts(&self) -> u32 {
        self.attempts
    }

    fn poll_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    fn rotate_delay(&self) -> Duration {
        self.base
    }
}

/// Exponential polls are capped at this multiple of the configured delay.
const EXPONENTIAL_MAX_FACTOR: u32 = 30;

pub fn policy_for(link: &LinkConfig) -> Arc<dyn ConnectPolicy> {
    let delay = Duration::from_millis(link.connect_delay_ms);
    match link.backoff {
        BackoffKind::Fixed => Arc::new(FixedPolicy {
            attempts: link.connect_attempts,
            delay,
        }),
        BackoffKind::Exponential => Arc::new(ExponentialPolicy {
            attempts: link.connect_attempts,
            base: delay,
            max: delay.saturating_mul(EXPONENTIAL_MAX_FACTOR),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridwan::LinkCredentials;

    #[test]
    fn test_fixed_default_is_ten_by_one_second() {
        let policy = FixedPolicy::default();
        assert_eq!(policy.attempts(), 10);
        for attempt in 0..10 {
            assert_eq!(policy.poll_delay(attempt), Duration::from_secs(1));
        }
        assert_eq!(policy.rotate_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_exponential_doubles_and_caps() {
        let policy = ExponentialPolicy {
            attempts: 8,
            base: Duration::from_millis(100),
            max: Duration::from_millis(1000),
        };
        assert_eq!(policy.poll_delay(0), Duration::from_millis(100));
        assert_eq!(policy.poll_delay(1), Duration::from_millis(200));
        assert_eq!(policy.poll_delay(3), Duration::from_millis(800));
        assert_eq!(policy.poll_delay(4), Duration::from_millis(1000));
        assert_eq!(policy.poll_delay(40), Duration::from_millis(1000));
        assert_eq!(policy.rotate_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_policy_for_link_config() {
        let mut link = LinkConfig::new(
            "tokyo",
            LinkCredentials::new("tokyo", "pass"),
            vec!["h1".to_string()],
        );
        link.connect_attempts = 3;
        link.connect_delay_ms = 250;

        let fixed = policy_for(&link);
        assert_eq!(fixed.attempts(), 3);
        assert_eq!(fixed.poll_delay(2), Duration::from_millis(250));

        link.backoff = BackoffKind::Exponential;
        let exponential = policy_for(&link);
        assert_eq!(exponential.poll_delay(2), Duration::from_millis(1000));
    }
}
