use std::time::Duration;

use serde::Deserialize;

/// Bounded exponential backoff for retrying transient command failures.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Total attempts including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Delay before the second attempt; doubles on every further attempt.
    #[serde(default = "default_base_delay", deserialize_with = "super::duration::deserialize")]
    pub base_delay: Duration,

    /// Upper bound for a single delay.
    #[serde(default = "default_max_delay", deserialize_with = "super::duration::deserialize")]
    pub max_delay: Duration,
}

impl BackoffPolicy {
    /// Retry policy for routers that have not yet learned about a new shard.
    pub fn router_discovery() -> Self {
        Self::default()
    }

    /// Retry policy for replica set reconfiguration races.
    pub fn reconfigure() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as u32;
        self.base_delay
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max_delay)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
        }
    }
}

fn default_max_attempts() -> usize {
    5
}
fn default_base_delay() -> Duration {
    Duration::from_millis(500)
}
fn default_max_delay() -> Duration {
    Duration::from_secs(8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_until_cap() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_millis(500));
        assert_eq!(policy.delay_after(2), Duration::from_secs(1));
        assert_eq!(policy.delay_after(4), Duration::from_secs(4));
        assert_eq!(policy.delay_after(5), Duration::from_secs(8));
        assert_eq!(policy.delay_after(60), Duration::from_secs(8));
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let policy: BackoffPolicy =
            serde_yaml::from_str("max_attempts: 3\nbase_delay: 100ms").unwrap();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(100));
        assert_eq!(policy.max_delay, Duration::from_secs(8));
    }
}
