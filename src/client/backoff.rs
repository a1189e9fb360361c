//! Reconnection backoff policy

use std::time::Duration;

use crate::config::ClientConfig;

/// Delay schedule and attempt limit for automatic reconnection
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub interval: Duration,
    pub backoff: f64,
    pub max_attempts: u32,
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            enabled: config.reconnect,
            interval: Duration::from_millis(config.reconnect_interval_ms),
            // A multiplier below 1 would shrink the delay between attempts
            backoff: config.reconnect_backoff.max(1.0),
            max_attempts: config.max_reconnect_attempts,
            max_delay: Duration::from_millis(config.max_reconnect_delay_ms),
        }
    }

    /// Delay before the given 0-based reconnect attempt:
    /// `interval × backoff^attempt`, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let millis = self.interval.as_millis() as f64 * self.backoff.powi(exponent);
        let cap = self.max_delay.as_millis() as f64;
        if !millis.is_finite() || millis >= cap {
            return self.max_delay;
        }
        Duration::from_millis(millis as u64)
    }

    /// Whether another attempt is allowed after `attempts_made` failures
    pub fn allows(&self, attempts_made: u32) -> bool {
        self.enabled && attempts_made < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(interval_ms: u64, backoff: f64, max_attempts: u32, max_delay_ms: u64) -> ReconnectPolicy {
        ReconnectPolicy {
            enabled: true,
            interval: Duration::from_millis(interval_ms),
            backoff,
            max_attempts,
            max_delay: Duration::from_millis(max_delay_ms),
        }
    }

    #[test]
    fn test_default_schedule() {
        let p = ReconnectPolicy::from_config(&ClientConfig::default());
        assert_eq!(p.delay_for(0), Duration::from_millis(3000));
        assert_eq!(p.delay_for(1), Duration::from_millis(4500));
        assert_eq!(p.delay_for(2), Duration::from_millis(6750));
    }

    #[test]
    fn test_delay_capped() {
        let p = policy(1000, 2.0, 50, 5000);
        assert_eq!(p.delay_for(2), Duration::from_millis(4000));
        assert_eq!(p.delay_for(3), Duration::from_millis(5000));
        assert_eq!(p.delay_for(40), Duration::from_millis(5000));
        assert_eq!(p.delay_for(u32::MAX), Duration::from_millis(5000));
    }

    #[test]
    fn test_delays_never_decrease() {
        for backoff in [0.5, 1.0, 1.3, 1.5, 2.0, 3.7] {
            for interval in [0, 1, 250, 3000] {
                let mut p = policy(interval, backoff, 20, 60_000);
                p.backoff = p.backoff.max(1.0);
                let mut previous = Duration::ZERO;
                for attempt in 0..20 {
                    let delay = p.delay_for(attempt);
                    assert!(delay >= previous, "backoff={backoff} attempt={attempt}");
                    previous = delay;
                }
            }
        }
    }

    #[test]
    fn test_backoff_below_one_clamped() {
        let config = ClientConfig {
            reconnect_backoff: 0.25,
            ..Default::default()
        };
        assert_eq!(ReconnectPolicy::from_config(&config).backoff, 1.0);
    }

    #[test]
    fn test_attempt_limit() {
        let p = policy(100, 2.0, 3, 10_000);
        assert!(p.allows(0));
        assert!(p.allows(2));
        assert!(!p.allows(3));

        let disabled = ReconnectPolicy {
            enabled: false,
            ..p
        };
        assert!(!disabled.allows(0));
    }
}
