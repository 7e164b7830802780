//! Reconnect Backoff
//!
//! Exponential backoff for stream reconnection: starts at one second,
//! doubles per consecutive failure, caps at one minute, and resets on a
//! successful connection. A small random jitter keeps a restarted fleet
//! from reconnecting in lockstep.

use std::time::Duration;

use rand::Rng;

/// Backoff policy for stream reconnection.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Growth factor per consecutive failure.
    pub multiplier: f64,
    /// Upper bound on the delay.
    pub max_delay: Duration,
    /// Fraction of the delay added as random jitter (0.0 disables).
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: 0.1,
        }
    }
}

/// Tracks consecutive failures and produces the next reconnect delay.
#[derive(Debug)]
pub struct ReconnectBackoff {
    config: BackoffConfig,
    failures: u32,
}

impl ReconnectBackoff {
    /// Create a backoff tracker with no recorded failures.
    #[must_use]
    pub const fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            failures: 0,
        }
    }

    /// Record a failure and return the delay before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.delay_for(self.failures);
        self.failures = self.failures.saturating_add(1);
        self.with_jitter(delay)
    }

    /// Clear the failure count after a successful connection.
    pub const fn reset(&mut self) {
        self.failures = 0;
    }

    /// Consecutive failures recorded since the last reset.
    #[must_use]
    pub const fn failures(&self) -> u32 {
        self.failures
    }

    fn delay_for(&self, failures: u32) -> Duration {
        let base = self.config.initial_delay.as_secs_f64();
        let factor = self.config.multiplier.powi(i32::try_from(failures).unwrap_or(i32::MAX));
        let secs = (base * factor).min(self.config.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs)
    }

    fn with_jitter(&self, delay: Duration) -> Duration {
        if self.config.jitter <= 0.0 {
            return delay;
        }
        let span = delay.as_secs_f64() * self.config.jitter;
        let jitter = rand::rng().random_range(0.0..=span);
        delay + Duration::from_secs_f64(jitter)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> BackoffConfig {
        BackoffConfig {
            jitter: 0.0,
            ..BackoffConfig::default()
        }
    }

    #[test]
    fn doubles_until_cap() {
        let mut backoff = ReconnectBackoff::new(no_jitter());
        let delays: Vec<u64> = (0..8).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60]);
    }

    #[test]
    fn reset_restarts_the_sequence() {
        let mut backoff = ReconnectBackoff::new(no_jitter());
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.failures(), 2);

        backoff.reset();
        assert_eq!(backoff.failures(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let mut backoff = ReconnectBackoff::new(BackoffConfig {
            jitter: 0.5,
            ..BackoffConfig::default()
        });
        for _ in 0..50 {
            backoff.reset();
            let delay = backoff.next_delay();
            assert!(delay >= Duration::from_secs(1));
            assert!(delay <= Duration::from_millis(1500));
        }
    }
}
