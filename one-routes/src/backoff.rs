//! Reconnect delay computation for outgoing routes and group reconnect
//! timers. Exponential-with-jitter is the production default; `Fixed` gives
//! tests a deterministic delay.

use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub enum ReconnectPolicy {
    Exponential {
        initial: Duration,
        max: Duration,
        multiplier: f64,
    },
    Fixed(Duration),
}

impl ReconnectPolicy {
    pub fn default_exponential() -> Self {
        Self::Exponential {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }

    /// The delay to wait before the `consecutive_failures + 1`-th attempt.
    pub fn delay_for(&self, consecutive_failures: u32) -> Duration {
        match self {
            ReconnectPolicy::Fixed(delay) => *delay,
            ReconnectPolicy::Exponential {
                initial,
                max,
                multiplier,
            } => {
                let scaled = initial.as_secs_f64() * multiplier.powi(consecutive_failures as i32);
                let capped = scaled.min(max.as_secs_f64());
                let jittered = capped * (0.5 + fastrand::f64() * 0.5);
                Duration::from_secs_f64(jittered)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_policy_ignores_failure_count() {
        let policy = ReconnectPolicy::Fixed(Duration::from_millis(50));
        assert_eq!(policy.delay_for(0), Duration::from_millis(50));
        assert_eq!(policy.delay_for(20), Duration::from_millis(50));
    }

    #[test]
    fn exponential_policy_stays_within_bounds_and_caps() {
        let policy = ReconnectPolicy::Exponential {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(1),
            multiplier: 2.0,
        };
        for failures in 0..10 {
            let delay = policy.delay_for(failures);
            assert!(delay >= Duration::from_millis(50));
            assert!(delay <= Duration::from_secs(1));
        }
    }
}
