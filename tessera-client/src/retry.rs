//! Retry policies: schedules of waits between request attempts.

use rand::Rng;
use std::time::Duration;
use tessera_core::RetryConfig;

/// Sequence of waits before each retry. An exhausted sequence ends retrying.
pub type Backoff = Box<dyn Iterator<Item = Duration> + Send>;

/// Produces a fresh backoff schedule for every request.
pub trait RetryPolicy: Send + Sync + std::fmt::Debug {
    fn backoff(&self) -> Backoff;
}

/// Exponential backoff, capped, optionally jittered.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: RetryConfig,
}

impl ExponentialBackoff {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Un-jittered wait before retry number `retry` (zero-based).
    pub fn interval(&self, retry: u32) -> Duration {
        let base = self.config.initial_backoff.as_secs_f64();
        let factor = (self.config.backoff_multiplier.max(1.0) as f64).powi(retry as i32);
        let capped = (base * factor).min(self.config.max_backoff.as_secs_f64());
        Duration::from_secs_f64(capped)
    }
}

impl From<&RetryConfig> for ExponentialBackoff {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.clone())
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn backoff(&self) -> Backoff {
        let this = self.clone();
        Box::new((0..self.config.max_retries).map(move |retry| {
            let wait = this.interval(retry);
            if this.config.jitter && !wait.is_zero() {
                // Between half and the full interval.
                wait.saturating_sub(wait.mul_f64(rand::rng().random_range(0.0..=0.5)))
            } else {
                wait
            }
        }))
    }
}

/// The same wait before every retry.
#[derive(Debug, Clone, Copy)]
pub struct FixedBackoff {
    pub interval: Duration,
    pub max_retries: u32,
}

impl RetryPolicy for FixedBackoff {
    fn backoff(&self) -> Backoff {
        Box::new(std::iter::repeat(self.interval).take(self.max_retries as usize))
    }
}

/// A single attempt, never retried.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn backoff(&self) -> Backoff {
        Box::new(std::iter::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn config(jitter: bool) -> RetryConfig {
        RetryConfig {
            max_retries: 6,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(1000),
            backoff_multiplier: 2.0,
            jitter,
        }
    }

    #[test]
    fn test_exponential_schedule_is_capped() {
        let waits: Vec<u128> = ExponentialBackoff::new(config(false))
            .backoff()
            .map(|d| d.as_millis())
            .collect();
        assert_eq!(waits, vec![100, 200, 400, 800, 1000, 1000]);
    }

    #[test]
    fn test_fixed_and_none() {
        let fixed = FixedBackoff {
            interval: Duration::from_millis(5),
            max_retries: 3,
        };
        assert_eq!(fixed.backoff().count(), 3);
        assert_eq!(NoRetry.backoff().count(), 0);
    }

    proptest! {
        /// Property: jittered waits stay within [interval / 2, interval].
        #[test]
        fn prop_jitter_within_bounds(retries in 1u32..12, initial_ms in 1u64..500) {
            let cfg = RetryConfig {
                max_retries: retries,
                initial_backoff: Duration::from_millis(initial_ms),
                ..config(true)
            };
            let policy = ExponentialBackoff::new(cfg);
            for (retry, wait) in policy.backoff().enumerate() {
                let full = policy.interval(retry as u32);
                prop_assert!(wait <= full);
                prop_assert!(wait >= full / 2);
            }
        }
    }
}
