//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

use crate::config::schema::RetryConfig;

/// Delay schedule for retries: `min(base · 2^attempt, max)` then `±jitter%`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Symmetric jitter in percent of the capped delay (0-100).
    pub jitter_percent: u8,
}

impl BackoffPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter_percent: config.jitter_percent.min(100),
        }
    }

    /// Capped exponential delay before jitter.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let max_ms = self.max_delay.as_millis() as u64;

        let exponential = 2u64.saturating_pow(attempt);
        Duration::from_millis(base_ms.saturating_mul(exponential).min(max_ms))
    }

    /// Delay to sleep after failed attempt `attempt` (0-based).
    pub fn calculate_backoff_delay(&self, attempt: u32) -> Duration {
        self.calculate_backoff_delay_with(attempt, &mut rand::thread_rng())
    }

    /// Same as [`calculate_backoff_delay`](Self::calculate_backoff_delay) with a
    /// caller-supplied random source.
    pub fn calculate_backoff_delay_with<R: Rng>(&self, attempt: u32, rng: &mut R) -> Duration {
        let capped = self.base_delay_for(attempt).as_secs_f64();
        let spread = capped * f64::from(self.jitter_percent) / 100.0;

        let jitter = if spread > 0.0 {
            rng.gen_range(-spread..=spread)
        } else {
            0.0
        };

        Duration::from_secs_f64((capped + jitter).max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn policy(jitter_percent: u8) -> BackoffPolicy {
        BackoffPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(2000),
            jitter_percent,
        }
    }

    #[test]
    fn test_backoff_calculation() {
        let p = policy(0);
        assert_eq!(p.calculate_backoff_delay(0), Duration::from_millis(100));
        assert_eq!(p.calculate_backoff_delay(1), Duration::from_millis(200));
        assert_eq!(p.calculate_backoff_delay(2), Duration::from_millis(400));
        assert_eq!(p.calculate_backoff_delay(10), Duration::from_millis(2000));
        assert_eq!(p.calculate_backoff_delay(u32::MAX), Duration::from_millis(2000));
    }

    #[test]
    fn test_base_delay_is_monotonic_up_to_cap() {
        let p = policy(20);
        let mut previous = Duration::ZERO;
        for attempt in 0..16 {
            let delay = p.base_delay_for(attempt);
            assert!(delay >= previous, "attempt {attempt}: {delay:?} < {previous:?}");
            assert!(delay <= p.max_delay);
            previous = delay;
        }
    }

    #[test]
    fn test_jitter_stays_within_band() {
        let p = policy(25);
        let mut rng = StdRng::seed_from_u64(7);

        for attempt in 0..4 {
            let nominal = 0.1 * 2f64.powi(attempt as i32);
            for _ in 0..200 {
                let delay = p.calculate_backoff_delay_with(attempt, &mut rng).as_secs_f64();
                assert!(delay >= nominal * 0.75 - 1e-9, "{delay} below band for {attempt}");
                assert!(delay <= nominal * 1.25 + 1e-9, "{delay} above band for {attempt}");
            }
        }
    }

    #[test]
    fn test_full_jitter_never_negative() {
        let p = policy(100);
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..500 {
            let delay = p.calculate_backoff_delay_with(0, &mut rng);
            assert!(delay <= Duration::from_millis(200));
        }
    }

    #[test]
    fn test_from_config() {
        let p = BackoffPolicy::from_config(&RetryConfig::default());
        assert_eq!(p.base_delay, Duration::from_millis(1000));
        assert_eq!(p.max_delay, Duration::from_millis(30_000));
        assert_eq!(p.jitter_percent, 20);
    }
}
