//! Bounded exponential backoff for Bot API calls.

use std::time::Duration;

use rand::Rng;

/// Retry schedule for registration calls.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,

    /// Delay before the second attempt; doubles for each further attempt.
    pub base_delay: Duration,

    /// Upper bound for any single delay.
    pub max_delay: Duration,

    /// Randomisation of each delay, 0.0 to 1.0 (0.1 means ±10%).
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given failed attempt (1-based).
    ///
    /// A delay requested by the platform takes precedence, still capped by
    /// `max_delay`.
    pub fn delay_after(&self, attempt: u32, requested_secs: Option<u64>) -> Duration {
        if let Some(secs) = requested_secs {
            return Duration::from_secs(secs).min(self.max_delay);
        }

        let exponent = attempt.saturating_sub(1).min(20);
        let delay = self
            .base_delay
            .saturating_mul(2_u32.saturating_pow(exponent))
            .min(self.max_delay);

        apply_jitter(delay, self.jitter_factor).min(self.max_delay)
    }

    pub fn has_attempts_left(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 || duration.is_zero() {
        return duration;
    }

    let jitter = duration.as_secs_f64() * jitter_factor.clamp(0.0, 1.0);
    let offset = rand::thread_rng().gen_range(-jitter..=jitter);
    Duration::from_secs_f64((duration.as_secs_f64() + offset).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> RetryPolicy {
        RetryPolicy {
            jitter_factor: 0.0,
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn test_exponential_schedule_is_capped() {
        let policy = no_jitter();
        assert_eq!(policy.delay_after(1, None), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2, None), Duration::from_secs(2));
        assert_eq!(policy.delay_after(3, None), Duration::from_secs(4));
        assert_eq!(policy.delay_after(4, None), Duration::from_secs(8));
        assert_eq!(policy.delay_after(5, None), Duration::from_secs(16));
        assert_eq!(policy.delay_after(6, None), Duration::from_secs(30));
        assert_eq!(policy.delay_after(60, None), Duration::from_secs(30));
    }

    #[test]
    fn test_requested_delay_wins_but_is_capped() {
        let policy = no_jitter();
        assert_eq!(policy.delay_after(1, Some(7)), Duration::from_secs(7));
        assert_eq!(policy.delay_after(1, Some(600)), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let policy = RetryPolicy {
            jitter_factor: 0.25,
            ..RetryPolicy::default()
        };
        for _ in 0..100 {
            let delay = policy.delay_after(3, None);
            assert!(delay >= Duration::from_secs(3), "{delay:?}");
            assert!(delay <= Duration::from_secs(5), "{delay:?}");
        }
    }

    #[test]
    fn test_attempt_budget() {
        let policy = RetryPolicy::default();
        assert!(policy.has_attempts_left(1));
        assert!(policy.has_attempts_left(4));
        assert!(!policy.has_attempts_left(5));
    }
}
