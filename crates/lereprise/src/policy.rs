use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default maximum attempts for any wrapped unit of work.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Default base delay between attempts.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(10);
/// Default cap on a single inter-attempt delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);
/// Default exponential growth factor.
pub const DEFAULT_MULTIPLIER: f64 = 2.0;

/// How the delay evolves between attempts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed,
    /// Delay multiplied by the policy multiplier after every retry.
    #[default]
    Exponential,
}

/// Parameters of a bounded retry loop.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Never below 1.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Delay growth mode.
    pub backoff: Backoff,
    /// Growth factor for exponential backoff.
    pub multiplier: f64,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Optional budget for the whole invocation including its sleeps.
    pub budget: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            backoff: Backoff::Exponential,
            multiplier: DEFAULT_MULTIPLIER,
            max_delay: DEFAULT_MAX_DELAY,
            budget: None,
        }
    }
}

impl RetryPolicy {
    /// Fixed-delay policy.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            backoff: Backoff::Fixed,
            multiplier: 1.0,
            max_delay: delay,
            budget: None,
        }
    }

    /// Exponential policy doubling from `base_delay` up to `max_delay`.
    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff: Backoff::Exponential,
            multiplier: DEFAULT_MULTIPLIER,
            max_delay,
            budget: None,
        }
    }

    /// Policy that never retries.
    pub fn once() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    /// Override the exponential multiplier.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Attach a wall-clock budget for the whole invocation.
    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = Some(budget);
        self
    }

    /// Clamp parameters into their valid ranges.
    pub fn normalized(mut self) -> Self {
        self.max_attempts = self.max_attempts.max(1);
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            self.multiplier = 1.0;
        }
        self
    }

    /// Attempts the loop will make, never below 1.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay slept after the failure of attempt `retry + 1`.
    ///
    /// `retry` is zero-based: `delay_for(0)` is the pause between attempt 1 and 2.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let cap = self.max_delay;
        let base = self.base_delay.min(cap);

        match self.backoff {
            Backoff::Fixed => base,
            Backoff::Exponential => {
                let multiplier = if self.multiplier.is_finite() && self.multiplier >= 1.0 {
                    self.multiplier
                } else {
                    1.0
                };
                let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
                let secs = base.as_secs_f64() * multiplier.powi(exponent);
                if !secs.is_finite() || secs >= cap.as_secs_f64() {
                    cap
                } else {
                    Duration::from_secs_f64(secs)
                }
            }
        }
    }

    /// Full schedule of inter-attempt delays (`attempts() - 1` entries).
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.attempts().saturating_sub(1)).map(move |retry| self.delay_for(retry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[test]
    fn default_policy_matches_orchestrator_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay, Duration::from_secs(10));
        assert_eq!(policy.max_delay, Duration::from_secs(60));
        assert_eq!(policy.backoff, Backoff::Exponential);
    }

    #[test]
    fn exponential_schedule_doubles_then_caps() {
        let policy = RetryPolicy::exponential(6, Duration::from_secs(10), Duration::from_secs(60));
        let delays: Vec<u64> = policy.delays().map(|d| d.as_secs()).collect();
        assert_eq!(delays, vec![10, 20, 40, 60, 60]);
    }

    #[test]
    fn fixed_schedule_is_flat() {
        let policy = RetryPolicy::fixed(4, Duration::from_secs(3));
        let delays: Vec<u64> = policy.delays().map(|d| d.as_secs()).collect();
        assert_eq!(delays, vec![3, 3, 3]);
    }

    #[rstest]
    #[case(0, 1)]
    #[case(1, 1)]
    #[case(7, 7)]
    fn attempts_never_below_one(#[case] configured: u32, #[case] expected: u32) {
        let policy = RetryPolicy {
            max_attempts: configured,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.attempts(), expected);
        assert_eq!(policy.clone().normalized().max_attempts, expected);
    }

    #[test]
    fn base_above_cap_is_clamped() {
        let policy = RetryPolicy::exponential(3, Duration::from_secs(90), Duration::from_secs(60));
        assert!(policy.delays().all(|d| d == Duration::from_secs(60)));
    }

    #[test]
    fn invalid_multiplier_behaves_as_fixed() {
        let policy = RetryPolicy::exponential(4, Duration::from_secs(2), Duration::from_secs(60))
            .with_multiplier(f64::NAN);
        assert!(policy.delays().all(|d| d == Duration::from_secs(2)));
        assert_eq!(policy.normalized().multiplier, 1.0);
    }

    proptest! {
        #[test]
        fn delays_are_monotonic_and_capped(
            attempts in 1u32..40,
            base_ms in 0u64..20_000,
            cap_ms in 0u64..120_000,
            multiplier in 1.0f64..5.0,
        ) {
            let policy = RetryPolicy::exponential(
                attempts,
                Duration::from_millis(base_ms),
                Duration::from_millis(cap_ms),
            )
            .with_multiplier(multiplier);

            let delays: Vec<Duration> = policy.delays().collect();
            prop_assert_eq!(delays.len() as u32, attempts - 1);
            for pair in delays.windows(2) {
                prop_assert!(pair[0] <= pair[1]);
            }
            for delay in &delays {
                prop_assert!(*delay <= Duration::from_millis(cap_ms));
            }
        }
    }
}
