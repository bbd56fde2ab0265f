//! Reconnect backoff policy.
//!
//! `delay(n) = min(max_delay, base_delay * growth_factor^n) + U(0, jitter_fraction * capped)`
//!
//! The capped part is monotonically non-decreasing in `n`; jitter spreads the
//! retries of many cashier sessions that lost the server at the same moment.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::duration_ms;
use crate::error::ConfigError;

/// Parameters of the exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackoffPolicy {
    /// Delay before the first retry
    /// Default: 1 second
    #[serde(rename = "baseDelayMs", with = "duration_ms")]
    pub base_delay: Duration,

    /// Multiplier applied per attempt
    /// Default: 2.0
    pub growth_factor: f64,

    /// Upper bound of the un-jittered delay
    /// Default: 60 seconds
    #[serde(rename = "maxDelayMs", with = "duration_ms")]
    pub max_delay: Duration,

    /// Jitter window as a fraction of the capped delay, in `[0, 1]`
    /// Default: 0.5
    pub jitter_fraction: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            growth_factor: 2.0,
            max_delay: Duration::from_secs(60),
            jitter_fraction: 0.5,
        }
    }
}

impl BackoffPolicy {
    /// A policy without jitter, mostly useful for deterministic tests.
    pub fn without_jitter(mut self) -> Self {
        self.jitter_fraction = 0.0;
        self
    }

    /// The un-jittered delay for `attempt`, capped at `max_delay`.
    pub fn capped_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_secs_f64();
        let max = self.max_delay.as_secs_f64();
        let grown = base * self.growth_factor.powf(f64::from(attempt));
        // NaN and inf from overflow both land on the cap
        if grown.is_nan() || grown >= max {
            return self.max_delay;
        }
        Duration::from_secs_f64(grown)
    }

    /// The jittered delay for `attempt`, using the thread-local RNG.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        self.next_delay_with(attempt, &mut rand::thread_rng())
    }

    /// The jittered delay for `attempt`, drawing jitter from `rng`.
    pub fn next_delay_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let capped = self.capped_delay(attempt);
        let window = capped.as_secs_f64() * self.jitter_fraction;
        if window <= 0.0 {
            return capped;
        }
        capped + Duration::from_secs_f64(rng.gen_range(0.0..=window))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_delay.is_zero() {
            return Err(ConfigError::InvalidValue(
                "backoff base delay must be greater than 0".to_string(),
            ));
        }
        if self.max_delay < self.base_delay {
            return Err(ConfigError::InvalidValue(
                "backoff max delay must be >= base delay".to_string(),
            ));
        }
        if !self.growth_factor.is_finite() || self.growth_factor < 1.0 {
            return Err(ConfigError::InvalidValue(
                "backoff growth factor must be >= 1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter_fraction) {
            return Err(ConfigError::InvalidValue(
                "backoff jitter fraction must be between 0.0 and 1.0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Retry bookkeeping for one connection session.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BackoffState {
    /// Number of failures since the last successful open
    pub attempt: u32,
    /// Delay chosen for the most recent failure
    pub current_delay: Duration,
}

impl BackoffState {
    /// Record a failure: pick the delay for the current attempt, then advance.
    pub fn record_failure(&mut self, policy: &BackoffPolicy) -> Duration {
        self.record_failure_with(policy, &mut rand::thread_rng())
    }

    pub fn record_failure_with<R: Rng + ?Sized>(
        &mut self,
        policy: &BackoffPolicy,
        rng: &mut R,
    ) -> Duration {
        self.current_delay = policy.next_delay_with(self.attempt, rng);
        self.attempt = self.attempt.saturating_add(1);
        self.current_delay
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn policy(base_ms: u64, growth: f64, max_ms: u64, jitter: f64) -> BackoffPolicy {
        BackoffPolicy {
            base_delay: Duration::from_millis(base_ms),
            growth_factor: growth,
            max_delay: Duration::from_millis(max_ms),
            jitter_fraction: jitter,
        }
    }

    #[test]
    fn test_default_policy() {
        let policy = BackoffPolicy::default();
        assert!(policy.validate().is_ok());
        assert_eq!(policy.capped_delay(0), Duration::from_secs(1));
        assert_eq!(policy.capped_delay(1), Duration::from_secs(2));
        assert_eq!(policy.capped_delay(3), Duration::from_secs(8));
        assert_eq!(policy.capped_delay(10), Duration::from_secs(60));
    }

    #[test]
    fn test_huge_attempt_stays_at_cap() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.capped_delay(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_jitter_stays_within_window() {
        let policy = policy(1000, 2.0, 60_000, 1.0);
        let mut rng = StdRng::seed_from_u64(7);
        for attempt in 0..12 {
            let capped = policy.capped_delay(attempt);
            let delay = policy.next_delay_with(attempt, &mut rng);
            assert!(delay >= capped);
            assert!(delay <= capped * 2);
        }
    }

    #[test]
    fn test_same_seed_same_delays() {
        let policy = BackoffPolicy::default();
        let mut a = StdRng::seed_from_u64(42);
        let mut b = StdRng::seed_from_u64(42);
        for attempt in 0..8 {
            assert_eq!(
                policy.next_delay_with(attempt, &mut a),
                policy.next_delay_with(attempt, &mut b)
            );
        }
    }

    #[test]
    fn test_state_advances_and_resets() {
        let policy = BackoffPolicy::default().without_jitter();
        let mut state = BackoffState::default();

        assert_eq!(state.record_failure(&policy), Duration::from_secs(1));
        assert_eq!(state.record_failure(&policy), Duration::from_secs(2));
        assert_eq!(state.attempt, 2);
        assert_eq!(state.current_delay, Duration::from_secs(2));

        state.reset();
        assert_eq!(state, BackoffState::default());
    }

    #[test]
    fn test_validation() {
        assert!(policy(0, 2.0, 1000, 0.5).validate().is_err());
        assert!(policy(1000, 2.0, 500, 0.5).validate().is_err());
        assert!(policy(1000, 0.5, 5000, 0.5).validate().is_err());
        assert!(policy(1000, f64::NAN, 5000, 0.5).validate().is_err());
        assert!(policy(1000, 2.0, 5000, 1.5).validate().is_err());
        assert!(policy(1000, 1.0, 1000, 0.0).validate().is_ok());
    }

    #[test]
    fn test_deserializes_from_camel_case_millis() {
        let policy: BackoffPolicy = serde_json::from_str(
            r#"{"baseDelayMs":250,"growthFactor":1.5,"maxDelayMs":30000,"jitterFraction":0.2}"#,
        )
        .unwrap();
        assert_eq!(policy.base_delay, Duration::from_millis(250));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
        assert_eq!(policy.growth_factor, 1.5);
        assert_eq!(policy.jitter_fraction, 0.2);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Without jitter the delay never shrinks between attempts and never exceeds the cap.
        #[test]
        fn prop_capped_delay_is_monotonic_and_bounded(
            base_ms in 1u64..5_000,
            growth in 1.0f64..4.0,
            extra_ms in 0u64..120_000,
            attempt in 0u32..200,
        ) {
            let policy = policy(base_ms, growth, base_ms + extra_ms, 0.0);
            let current = policy.next_delay(attempt);
            let next = policy.next_delay(attempt + 1);

            prop_assert!(next >= current);
            prop_assert!(current <= policy.max_delay);
            prop_assert!(next <= policy.max_delay);
        }
    }
}
