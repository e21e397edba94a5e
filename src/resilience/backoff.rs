//! Exponential backoff calculation.
//!
//! Shared by the retry engine, the rate limiter's adaptive throttling, and
//! domain cooldown policies.

use std::time::Duration;

use rand::Rng;

use crate::{Error, Result};

/// Configuration for exponential backoff calculation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    /// Starting delay in seconds.
    pub base_delay: f64,
    /// Maximum delay cap in seconds.
    pub max_delay: f64,
    /// Base for the exponential term.
    pub exponential_base: f64,
    /// Random variation factor, applied as ± `jitter_factor * delay`.
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: 1.0,
            max_delay: 60.0,
            exponential_base: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl BackoffConfig {
    /// Validate the parameter ranges. Invalid configurations are a fatal
    /// initialization error, never a runtime surprise.
    pub fn validate(&self) -> Result<()> {
        if self.base_delay <= 0.0 {
            return Err(invalid("base_delay", "must be positive"));
        }
        if self.max_delay <= 0.0 {
            return Err(invalid("max_delay", "must be positive"));
        }
        if self.max_delay < self.base_delay {
            return Err(invalid("max_delay", "must be >= base_delay"));
        }
        if self.exponential_base <= 1.0 {
            return Err(invalid("exponential_base", "must be > 1"));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(invalid("jitter_factor", "must be between 0 and 1"));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> Error {
    Error::InvalidConfig {
        field: format!("backoff.{field}"),
        reason: reason.to_string(),
    }
}

/// Delay in seconds for a retry attempt (0-indexed):
/// `min(base * exponential_base^attempt, max_delay)`, with optional
/// ± jitter to avoid thundering-herd retries.
#[must_use]
pub fn calculate_backoff(attempt: u32, config: &BackoffConfig, add_jitter: bool) -> f64 {
    let delay = (config.base_delay * config.exponential_base.powi(attempt as i32))
        .min(config.max_delay);

    if add_jitter && config.jitter_factor > 0.0 {
        let jitter_range = delay * config.jitter_factor;
        let jitter = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
        (delay + jitter).max(0.0)
    } else {
        delay
    }
}

/// Same as [`calculate_backoff`], as a [`Duration`] for sleeping.
#[must_use]
pub fn backoff_duration(attempt: u32, config: &BackoffConfig) -> Duration {
    Duration::from_secs_f64(calculate_backoff(attempt, config, true))
}

/// Cooldown duration for circuit breakers and domain policies.
///
/// Failures group into tiers of 3, doubling the cooldown each tier and
/// capping the factor at 4x:
/// 0-2 failures -> base, 3-5 -> 2x base, 6+ -> capped at `max_minutes`.
pub fn calculate_cooldown_minutes(
    failure_count: i64,
    base_minutes: u32,
    max_minutes: u32,
) -> Result<u32> {
    if failure_count < 0 {
        return Err(invalid("failure_count", "must be non-negative"));
    }
    if base_minutes == 0 {
        return Err(invalid("base_minutes", "must be positive"));
    }
    if max_minutes == 0 {
        return Err(invalid("max_minutes", "must be positive"));
    }
    if max_minutes < base_minutes {
        return Err(invalid("max_minutes", "must be >= base_minutes"));
    }

    let tier = (failure_count / 3).min(2) as u32;
    let factor = (1u32 << tier).min(4);
    Ok((base_minutes.saturating_mul(factor)).min(max_minutes))
}

/// Worst-case total delay over `max_retries` attempts, without jitter.
/// Useful for sizing timeout budgets around a retried call.
#[must_use]
pub fn calculate_total_delay(max_retries: u32, config: &BackoffConfig) -> f64 {
    (0..max_retries)
        .map(|attempt| calculate_backoff(attempt, config, false))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn first_attempt_returns_base_delay_without_jitter() {
        let config = BackoffConfig::default();
        assert!((calculate_backoff(0, &config, false) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn delay_doubles_then_caps() {
        let config = BackoffConfig::default();
        assert!((calculate_backoff(1, &config, false) - 2.0).abs() < f64::EPSILON);
        assert!((calculate_backoff(2, &config, false) - 4.0).abs() < f64::EPSILON);
        assert!((calculate_backoff(10, &config, false) - 60.0).abs() < f64::EPSILON);
    }

    #[test]
    fn jitter_stays_within_factor() {
        let config = BackoffConfig::default();
        for _ in 0..100 {
            let d = calculate_backoff(3, &config, true);
            assert!(d >= 8.0 * 0.9 - 1e-9);
            assert!(d <= 8.0 * 1.1 + 1e-9);
        }
    }

    #[test]
    fn invalid_configs_rejected() {
        let bad = BackoffConfig {
            base_delay: 0.0,
            ..BackoffConfig::default()
        };
        assert!(bad.validate().is_err());

        let bad = BackoffConfig {
            exponential_base: 1.0,
            ..BackoffConfig::default()
        };
        assert!(bad.validate().is_err());

        let bad = BackoffConfig {
            base_delay: 10.0,
            max_delay: 5.0,
            ..BackoffConfig::default()
        };
        assert!(bad.validate().is_err());

        let bad = BackoffConfig {
            jitter_factor: 1.5,
            ..BackoffConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn cooldown_tiers() {
        assert_eq!(calculate_cooldown_minutes(0, 30, 120).unwrap(), 30);
        assert_eq!(calculate_cooldown_minutes(2, 30, 120).unwrap(), 30);
        assert_eq!(calculate_cooldown_minutes(3, 30, 120).unwrap(), 60);
        assert_eq!(calculate_cooldown_minutes(6, 30, 120).unwrap(), 120);
        assert_eq!(calculate_cooldown_minutes(100, 30, 120).unwrap(), 120);
    }

    #[test]
    fn negative_failure_count_rejected() {
        assert!(calculate_cooldown_minutes(-1, 30, 120).is_err());
    }

    #[test]
    fn total_delay_sums_attempts() {
        let config = BackoffConfig::default();
        assert!((calculate_total_delay(3, &config) - 7.0).abs() < f64::EPSILON);
        assert!((calculate_total_delay(5, &config) - 31.0).abs() < f64::EPSILON);
    }

    proptest! {
        #[test]
        fn backoff_is_bounded_by_config(attempt in 0u32..32, base in 0.1f64..5.0, max in 5.0f64..120.0) {
            let config = BackoffConfig { base_delay: base, max_delay: max, ..BackoffConfig::default() };
            let d = calculate_backoff(attempt, &config, false);
            prop_assert!(d <= max + 1e-9);
            prop_assert!(d >= base.min(max) - 1e-9);
        }

        #[test]
        fn backoff_is_monotone_without_jitter(attempt in 0u32..20) {
            let config = BackoffConfig::default();
            let a = calculate_backoff(attempt, &config, false);
            let b = calculate_backoff(attempt + 1, &config, false);
            prop_assert!(b >= a);
        }

        #[test]
        fn cooldown_is_clamped(failures in 0i64..1000) {
            let minutes = calculate_cooldown_minutes(failures, 30, 120).unwrap();
            prop_assert!((30..=120).contains(&minutes));
        }
    }
}
