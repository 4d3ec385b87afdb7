//! # Backoff between retry attempts.
//!
//! [`BackoffPolicy`] decides how long the [`Retry`](crate::Retry) middleware sleeps
//! before re-invoking a failed handler. The base delay for attempt `n` (0-indexed) is
//! `first × factor^n` clamped to `max`; jitter is applied on top and never fed back.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use queuevisor::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_millis(50),
//!     max: Duration::from_secs(2),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//!
//! assert_eq!(backoff.next(0), Duration::from_millis(50));
//! assert_eq!(backoff.next(2), Duration::from_millis(200));
//! assert_eq!(backoff.next(8), Duration::from_secs(2));
//! ```

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Delay schedule between handler retries.
#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    /// Initial delay before the first retry.
    pub first: Duration,
    /// Maximum delay cap for retries.
    pub max: Duration,
    /// Multiplicative growth factor (`>= 1.0` recommended).
    pub factor: f64,
    /// Randomization applied to each computed delay.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// `first = 100ms`, `factor = 2.0`, `max = 10s`, `jitter = Equal`.
    fn default() -> Self {
        Self {
            first: Duration::from_millis(100),
            max: Duration::from_secs(10),
            factor: 2.0,
            jitter: JitterPolicy::Equal,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt + 1` (0-indexed: `next(0)` follows the first failure).
    ///
    /// Non-finite or out-of-range intermediate values clamp to `max`.
    pub fn next(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);
        let base = if secs.is_finite() && (0.0..=self.max.as_secs_f64()).contains(&secs) {
            Duration::from_secs_f64(secs)
        } else {
            self.max
        };
        self.jitter.apply(base, self.first.min(self.max), self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(first_ms: u64, max_ms: u64, factor: f64) -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_millis(first_ms),
            max: Duration::from_millis(max_ms),
            factor,
            jitter: JitterPolicy::None,
        }
    }

    #[test]
    fn grows_geometrically_then_caps() {
        let p = fixed(100, 1_000, 2.0);
        let got: Vec<u64> = (0..6).map(|a| p.next(a).as_millis() as u64).collect();
        assert_eq!(got, vec![100, 200, 400, 800, 1_000, 1_000]);
    }

    #[test]
    fn unit_factor_is_constant() {
        let p = fixed(250, 30_000, 1.0);
        assert!((0..20).all(|a| p.next(a) == Duration::from_millis(250)));
    }

    #[test]
    fn first_above_max_is_clamped() {
        assert_eq!(fixed(5_000, 1_000, 2.0).next(0), Duration::from_secs(1));
    }

    #[test]
    fn overflowing_exponent_clamps_to_max() {
        let p = fixed(100, 10_000, 2.0);
        assert_eq!(p.next(100), Duration::from_secs(10));
        assert_eq!(p.next(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn jittered_delay_stays_within_base() {
        for jitter in [JitterPolicy::Full, JitterPolicy::Equal] {
            let p = BackoffPolicy { jitter, ..fixed(100, 30_000, 2.0) };
            for attempt in 0..12 {
                let base = Duration::from_millis((100u64 << attempt).min(30_000));
                let d = p.next(attempt);
                assert!(d <= base, "{jitter:?} attempt {attempt}: {d:?} > {base:?}");
                if jitter == JitterPolicy::Equal {
                    assert!(d >= base / 2);
                }
            }
        }
    }

    #[test]
    fn decorrelated_delay_respects_floor_and_cap() {
        let p = BackoffPolicy {
            jitter: JitterPolicy::Decorrelated,
            ..fixed(100, 5_000, 2.0)
        };
        for _ in 0..50 {
            let d = p.next(6);
            assert!(d >= Duration::from_millis(100));
            assert!(d <= Duration::from_secs(5));
        }
    }
}
