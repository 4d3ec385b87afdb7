//! # Jitter applied to retry delays.
//!
//! Spreads retries of many concurrent workers so a shared downstream outage does not
//! turn into synchronized retry waves.
//!
//! | Policy          | Delay drawn from                          |
//! |-----------------|-------------------------------------------|
//! | `None`          | `base`                                    |
//! | `Full`          | `[0, base]`                               |
//! | `Equal`         | `[base/2, base]`                          |
//! | `Decorrelated`  | `[floor, min(3 × base, cap)]`             |

use std::time::Duration;

use rand::Rng;

/// Randomization strategy for retry delays.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JitterPolicy {
    /// Exact delay.
    #[default]
    None,
    /// Uniform in `[0, base]`.
    Full,
    /// Half fixed, half random: uniform in `[base/2, base]`.
    Equal,
    /// Uniform in `[floor, min(3 × base, cap)]`; wider spread as the base grows.
    Decorrelated,
}

impl JitterPolicy {
    /// Applies the policy to `base`.
    ///
    /// `floor` and `cap` bound the `Decorrelated` range and are ignored otherwise.
    pub fn apply(&self, base: Duration, floor: Duration, cap: Duration) -> Duration {
        let ms = base.as_millis() as u64;
        match self {
            JitterPolicy::None => base,
            JitterPolicy::Full => Duration::from_millis(uniform(0, ms)),
            JitterPolicy::Equal => {
                let half = ms / 2;
                Duration::from_millis(half + uniform(0, ms - half))
            }
            JitterPolicy::Decorrelated => {
                let lo = floor.as_millis() as u64;
                let hi = ms.saturating_mul(3).min(cap.as_millis() as u64).max(lo);
                Duration::from_millis(uniform(lo, hi))
            }
        }
    }
}

/// Uniform draw in `[lo, hi]` (returns `lo` for an empty range).
fn uniform(lo: u64, hi: u64) -> u64 {
    if hi <= lo {
        return lo;
    }
    rand::rng().random_range(lo..=hi)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FLOOR: Duration = Duration::from_millis(10);
    const CAP: Duration = Duration::from_secs(60);

    #[test]
    fn none_is_identity() {
        let d = Duration::from_millis(1234);
        assert_eq!(JitterPolicy::None.apply(d, FLOOR, CAP), d);
    }

    #[test]
    fn zero_base_stays_zero() {
        for p in [JitterPolicy::Full, JitterPolicy::Equal] {
            assert_eq!(p.apply(Duration::ZERO, FLOOR, CAP), Duration::ZERO);
        }
    }

    #[test]
    fn decorrelated_is_capped() {
        let cap = Duration::from_millis(500);
        for _ in 0..100 {
            let d = JitterPolicy::Decorrelated.apply(Duration::from_secs(10), FLOOR, cap);
            assert!(d >= FLOOR && d <= cap);
        }
    }
}
