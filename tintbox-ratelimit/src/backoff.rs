//! Bounded exponential backoff between conflicting writes.

use std::cmp::min;
use std::time::Duration;

use serde::{Deserialize, Serialize};

const EXPONENTIAL_FACTOR: f64 = 2.0;

/// Exponential delay schedule: `base_delay * 2^attempt`, capped at `max_delay`.
///
/// ```
/// use std::time::Duration;
/// use tintbox_ratelimit::Backoff;
///
/// let backoff = Backoff::new(Duration::from_millis(10), Duration::from_millis(50));
/// let delays: Vec<_> = backoff.delays().take(4).collect();
/// assert_eq!(
///     delays,
///     [10, 20, 40, 50].map(Duration::from_millis).to_vec(),
/// );
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backoff {
    /// Delay before the first retry.
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
}

impl Backoff {
    /// Creates a schedule starting at `base_delay` and capped at `max_delay`.
    pub const fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
        }
    }

    /// Returns the infinite sequence of delays.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + Send + 'static {
        Delays {
            backoff: *self,
            attempt: 0,
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(5), Duration::from_millis(200))
    }
}

#[derive(Debug)]
struct Delays {
    backoff: Backoff,
    attempt: u32,
}

impl Iterator for Delays {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        if self.backoff.base_delay.is_zero() {
            return Some(Duration::ZERO);
        }
        let factor = EXPONENTIAL_FACTOR.powi(i32::try_from(self.attempt).unwrap_or(i32::MAX));
        let delay = secs_to_duration_saturating(self.backoff.base_delay.as_secs_f64() * factor);
        self.attempt = self.attempt.saturating_add(1);
        Some(min(delay, self.backoff.max_delay))
    }
}

fn secs_to_duration_saturating(secs: f64) -> Duration {
    if secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_base_is_always_zero() {
        let backoff = Backoff::new(Duration::ZERO, Duration::from_secs(1));
        assert!(backoff.delays().take(10).all(|d| d.is_zero()));
    }

    #[test]
    fn test_large_attempts_saturate_at_max() {
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
        let last = backoff.delays().nth(2_000).unwrap();
        assert_eq!(last, Duration::from_secs(30));
    }
}
