//! Serializable rate limiter configuration.
//!
//! ```yaml
//! limit: 10
//! window: 60s
//! backend:
//!   type: distributed
//!   max_attempts: 5
//!   backoff:
//!     base_delay: 5ms
//!     max_delay: 200ms
//!   failure_policy: open
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::backoff::Backoff;
use crate::distributed::FailurePolicy;
use crate::limiter::RateLimitQuota;

/// Quota plus backend selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests admitted per window.
    pub limit: u64,
    /// Window length.
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    /// Which backend counts requests.
    #[serde(default)]
    pub backend: LimiterBackend,
}

impl RateLimitConfig {
    /// The configured quota.
    pub fn quota(&self) -> RateLimitQuota {
        RateLimitQuota::new(self.limit, self.window)
    }
}

/// Backend-specific settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LimiterBackend {
    /// [`SlidingWindowLimiter`](crate::SlidingWindowLimiter).
    Memory(MemorySettings),
    /// [`DistributedLimiter`](crate::DistributedLimiter).
    Distributed(DistributedSettings),
}

impl Default for LimiterBackend {
    fn default() -> Self {
        Self::Memory(MemorySettings::default())
    }
}

/// Settings of the in-memory sliding window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySettings {
    /// Keys kept after a sweep.
    pub max_keys: usize,
    /// Recorded requests between sweeps.
    pub sweep_every: u64,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            max_keys: 10_000,
            sweep_every: 1_000,
        }
    }
}

/// Settings of the optimistic-concurrency counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributedSettings {
    /// Write attempts before giving up on a contended key.
    pub max_attempts: u32,
    /// Delay schedule between attempts.
    pub backoff: Backoff,
    /// What to do when the store fails or the attempts run out.
    pub failure_policy: FailurePolicy,
    /// Prefix for keys in the shared store.
    pub key_prefix: String,
}

impl Default for DistributedSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Backoff::default(),
            failure_policy: FailurePolicy::default(),
            key_prefix: "ratelimit:".to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_distributed_from_yaml() {
        let yaml = r#"
limit: 10
window: 60s
backend:
  type: distributed
  max_attempts: 8
  backoff:
    base_delay: 10ms
    max_delay: 1s
  failure_policy: closed
"#;
        let config: RateLimitConfig = serde_saphyr::from_str(yaml).unwrap();
        assert_eq!(config.quota(), RateLimitQuota::per_minute(10));
        assert_eq!(
            config.backend,
            LimiterBackend::Distributed(DistributedSettings {
                max_attempts: 8,
                backoff: Backoff::new(Duration::from_millis(10), Duration::from_secs(1)),
                failure_policy: FailurePolicy::Closed,
                key_prefix: "ratelimit:".to_owned(),
            })
        );
    }

    #[test]
    fn test_memory_backend_is_default() {
        let config: RateLimitConfig = serde_saphyr::from_str("limit: 5\nwindow: 1m\n").unwrap();
        assert_eq!(config.backend, LimiterBackend::Memory(MemorySettings::default()));
    }
}
