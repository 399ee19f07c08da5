use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Freshness windows of a cached command.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct EnabledCachePolicy {
    /// Time-to-live before a cache entry becomes stale (e.g., "5s", "1m").
    /// Entries store whole seconds, so "500ms" is kept as one second.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    /// Duration after `ttl` during which stale data is served while it is
    /// revalidated in the background. Zero disables stale serving.
    #[serde(with = "humantime_serde")]
    pub stale: Duration,
}

impl Default for EnabledCachePolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            stale: Duration::ZERO,
        }
    }
}

/// Whether and how long a command's results are cached.
///
/// ```yaml
/// Enabled:
///   ttl: 5m
///   stale: 2m
/// ```
///
/// A `Disabled` command always goes to the upstream and never writes to the
/// cache. Concurrent identical calls are still coalesced.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub enum CachePolicy {
    /// Read from and write to the cache.
    Enabled(EnabledCachePolicy),
    /// Bypass the cache entirely.
    Disabled,
}

impl CachePolicy {
    /// Caching with the given freshness and stale windows.
    pub fn enabled(ttl: Duration, stale: Duration) -> Self {
        Self::Enabled(EnabledCachePolicy { ttl, stale })
    }

    /// Returns `true` unless caching is disabled.
    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled(_))
    }

    /// The `(ttl, stale)` windows, or `None` when disabled.
    pub fn windows(&self) -> Option<(Duration, Duration)> {
        match self {
            Self::Enabled(policy) => Some((policy.ttl, policy.stale)),
            Self::Disabled => None,
        }
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::Enabled(EnabledCachePolicy::default())
    }
}
