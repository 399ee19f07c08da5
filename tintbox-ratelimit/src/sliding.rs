//! In-memory sliding-window limiter.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tintbox_core::{Clock, SystemClock};
use tracing::debug;

use crate::config::MemorySettings;
use crate::limiter::{RateLimitQuota, RateLimitStatus, RateLimiter};

#[derive(Debug)]
struct Window {
    hits: VecDeque<DateTime<Utc>>,
    last_seen: DateTime<Utc>,
}

impl Window {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            hits: VecDeque::new(),
            last_seen: now,
        }
    }

    /// Drops hits that fell out of the window ending at `now`.
    fn evict(&mut self, now: DateTime<Utc>, window: chrono::Duration) {
        let horizon = now - window;
        while self.hits.front().is_some_and(|hit| *hit <= horizon) {
            self.hits.pop_front();
        }
    }

    fn in_window(
        &self,
        now: DateTime<Utc>,
        window: chrono::Duration,
    ) -> impl Iterator<Item = &DateTime<Utc>> {
        let horizon = now - window;
        self.hits.iter().filter(move |hit| **hit > horizon)
    }
}

/// Per-key sliding window over request timestamps, kept in process memory.
///
/// Suitable for a single instance. Memory is bounded by a deterministic sweep:
/// every `sweep_every` recorded requests, keys with no timestamps left in the
/// window are dropped and the least recently used keys are evicted down to
/// `max_keys`.
pub struct SlidingWindowLimiter {
    quota: RateLimitQuota,
    windows: DashMap<String, Window>,
    clock: Arc<dyn Clock>,
    max_keys: usize,
    sweep_every: u64,
    processed: AtomicU64,
}

impl fmt::Debug for SlidingWindowLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlidingWindowLimiter")
            .field("quota", &self.quota)
            .field("keys", &self.windows.len())
            .field("max_keys", &self.max_keys)
            .field("sweep_every", &self.sweep_every)
            .finish()
    }
}

impl SlidingWindowLimiter {
    /// Creates a builder enforcing `quota`.
    pub fn builder(quota: RateLimitQuota) -> SlidingWindowLimiterBuilder {
        SlidingWindowLimiterBuilder {
            quota,
            clock: Arc::new(SystemClock),
            settings: MemorySettings::default(),
        }
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    /// Drops idle keys and evicts least recently used keys down to `max_keys`.
    pub fn sweep(&self) {
        let now = self.clock.now();
        let window = self.quota.chrono_window();
        let before = self.windows.len();

        self.windows.retain(|_, entry| {
            entry.evict(now, window);
            !entry.hits.is_empty()
        });

        let excess = self.windows.len().saturating_sub(self.max_keys);
        if excess > 0 {
            let mut by_recency: Vec<(String, DateTime<Utc>)> = self
                .windows
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().last_seen))
                .collect();
            by_recency.sort_by_key(|(_, last_seen)| *last_seen);
            for (key, _) in by_recency.into_iter().take(excess) {
                self.windows.remove(&key);
            }
        }

        debug!(
            before,
            after = self.windows.len(),
            max_keys = self.max_keys,
            "rate limiter sweep"
        );
    }

    /// Instant at which a request becomes admissible again, given the
    /// in-window hits in order. `used - limit` hits must expire first.
    fn reset_at<'a>(
        &self,
        mut hits: impl Iterator<Item = &'a DateTime<Utc>>,
        used: u64,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        let window = self.quota.chrono_window();
        let index = if used >= self.quota.limit {
            used - self.quota.limit
        } else {
            0
        };
        let pivot = usize::try_from(index).ok().and_then(|index| hits.nth(index));
        match pivot {
            Some(hit) => *hit + window,
            None => now + window,
        }
    }
}

#[async_trait]
impl RateLimiter for SlidingWindowLimiter {
    async fn check(&self, key: &str) -> RateLimitStatus {
        let now = self.clock.now();
        let window = self.quota.chrono_window();
        let limit = self.quota.limit;

        match self.windows.get(key) {
            Some(entry) => {
                let used = entry.in_window(now, window).count() as u64;
                let reset_at = self.reset_at(entry.in_window(now, window), used, now);
                RateLimitStatus::new(used < limit, limit, used, reset_at, now)
            }
            None => RateLimitStatus::new(limit > 0, limit, 0, now + window, now),
        }
    }

    async fn increment(&self, key: &str) -> RateLimitStatus {
        let now = self.clock.now();
        let window = self.quota.chrono_window();
        let limit = self.quota.limit;

        let status = {
            let mut entry = self
                .windows
                .entry(key.to_owned())
                .or_insert_with(|| Window::new(now));
            entry.evict(now, window);
            entry.hits.push_back(now);
            entry.last_seen = now;

            let used = entry.hits.len() as u64;
            let reset_at = self.reset_at(entry.hits.iter(), used, now);
            RateLimitStatus::new(used <= limit, limit, used, reset_at, now)
        };

        let processed = self.processed.fetch_add(1, Ordering::Relaxed) + 1;
        if processed % self.sweep_every == 0 {
            self.sweep();
        }
        status
    }

    fn quota(&self) -> RateLimitQuota {
        self.quota
    }
}

/// Builder for [`SlidingWindowLimiter`].
pub struct SlidingWindowLimiterBuilder {
    quota: RateLimitQuota,
    clock: Arc<dyn Clock>,
    settings: MemorySettings,
}

impl SlidingWindowLimiterBuilder {
    /// Sets the clock timestamps are taken from.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the number of keys kept after a sweep.
    pub fn max_keys(mut self, max_keys: usize) -> Self {
        self.settings.max_keys = max_keys;
        self
    }

    /// Sets how many recorded requests trigger a sweep. Zero is treated as one.
    pub fn sweep_every(mut self, sweep_every: u64) -> Self {
        self.settings.sweep_every = sweep_every;
        self
    }

    /// Applies memory settings loaded from configuration.
    pub fn settings(mut self, settings: &MemorySettings) -> Self {
        self.settings = settings.clone();
        self
    }

    /// Builds the limiter.
    pub fn build(self) -> SlidingWindowLimiter {
        SlidingWindowLimiter {
            quota: self.quota,
            windows: DashMap::new(),
            clock: self.clock,
            max_keys: self.settings.max_keys,
            sweep_every: self.settings.sweep_every.max(1),
            processed: AtomicU64::new(0),
        }
    }
}
