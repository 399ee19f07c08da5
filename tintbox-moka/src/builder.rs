//! Builder for configuring [`MokaBackend`].

use std::time::{Duration, Instant};

use moka::Expiry;
use moka::future::{Cache, CacheBuilder};
use moka::policy::EvictionPolicy;
use tintbox_core::{BackendLabel, CacheEntry, CacheKey, Raw};

use crate::backend::MokaBackend;

/// Entries kept when no capacity is configured.
pub const DEFAULT_MAX_ENTRIES: u64 = 10_000;

/// Reaps an entry `ttl + swr` after its latest write.
struct PhysicalTtl;

impl Expiry<CacheKey, CacheEntry<Raw>> for PhysicalTtl {
    fn expire_after_create(
        &self,
        _key: &CacheKey,
        entry: &CacheEntry<Raw>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(entry.physical_ttl())
    }

    fn expire_after_update(
        &self,
        _key: &CacheKey,
        entry: &CacheEntry<Raw>,
        _updated_at: Instant,
        _remaining: Option<Duration>,
    ) -> Option<Duration> {
        // A refill restarts the clock; moka would keep the old deadline.
        Some(entry.physical_ttl())
    }
}

#[derive(Debug, Clone, Copy)]
enum Capacity {
    Entries(u64),
    Bytes(u64),
}

/// Builder for a [`MokaBackend`].
///
/// ```
/// use tintbox_moka::MokaBackend;
///
/// let by_count = MokaBackend::builder().max_entries(10_000).build();
/// let by_size = MokaBackend::builder()
///     .label("edge")
///     .max_bytes(64 * 1024 * 1024)
///     .build();
/// ```
pub struct MokaBackendBuilder {
    capacity: Capacity,
    label: BackendLabel,
    eviction_policy: Option<EvictionPolicy>,
}

impl Default for MokaBackendBuilder {
    fn default() -> Self {
        Self {
            capacity: Capacity::Entries(DEFAULT_MAX_ENTRIES),
            label: BackendLabel::new_static("moka"),
            eviction_policy: None,
        }
    }
}

impl MokaBackendBuilder {
    /// Bounds the cache by entry count.
    pub fn max_entries(mut self, entries: u64) -> Self {
        self.capacity = Capacity::Entries(entries);
        self
    }

    /// Bounds the cache by approximate memory use in bytes, counting keys,
    /// payloads and envelope metadata.
    pub fn max_bytes(mut self, bytes: u64) -> Self {
        self.capacity = Capacity::Bytes(bytes);
        self
    }

    /// Sets the label used in logs and metrics. Defaults to `"moka"`.
    pub fn label(mut self, label: impl Into<BackendLabel>) -> Self {
        self.label = label.into();
        self
    }

    /// Overrides the eviction policy.
    ///
    /// Entry-bounded caches default to TinyLFU. Byte-bounded caches default to
    /// LRU, since TinyLFU admission may refuse a large entry outright.
    pub fn eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_policy = Some(policy);
        self
    }

    /// Builds the backend.
    pub fn build(self) -> MokaBackend {
        let cache: Cache<CacheKey, CacheEntry<Raw>> = match self.capacity {
            Capacity::Entries(entries) => CacheBuilder::new(entries)
                .eviction_policy(self.eviction_policy.unwrap_or_else(EvictionPolicy::tiny_lfu))
                .expire_after(PhysicalTtl)
                .build(),
            Capacity::Bytes(bytes) => CacheBuilder::new(bytes)
                .weigher(weigh)
                .eviction_policy(self.eviction_policy.unwrap_or_else(EvictionPolicy::lru))
                .expire_after(PhysicalTtl)
                .build(),
        };
        MokaBackend {
            cache,
            label: self.label,
        }
    }
}

fn weigh(key: &CacheKey, entry: &CacheEntry<Raw>) -> u32 {
    u32::try_from(key.memory_size() + entry.memory_size()).unwrap_or(u32::MAX)
}
