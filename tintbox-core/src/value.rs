//! Cached value types with freshness metadata.
//!
//! This module provides the envelope stored in the edge cache:
//!
//! - [`CacheEntry`] - Payload plus `cached_at`, TTL and SWR window
//! - [`Freshness`] - Classification of an entry at a given instant
//!
//! ## Fresh, stale and expired
//!
//! Given `age = now - cached_at`:
//!
//! - **Fresh** - `age <= ttl`
//! - **Stale** - `ttl < age <= ttl + swr`; usable, refreshed in the background
//! - **Expired** - `age > ttl + swr`; never handed to callers
//!
//! The classification is computed on read. Nothing about it is stored, so the
//! three metadata fields must survive storage exactly as written.
//!
//! ```
//! use chrono::{Duration, Utc};
//! use tintbox_core::{CacheEntry, Freshness};
//!
//! let now = Utc::now();
//! let entry = CacheEntry::new("v1", now, 300, 120);
//!
//! assert_eq!(entry.freshness(now + Duration::seconds(300)), Freshness::Fresh);
//! assert_eq!(entry.freshness(now + Duration::seconds(301)), Freshness::Stale);
//! assert_eq!(entry.freshness(now + Duration::seconds(421)), Freshness::Expired);
//! ```

use std::mem::size_of;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Raw;

/// Freshness state of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Freshness {
    /// Entry is within its TTL.
    Fresh,
    /// Entry is past its TTL but within the stale-while-revalidate window.
    Stale,
    /// Entry is past both windows.
    Expired,
}

impl Freshness {
    /// Returns the state as a string slice.
    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Freshness::Fresh => "fresh",
            Freshness::Stale => "stale",
            Freshness::Expired => "expired",
        }
    }
}

/// A cached payload with freshness metadata.
///
/// Entries are written once per refresh and are immutable until overwritten or
/// deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    payload: T,
    cached_at: DateTime<Utc>,
    ttl: u64,
    swr: u64,
}

impl<T> CacheEntry<T> {
    /// Creates a new entry.
    ///
    /// * `payload` - The data to cache
    /// * `cached_at` - Write timestamp
    /// * `ttl` - Freshness window in seconds
    /// * `swr` - Stale-while-revalidate window in seconds
    pub fn new(payload: T, cached_at: DateTime<Utc>, ttl: u64, swr: u64) -> Self {
        CacheEntry {
            payload,
            cached_at,
            ttl,
            swr,
        }
    }

    /// Returns a reference to the payload.
    #[inline]
    pub fn payload(&self) -> &T {
        &self.payload
    }

    /// Returns the write timestamp.
    #[inline]
    pub fn cached_at(&self) -> DateTime<Utc> {
        self.cached_at
    }

    /// Returns the freshness window in seconds.
    #[inline]
    pub fn ttl(&self) -> u64 {
        self.ttl
    }

    /// Returns the stale-while-revalidate window in seconds.
    #[inline]
    pub fn swr(&self) -> u64 {
        self.swr
    }

    /// Consumes the entry and returns the payload.
    pub fn into_payload(self) -> T {
        self.payload
    }

    /// Replaces the payload, keeping the metadata.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CacheEntry<U> {
        CacheEntry {
            payload: f(self.payload),
            cached_at: self.cached_at,
            ttl: self.ttl,
            swr: self.swr,
        }
    }

    /// Age of the entry at `now`. Clock skew never yields a negative age.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        (now - self.cached_at).max(chrono::Duration::zero())
    }

    /// Classify the entry at `now`.
    pub fn freshness(&self, now: DateTime<Utc>) -> Freshness {
        let age = self.age(now);
        let ttl = seconds(self.ttl);
        if age <= ttl {
            Freshness::Fresh
        } else if age <= ttl + seconds(self.swr) {
            Freshness::Stale
        } else {
            Freshness::Expired
        }
    }

    /// Total lifetime (`ttl + swr`) after which a backend may reap the entry.
    pub fn physical_ttl(&self) -> Duration {
        Duration::from_secs(self.ttl.saturating_add(self.swr))
    }

    /// Instant after which the entry is expired.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.cached_at + seconds(self.ttl.saturating_add(self.swr))
    }
}

impl CacheEntry<Raw> {
    /// Returns the estimated memory usage of this entry in bytes.
    pub fn memory_size(&self) -> usize {
        size_of::<Self>() + self.payload.len()
    }
}

/// Windows are capped at `u32::MAX` seconds so date arithmetic cannot overflow.
fn seconds(secs: u64) -> chrono::Duration {
    chrono::Duration::seconds(secs.min(u64::from(u32::MAX)) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).single().unwrap()
    }

    #[test]
    fn test_freshness_boundaries() {
        let entry = CacheEntry::new((), at(0), 300, 120);
        assert_eq!(entry.freshness(at(0)), Freshness::Fresh);
        assert_eq!(entry.freshness(at(300)), Freshness::Fresh);
        assert_eq!(entry.freshness(at(301)), Freshness::Stale);
        assert_eq!(entry.freshness(at(420)), Freshness::Stale);
        assert_eq!(entry.freshness(at(421)), Freshness::Expired);
    }

    #[test]
    fn test_zero_swr_goes_straight_to_expired() {
        let entry = CacheEntry::new((), at(0), 10, 0);
        assert_eq!(entry.freshness(at(10)), Freshness::Fresh);
        assert_eq!(entry.freshness(at(11)), Freshness::Expired);
    }

    #[test]
    fn test_future_cached_at_is_fresh() {
        let entry = CacheEntry::new((), at(100), 10, 0);
        assert_eq!(entry.age(at(0)), chrono::Duration::zero());
        assert_eq!(entry.freshness(at(0)), Freshness::Fresh);
    }

    #[test]
    fn test_physical_ttl_and_expiry() {
        let entry = CacheEntry::new((), at(0), 300, 120);
        assert_eq!(entry.physical_ttl(), Duration::from_secs(420));
        assert_eq!(entry.expires_at(), at(420));
    }

    #[test]
    fn test_envelope_serde_keeps_metadata() {
        let entry = CacheEntry::new("payload".to_owned(), at(5), 60, 30);
        let json = serde_json::to_string(&entry).unwrap();
        let back: CacheEntry<String> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }
}
