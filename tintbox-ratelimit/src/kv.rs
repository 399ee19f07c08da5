//! Versioned key-value storage for the distributed limiter.
//!
//! A [`KvStore`] holds one [`WindowRecord`] per key together with a version.
//! Writes are conditional: [`KvStore::write_if_version`] only applies when the
//! version the caller read is still the one stored, which is all the
//! [`DistributedLimiter`](crate::DistributedLimiter) needs to count without
//! locks. Stores reap a record on their own once its `expires_at` passes.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use tintbox_core::{Clock, SystemClock};

use crate::error::KvError;

/// Fixed-window counter for one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowRecord {
    /// Requests recorded in this window.
    pub count: u64,
    /// First request of the window.
    pub window_start: DateTime<Utc>,
    /// End of the window. Stamped once, never extended.
    pub expires_at: DateTime<Utc>,
}

impl WindowRecord {
    /// A window opened by a request at `now`, already counting it.
    pub fn start(now: DateTime<Utc>, window: chrono::Duration) -> Self {
        Self {
            count: 1,
            window_start: now,
            expires_at: now + window,
        }
    }

    /// The same window with one more request.
    pub fn incremented(&self) -> Self {
        Self {
            count: self.count.saturating_add(1),
            ..self.clone()
        }
    }

    /// Whether the window is over at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// A value paired with the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    /// The stored value.
    pub value: T,
    /// Opaque version; changes on every applied write.
    pub version: u64,
}

/// Result of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The write was applied and the record now has `version`.
    Applied {
        /// Version assigned to the new record.
        version: u64,
    },
    /// Another writer changed the record since it was read.
    Conflict,
}

/// Shared store behind a [`DistributedLimiter`](crate::DistributedLimiter).
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Reads the record for `key` and its current version.
    async fn read(&self, key: &str) -> Result<Option<Versioned<WindowRecord>>, KvError>;

    /// Writes `record` if the stored version still equals `expected`
    /// (`None` meaning "no record"), and arranges for it to be reaped at
    /// `record.expires_at`.
    async fn write_if_version(
        &self,
        key: &str,
        record: &WindowRecord,
        expected: Option<u64>,
    ) -> Result<WriteOutcome, KvError>;
}

#[async_trait]
impl<S> KvStore for Arc<S>
where
    S: KvStore + ?Sized,
{
    async fn read(&self, key: &str) -> Result<Option<Versioned<WindowRecord>>, KvError> {
        (**self).read(key).await
    }

    async fn write_if_version(
        &self,
        key: &str,
        record: &WindowRecord,
        expected: Option<u64>,
    ) -> Result<WriteOutcome, KvError> {
        (**self).write_if_version(key, record, expected).await
    }
}

/// In-process [`KvStore`].
///
/// Useful for tests and for running the distributed limiter on a single node.
/// Expired records are reaped lazily when read. Versions come from one
/// store-wide counter, so a key that is reaped and recreated never reuses a
/// version.
pub struct MemoryKvStore {
    records: DashMap<String, Versioned<WindowRecord>>,
    next_version: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for MemoryKvStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryKvStore")
            .field("records", &self.records.len())
            .finish()
    }
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl MemoryKvStore {
    /// Creates an empty store that reaps against `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: DashMap::new(),
            next_version: AtomicU64::new(0),
            clock,
        }
    }

    /// Number of records currently held, expired or not.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn read(&self, key: &str) -> Result<Option<Versioned<WindowRecord>>, KvError> {
        let now = self.clock.now();
        let expired_version = match self.records.get(key) {
            Some(entry) if !entry.value().value.is_expired(now) => {
                return Ok(Some(entry.value().clone()));
            }
            Some(entry) => entry.value().version,
            None => return Ok(None),
        };
        self.records
            .remove_if(key, |_, record| record.version == expired_version);
        Ok(None)
    }

    async fn write_if_version(
        &self,
        key: &str,
        record: &WindowRecord,
        expected: Option<u64>,
    ) -> Result<WriteOutcome, KvError> {
        let applied = |version| Versioned {
            value: record.clone(),
            version,
        };
        let outcome = match (self.records.entry(key.to_owned()), expected) {
            (Entry::Vacant(slot), None) => {
                let version = self.next_version.fetch_add(1, Ordering::Relaxed) + 1;
                slot.insert(applied(version));
                WriteOutcome::Applied { version }
            }
            (Entry::Occupied(mut slot), Some(expected)) if slot.get().version == expected => {
                let version = self.next_version.fetch_add(1, Ordering::Relaxed) + 1;
                slot.insert(applied(version));
                WriteOutcome::Applied { version }
            }
            _ => WriteOutcome::Conflict,
        };
        Ok(outcome)
    }
}
