use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tintbox_backend::{Backend, BackendError, BackendResult, DeleteStatus};
use tintbox_core::{BackendLabel, CacheEntry, CacheKey, Raw};

/// Operation counts, shared between clones of a backend.
#[derive(Debug, Default)]
pub struct BackendCounters {
    pub read_count: AtomicUsize,
    pub write_count: AtomicUsize,
    pub remove_count: AtomicUsize,
}

impl BackendCounters {
    pub fn read_count(&self) -> usize {
        self.read_count.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.write_count.load(Ordering::SeqCst)
    }

    pub fn remove_count(&self) -> usize {
        self.remove_count.load(Ordering::SeqCst)
    }
}

/// In-memory edge cache that never reaps and counts every operation.
///
/// Entries stay until removed, so tests can observe the store deleting
/// expired entries on its own.
#[derive(Clone, Debug, Default)]
pub struct MockBackend {
    pub cache: Arc<DashMap<CacheKey, CacheEntry<Raw>>>,
    pub counters: Arc<BackendCounters>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_count(&self) -> usize {
        self.counters.read_count()
    }

    pub fn write_count(&self) -> usize {
        self.counters.write_count()
    }

    pub fn remove_count(&self) -> usize {
        self.counters.remove_count()
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.cache.contains_key(key)
    }

    /// Returns the stored envelope of `key`.
    pub fn entry(&self, key: &CacheKey) -> Option<CacheEntry<Raw>> {
        self.cache.get(key).map(|entry| entry.value().clone())
    }

    pub fn cache_entry_count(&self) -> usize {
        self.cache.len()
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn read(&self, key: &CacheKey) -> BackendResult<Option<CacheEntry<Raw>>> {
        self.counters.read_count.fetch_add(1, Ordering::SeqCst);
        Ok(self.entry(key))
    }

    async fn write(&self, key: &CacheKey, entry: CacheEntry<Raw>) -> BackendResult<()> {
        self.counters.write_count.fetch_add(1, Ordering::SeqCst);
        self.cache.insert(key.clone(), entry);
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> BackendResult<DeleteStatus> {
        self.counters.remove_count.fetch_add(1, Ordering::SeqCst);
        match self.cache.remove(key) {
            Some(_) => Ok(DeleteStatus::Deleted),
            None => Ok(DeleteStatus::Missing),
        }
    }

    fn label(&self) -> BackendLabel {
        BackendLabel::new_static("mock")
    }
}

/// Edge cache that is always unreachable.
#[derive(Clone, Debug, Default)]
pub struct FailingBackend {
    pub counters: Arc<BackendCounters>,
}

fn connection_refused() -> BackendError {
    BackendError::unavailable(std::io::Error::other("connection refused"))
}

#[async_trait]
impl Backend for FailingBackend {
    async fn read(&self, _key: &CacheKey) -> BackendResult<Option<CacheEntry<Raw>>> {
        self.counters.read_count.fetch_add(1, Ordering::SeqCst);
        Err(connection_refused())
    }

    async fn write(&self, _key: &CacheKey, _entry: CacheEntry<Raw>) -> BackendResult<()> {
        self.counters.write_count.fetch_add(1, Ordering::SeqCst);
        Err(connection_refused())
    }

    async fn remove(&self, _key: &CacheKey) -> BackendResult<DeleteStatus> {
        self.counters.remove_count.fetch_add(1, Ordering::SeqCst);
        Err(connection_refused())
    }

    fn label(&self) -> BackendLabel {
        BackendLabel::new_static("failing")
    }
}
