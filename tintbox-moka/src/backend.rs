//! Moka backend implementation.

use async_trait::async_trait;
use moka::future::Cache;
use tintbox_backend::{Backend, BackendResult, DeleteStatus};
use tintbox_core::{BackendLabel, CacheEntry, CacheKey, Raw};
use tracing::trace;

use crate::builder::MokaBackendBuilder;

/// In-process edge cache backend powered by Moka.
///
/// Entries are kept as [`CacheEntry`] envelopes, so `cached_at`, `ttl` and
/// `swr` come back exactly as written. Moka reaps each entry once its
/// [`physical_ttl`](CacheEntry::physical_ttl) has elapsed; until then the
/// [`CacheStore`](tintbox_backend::CacheStore) classifies it on read.
///
/// Cloning is cheap and clones share the same cache.
#[derive(Clone)]
pub struct MokaBackend {
    pub(crate) cache: Cache<CacheKey, CacheEntry<Raw>>,
    pub(crate) label: BackendLabel,
}

impl std::fmt::Debug for MokaBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MokaBackend")
            .field("label", &self.label)
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}

impl MokaBackend {
    /// Creates a builder holding up to
    /// [`DEFAULT_MAX_ENTRIES`](crate::DEFAULT_MAX_ENTRIES) entries.
    pub fn builder() -> MokaBackendBuilder {
        MokaBackendBuilder::default()
    }

    /// Returns the underlying Moka cache.
    pub fn cache(&self) -> &Cache<CacheKey, CacheEntry<Raw>> {
        &self.cache
    }
}

#[async_trait]
impl Backend for MokaBackend {
    async fn read(&self, key: &CacheKey) -> BackendResult<Option<CacheEntry<Raw>>> {
        Ok(self.cache.get(key).await)
    }

    async fn write(&self, key: &CacheKey, entry: CacheEntry<Raw>) -> BackendResult<()> {
        trace!(%key, ttl = entry.ttl(), swr = entry.swr(), "moka write");
        self.cache.insert(key.clone(), entry).await;
        crate::metrics::record_occupancy(
            self.label.as_str(),
            self.cache.entry_count(),
            self.cache.weighted_size(),
        );
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> BackendResult<DeleteStatus> {
        match self.cache.remove(key).await {
            Some(_) => Ok(DeleteStatus::Deleted),
            None => Ok(DeleteStatus::Missing),
        }
    }

    fn label(&self) -> BackendLabel {
        self.label.clone()
    }
}
