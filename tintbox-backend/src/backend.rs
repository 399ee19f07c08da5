use std::sync::Arc;

use async_trait::async_trait;
use tintbox_core::{BackendLabel, CacheEntry, CacheKey, Raw};

use crate::{BackendError, DeleteStatus};

pub type BackendResult<T> = Result<T, BackendError>;

/// Raw transport to a shared edge cache.
///
/// Backends store the whole [`CacheEntry`] envelope. `cached_at`, `ttl` and
/// `swr` must come back exactly as written; freshness is never recomputed at
/// write time. A backend may reap an entry once
/// [`CacheEntry::physical_ttl`] has elapsed.
#[async_trait]
pub trait Backend: Sync + Send {
    async fn read(&self, key: &CacheKey) -> BackendResult<Option<CacheEntry<Raw>>>;

    async fn write(&self, key: &CacheKey, entry: CacheEntry<Raw>) -> BackendResult<()>;

    async fn remove(&self, key: &CacheKey) -> BackendResult<DeleteStatus>;

    /// Returns the label of this backend for logs and metrics.
    fn label(&self) -> BackendLabel {
        BackendLabel::new_static("backend")
    }
}

#[async_trait]
impl Backend for Box<dyn Backend> {
    async fn read(&self, key: &CacheKey) -> BackendResult<Option<CacheEntry<Raw>>> {
        (**self).read(key).await
    }

    async fn write(&self, key: &CacheKey, entry: CacheEntry<Raw>) -> BackendResult<()> {
        (**self).write(key, entry).await
    }

    async fn remove(&self, key: &CacheKey) -> BackendResult<DeleteStatus> {
        (**self).remove(key).await
    }

    fn label(&self) -> BackendLabel {
        (**self).label()
    }
}

#[async_trait]
impl Backend for Arc<dyn Backend + Send + 'static> {
    async fn read(&self, key: &CacheKey) -> BackendResult<Option<CacheEntry<Raw>>> {
        (**self).read(key).await
    }

    async fn write(&self, key: &CacheKey, entry: CacheEntry<Raw>) -> BackendResult<()> {
        (**self).write(key, entry).await
    }

    async fn remove(&self, key: &CacheKey) -> BackendResult<DeleteStatus> {
        (**self).remove(key).await
    }

    fn label(&self) -> BackendLabel {
        (**self).label()
    }
}
