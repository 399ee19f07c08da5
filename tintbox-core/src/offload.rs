//! Fire-and-forget work off the response path.
//!
//! Cache writes, lazy deletion of expired entries and stale revalidations are
//! handed to an [`Offload`] implementation instead of being awaited.

use std::future::Future;

use smol_str::SmolStr;

use crate::CacheKey;

/// Identity of an offloaded task.
///
/// Tasks with a cache-derived key are deduplicated: while one is in flight a
/// second spawn with an equal key is skipped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OffloadKey {
    /// Background refresh of a stale entry.
    Revalidate(CacheKey),
    /// Lazy deletion of an expired entry.
    Delete(CacheKey),
    /// Auto-generated key for tasks that are never deduplicated.
    Generated {
        /// Kind of the task (e.g., "cache_write").
        kind: SmolStr,
        /// Unique identifier within the kind.
        id: u64,
    },
}

impl OffloadKey {
    /// Returns the key type for metrics labels and spans.
    pub fn key_type(&self) -> SmolStr {
        match self {
            Self::Revalidate(_) => SmolStr::new_static("revalidate"),
            Self::Delete(_) => SmolStr::new_static("delete"),
            Self::Generated { kind, .. } => kind.clone(),
        }
    }

    /// Whether tasks with this key participate in deduplication.
    pub fn is_deduplicated(&self) -> bool {
        !matches!(self, Self::Generated { .. })
    }
}

/// Spawner of background tasks.
///
/// Clones must share state, so that deduplication spans every clone.
pub trait Offload: Send + Sync + Clone + 'static {
    /// Spawn a future with an auto-generated key of the given kind.
    fn spawn<F>(&self, kind: impl Into<SmolStr>, future: F)
    where
        F: Future<Output = ()> + Send + 'static;

    /// Spawn a future under `key`. Returns `false` if it was deduplicated.
    fn spawn_with_key<F>(&self, key: OffloadKey, future: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static;
}

/// Offload implementation that spawns every task onto the ambient tokio
/// runtime.
///
/// No deduplication and no bookkeeping: every spawn runs. This is the
/// default of a store built without an explicit offloader; a deployment that
/// wants deduplication, timeouts and `wait_all` uses the manager in `tintbox`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioOffload;

impl Offload for TokioOffload {
    fn spawn<F>(&self, _kind: impl Into<SmolStr>, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(future);
    }

    fn spawn_with_key<F>(&self, _key: OffloadKey, future: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(future);
        true
    }
}

/// Offload implementation that drops every task without running it.
///
/// A store using it never writes after a miss, never revalidates and never
/// evicts. Only suitable for read-only handles, e.g. administrative lookups.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledOffload;

impl Offload for DisabledOffload {
    fn spawn<F>(&self, _kind: impl Into<SmolStr>, _future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
    }

    fn spawn_with_key<F>(&self, _key: OffloadKey, _future: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        false
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use tokio::sync::oneshot;

    use super::*;
    use crate::CacheKeyBuilder;

    #[tokio::test]
    async fn test_tokio_offload_runs_every_task() {
        let (tx, rx) = oneshot::channel();
        TokioOffload.spawn("cache_write", async move {
            let _ = tx.send(1);
        });
        assert_eq!(rx.await, Ok(1));

        let key = OffloadKey::Revalidate(CacheKeyBuilder::new("match").build());
        let (tx, rx) = oneshot::channel();
        assert!(TokioOffload.spawn_with_key(key, async move {
            let _ = tx.send(2);
        }));
        assert_eq!(rx.await, Ok(2));
    }

    #[tokio::test]
    async fn test_disabled_offload_drops_tasks() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let key = OffloadKey::Delete(CacheKeyBuilder::new("match").build());
        assert!(!DisabledOffload.spawn_with_key(key, async move {
            flag.store(true, Ordering::SeqCst);
        }));
        tokio::task::yield_now().await;
        assert!(!ran.load(Ordering::SeqCst));
    }
}
