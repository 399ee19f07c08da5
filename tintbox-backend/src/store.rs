//! Typed, fail-open access to the edge cache.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Serialize, de::DeserializeOwned};
use tintbox_core::{
    CacheEntry, CacheKey, Clock, Freshness, Offload, OffloadKey, Raw, SystemClock, TokioOffload,
};
use tracing::{debug, trace, warn};

use crate::{Backend, DeleteStatus, Format};

/// Result of a [`CacheStore::get`].
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    /// A fresh or stale entry was found.
    Hit {
        /// The decoded entry.
        entry: CacheEntry<T>,
        /// Whether the entry is past its TTL (but within its SWR window).
        stale: bool,
    },
    /// Nothing usable: absent, expired, undecodable, or the backend failed.
    Miss,
}

impl<T> Lookup<T> {
    /// Returns `true` for [`Lookup::Hit`].
    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit { .. })
    }

    /// Returns `true` for [`Lookup::Miss`].
    pub fn is_miss(&self) -> bool {
        matches!(self, Lookup::Miss)
    }

    /// Returns `true` for a stale hit.
    pub fn is_stale(&self) -> bool {
        matches!(self, Lookup::Hit { stale: true, .. })
    }
}

struct StoreInner<B, O> {
    backend: B,
    format: Format,
    clock: Arc<dyn Clock>,
    offload: O,
}

/// Typed read/write access to the shared edge cache.
///
/// `CacheStore` is an explicitly constructed handle; clone it (cheap, `Arc`
/// inside) into every component that needs the cache.
///
/// Caching is an optimization. Every backend error is logged and swallowed:
/// a failed read is a [`Lookup::Miss`], a failed write or delete is a no-op.
///
/// Background writes and evictions go through the offloader, which defaults
/// to [`TokioOffload`]; the store must then be used inside a tokio runtime.
pub struct CacheStore<B, O = TokioOffload> {
    inner: Arc<StoreInner<B, O>>,
}

impl<B, O> Clone for CacheStore<B, O> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B, O> fmt::Debug for CacheStore<B, O>
where
    B: Backend,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("backend", &self.inner.backend.label())
            .field("format", &self.inner.format)
            .field("clock", &self.inner.clock)
            .finish()
    }
}

impl<B> CacheStore<B, TokioOffload>
where
    B: Backend + 'static,
{
    /// Creates a builder around `backend`.
    pub fn builder(backend: B) -> CacheStoreBuilder<B, TokioOffload> {
        CacheStoreBuilder {
            backend,
            format: Format::default(),
            clock: Arc::new(SystemClock),
            offload: TokioOffload,
        }
    }
}

impl<B, O> CacheStore<B, O>
where
    B: Backend + 'static,
    O: Offload,
{
    /// Looks up `key` and classifies the entry.
    ///
    /// Expired entries are deleted in the background and reported as a miss;
    /// callers never see them.
    pub async fn get<T>(&self, key: &CacheKey) -> Lookup<T>
    where
        T: DeserializeOwned,
    {
        let backend = &self.inner.backend;
        let entry = match backend.read(key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                trace!(%key, "cache miss");
                return Lookup::Miss;
            }
            Err(error) => {
                warn!(%key, backend = %backend.label(), %error, "cache read failed, treating as miss");
                return Lookup::Miss;
            }
        };

        let freshness = entry.freshness(self.inner.clock.now());
        if freshness == Freshness::Expired {
            debug!(%key, cached_at = %entry.cached_at(), "expired entry, scheduling delete");
            self.spawn_evict(key);
            return Lookup::Miss;
        }

        match self.inner.format.decode::<T>(entry.payload()) {
            Ok(payload) => {
                trace!(%key, freshness = freshness.as_str(), "cache hit");
                Lookup::Hit {
                    entry: entry.map(|_| payload),
                    stale: freshness == Freshness::Stale,
                }
            }
            Err(error) => {
                warn!(%key, %error, "cached payload could not be decoded, treating as miss");
                Lookup::Miss
            }
        }
    }

    /// Writes `payload` under `key`, stamping `cached_at` with the current time.
    ///
    /// Entries carry whole-second windows; a sub-second remainder in `ttl` or
    /// `swr` rounds up.
    pub async fn set<T>(&self, key: &CacheKey, payload: &T, ttl: Duration, swr: Duration)
    where
        T: Serialize + ?Sized,
    {
        if let Some(entry) = self.encode(key, payload, ttl, swr) {
            self.write_entry(key, entry).await;
        }
    }

    /// Schedules [`set`](Self::set) in the background.
    ///
    /// The payload is encoded and `cached_at` stamped before this returns;
    /// only the backend write is deferred.
    pub fn spawn_set<T>(&self, key: &CacheKey, payload: &T, ttl: Duration, swr: Duration)
    where
        T: Serialize + ?Sized,
    {
        let Some(entry) = self.encode(key, payload, ttl, swr) else {
            return;
        };
        let store = self.clone();
        let key = key.clone();
        self.inner.offload.spawn("cache_write", async move {
            store.write_entry(&key, entry).await;
        });
    }

    /// Removes `key`. Returns `true` if an entry was deleted.
    pub async fn delete(&self, key: &CacheKey) -> bool {
        let backend = &self.inner.backend;
        match backend.remove(key).await {
            Ok(DeleteStatus::Deleted) => true,
            Ok(DeleteStatus::Missing) => false,
            Err(error) => {
                warn!(%key, backend = %backend.label(), %error, "cache delete failed");
                false
            }
        }
    }

    /// Schedules removal of an expired entry.
    ///
    /// The entry is read again first: a concurrent refill may have replaced it
    /// since it was seen expired, and that one must survive.
    fn spawn_evict(&self, key: &CacheKey) {
        let store = self.clone();
        let owned = key.clone();
        self.inner
            .offload
            .spawn_with_key(OffloadKey::Delete(key.clone()), async move {
                store.evict_expired(&owned).await;
            });
    }

    async fn evict_expired(&self, key: &CacheKey) {
        match self.inner.backend.read(key).await {
            Ok(Some(entry)) if entry.freshness(self.inner.clock.now()) == Freshness::Expired => {
                self.delete(key).await;
            }
            Ok(_) => trace!(%key, "entry refreshed or gone, nothing to evict"),
            Err(error) => warn!(%key, %error, "cache read before eviction failed"),
        }
    }

    /// Returns the clock entries are stamped with.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    /// Returns the offloader used for background writes.
    pub fn offload(&self) -> &O {
        &self.inner.offload
    }

    /// Returns the underlying backend.
    pub fn backend(&self) -> &B {
        &self.inner.backend
    }

    fn encode<T>(
        &self,
        key: &CacheKey,
        payload: &T,
        ttl: Duration,
        swr: Duration,
    ) -> Option<CacheEntry<Raw>>
    where
        T: Serialize + ?Sized,
    {
        match self.inner.format.encode(payload) {
            Ok(raw) => Some(CacheEntry::new(
                raw,
                self.inner.clock.now(),
                whole_seconds(ttl),
                whole_seconds(swr),
            )),
            Err(error) => {
                warn!(%key, %error, "payload could not be encoded, skipping cache write");
                None
            }
        }
    }

    async fn write_entry(&self, key: &CacheKey, entry: CacheEntry<Raw>) {
        let backend = &self.inner.backend;
        match backend.write(key, entry).await {
            Ok(()) => trace!(%key, "cache entry written"),
            Err(error) => {
                warn!(%key, backend = %backend.label(), %error, "cache write failed")
            }
        }
    }
}

fn whole_seconds(window: Duration) -> u64 {
    window
        .as_secs()
        .saturating_add(u64::from(window.subsec_nanos() > 0))
}

/// Builder for [`CacheStore`].
pub struct CacheStoreBuilder<B, O> {
    backend: B,
    format: Format,
    clock: Arc<dyn Clock>,
    offload: O,
}

impl<B, O> CacheStoreBuilder<B, O>
where
    B: Backend + 'static,
    O: Offload,
{
    /// Sets the payload encoding.
    pub fn format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    /// Sets the clock used for stamping and classification.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the offloader used for background writes and deletes.
    pub fn offload<NewO: Offload>(self, offload: NewO) -> CacheStoreBuilder<B, NewO> {
        CacheStoreBuilder {
            backend: self.backend,
            format: self.format,
            clock: self.clock,
            offload,
        }
    }

    /// Builds the store.
    pub fn build(self) -> CacheStore<B, O> {
        CacheStore {
            inner: Arc::new(StoreInner {
                backend: self.backend,
                format: self.format,
                clock: self.clock,
                offload: self.offload,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use dashmap::DashMap;
    use tintbox_core::{CacheKeyBuilder, MockClock, SmolStr};
    use tokio::task::JoinHandle;

    use super::*;
    use crate::{BackendError, BackendResult};

    #[derive(Default)]
    struct MapBackend {
        entries: DashMap<CacheKey, CacheEntry<Raw>>,
    }

    #[async_trait]
    impl Backend for MapBackend {
        async fn read(&self, key: &CacheKey) -> BackendResult<Option<CacheEntry<Raw>>> {
            Ok(self.entries.get(key).map(|e| e.value().clone()))
        }

        async fn write(&self, key: &CacheKey, entry: CacheEntry<Raw>) -> BackendResult<()> {
            self.entries.insert(key.clone(), entry);
            Ok(())
        }

        async fn remove(&self, key: &CacheKey) -> BackendResult<DeleteStatus> {
            Ok(match self.entries.remove(key) {
                Some(_) => DeleteStatus::Deleted,
                None => DeleteStatus::Missing,
            })
        }
    }

    struct BrokenBackend;

    fn broken() -> BackendError {
        BackendError::unavailable(std::io::Error::other("connection refused"))
    }

    #[async_trait]
    impl Backend for BrokenBackend {
        async fn read(&self, _key: &CacheKey) -> BackendResult<Option<CacheEntry<Raw>>> {
            Err(broken())
        }

        async fn write(&self, _key: &CacheKey, _entry: CacheEntry<Raw>) -> BackendResult<()> {
            Err(broken())
        }

        async fn remove(&self, _key: &CacheKey) -> BackendResult<DeleteStatus> {
            Err(broken())
        }
    }

    /// Spawns onto tokio and remembers the handles so tests can join them.
    #[derive(Clone, Default)]
    struct JoinOffload {
        handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
    }

    impl JoinOffload {
        async fn join_all(&self) {
            let handles: Vec<_> = self.handles.lock().unwrap().drain(..).collect();
            for handle in handles {
                handle.await.unwrap();
            }
        }
    }

    impl Offload for JoinOffload {
        fn spawn<F>(&self, _kind: impl Into<SmolStr>, future: F)
        where
            F: Future<Output = ()> + Send + 'static,
        {
            self.handles.lock().unwrap().push(tokio::spawn(future));
        }

        fn spawn_with_key<F>(&self, _key: OffloadKey, future: F) -> bool
        where
            F: Future<Output = ()> + Send + 'static,
        {
            self.handles.lock().unwrap().push(tokio::spawn(future));
            true
        }
    }

    fn key() -> CacheKey {
        CacheKeyBuilder::new("match").param("hex", "#00ff00").build()
    }

    const TTL: Duration = Duration::from_secs(300);
    const SWR: Duration = Duration::from_secs(120);

    #[tokio::test]
    async fn test_get_classifies_fresh_stale_expired() {
        let clock = MockClock::starting_now();
        let offload = JoinOffload::default();
        let store = CacheStore::builder(MapBackend::default())
            .clock(Arc::new(clock.clone()))
            .offload(offload.clone())
            .build();

        store.set(&key(), "v1", TTL, SWR).await;

        let fresh = store.get::<String>(&key()).await;
        assert!(fresh.is_hit() && !fresh.is_stale());

        clock.advance_secs(300);
        assert!(!store.get::<String>(&key()).await.is_stale());

        clock.advance_secs(1);
        let stale = store.get::<String>(&key()).await;
        assert!(stale.is_stale());

        clock.advance_secs(120);
        assert!(store.get::<String>(&key()).await.is_miss());
        offload.join_all().await;
        assert!(store.backend().entries.is_empty(), "expired entry purged");
    }

    #[tokio::test]
    async fn test_metadata_is_written_as_given() {
        let clock = MockClock::starting_now();
        let store = CacheStore::builder(MapBackend::default())
            .clock(Arc::new(clock.clone()))
            .build();

        store.set(&key(), &42u32, TTL, SWR).await;

        let Lookup::Hit { entry, stale } = store.get::<u32>(&key()).await else {
            panic!("expected a hit");
        };
        assert!(!stale);
        assert_eq!(*entry.payload(), 42);
        assert_eq!(entry.cached_at(), clock.now());
        assert_eq!(entry.ttl(), 300);
        assert_eq!(entry.swr(), 120);
    }

    #[tokio::test]
    async fn test_sub_second_windows_round_up() {
        let clock = MockClock::starting_now();
        let store = CacheStore::builder(MapBackend::default())
            .clock(Arc::new(clock.clone()))
            .build();

        store
            .set(&key(), "v1", Duration::from_millis(1500), Duration::from_millis(900))
            .await;

        clock.advance(chrono::Duration::milliseconds(1200));
        let Lookup::Hit { entry, stale } = store.get::<String>(&key()).await else {
            panic!("expected a hit");
        };
        assert!(!stale);
        assert_eq!((entry.ttl(), entry.swr()), (2, 1));

        clock.advance(chrono::Duration::milliseconds(1000));
        assert!(store.get::<String>(&key()).await.is_stale());
    }

    #[tokio::test]
    async fn test_default_offload_writes_in_background() {
        let store = CacheStore::builder(MapBackend::default()).build();

        store.spawn_set(&key(), "v1", TTL, SWR);
        for _ in 0..200 {
            if store.get::<String>(&key()).await.is_hit() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("background write never landed");
    }

    #[tokio::test]
    async fn test_spawn_set_writes_in_background() {
        let offload = JoinOffload::default();
        let store = CacheStore::builder(MapBackend::default())
            .format(Format::Bincode)
            .offload(offload.clone())
            .build();

        store.spawn_set(&key(), "v1", TTL, SWR);
        offload.join_all().await;

        assert!(store.get::<String>(&key()).await.is_hit());
    }

    #[tokio::test]
    async fn test_backend_errors_fail_open() {
        let store = CacheStore::builder(BrokenBackend).build();

        store.set(&key(), "v1", TTL, SWR).await;
        assert!(store.get::<String>(&key()).await.is_miss());
        assert!(!store.delete(&key()).await);
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_a_miss() {
        let store = CacheStore::builder(MapBackend::default()).build();
        store.set(&key(), "not a number", TTL, SWR).await;
        assert!(store.get::<u64>(&key()).await.is_miss());
    }

    #[tokio::test]
    async fn test_delete_reports_presence() {
        let store = CacheStore::builder(MapBackend::default()).build();
        store.set(&key(), "v1", TTL, SWR).await;
        assert!(store.delete(&key()).await);
        assert!(!store.delete(&key()).await);
    }
}
