//! The lookup, fetch and store pipeline.
//!
//! ```text
//! fetch(key) ──► CacheStore::get ──► Hit (fresh) ─────────────────► Cache
//!                      │          └► Hit (stale) ─► revalidate ────► Cache, stale
//!                      ▼
//!                    Miss ─► coalesce(Fetch(key)) ─► upstream ─► spawn_set ─► Upstream
//! ```

use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use serde::{Serialize, de::DeserializeOwned};
use tintbox_backend::{Backend, CacheStore, Lookup};
use tintbox_core::{CacheKey, Offload};
use tracing::{debug, instrument};

use crate::coalesce::{FlightKey, RequestCoalescer};
use crate::error::FetchError;
use crate::metrics::{self, LookupStatus};
use crate::offload::OffloadManager;
use crate::policy::CachePolicy;
use crate::revalidate::BackgroundRevalidator;

/// Upstream timeout used when none is configured.
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10);

/// Where the data of a [`Fetched`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    /// Served from the edge cache.
    Cache,
    /// Fetched from the upstream (directly or through a joined flight).
    Upstream,
}

impl ResponseSource {
    /// Returns the source as a lowercase label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Upstream => "upstream",
        }
    }
}

/// Successful result of [`CachedFetch::fetch`].
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<T> {
    /// The payload.
    pub data: T,
    /// Where it came from.
    pub source: ResponseSource,
    /// `true` when a stale entry was served; a refresh has been scheduled.
    pub stale: bool,
}

/// Runs an upstream future under a deadline and records its outcome.
pub(crate) async fn call_upstream<T, Fut>(
    namespace: &str,
    timeout: Duration,
    upstream: Fut,
) -> Result<T, FetchError>
where
    Fut: Future<Output = Result<T, FetchError>>,
{
    let start = Instant::now();
    let result = tokio::time::timeout(timeout, upstream)
        .await
        .unwrap_or_else(|_| Err(FetchError::Timeout(timeout)));
    let outcome = match &result {
        Ok(_) => "success",
        Err(FetchError::Timeout(_)) => "timeout",
        Err(_) => "error",
    };
    metrics::record_upstream(namespace, start.elapsed(), outcome);
    result
}

/// Edge-cached access to an upstream.
///
/// Composes a [`CacheStore`], a [`RequestCoalescer`] and a
/// [`BackgroundRevalidator`]. Cache failures never reach the caller; upstream
/// failures on a miss do, since there is nothing to fall back to.
pub struct CachedFetch<T, B, O = OffloadManager> {
    store: CacheStore<B, O>,
    coalescer: RequestCoalescer<FlightKey, T, FetchError>,
    revalidator: BackgroundRevalidator<T, B, O>,
    upstream_timeout: Duration,
}

impl<T, B, O> Clone for CachedFetch<T, B, O> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            coalescer: self.coalescer.clone(),
            revalidator: self.revalidator.clone(),
            upstream_timeout: self.upstream_timeout,
        }
    }
}

impl<T, B, O> fmt::Debug for CachedFetch<T, B, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedFetch")
            .field("upstream_timeout", &self.upstream_timeout)
            .finish_non_exhaustive()
    }
}

impl<T, B, O> CachedFetch<T, B, O>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    B: Backend + 'static,
    O: Offload,
{
    /// Creates a builder over `store`. Background work (cache writes, lazy
    /// deletes, revalidations) goes through the store's offloader.
    pub fn builder(store: CacheStore<B, O>) -> CachedFetchBuilder<T, B, O> {
        CachedFetchBuilder {
            store,
            coalescer: None,
            upstream_timeout: DEFAULT_UPSTREAM_TIMEOUT,
        }
    }

    /// Returns data for `key`, from the cache when possible.
    ///
    /// `upstream` is called at most once, and only when this caller starts
    /// an upstream flight: on a miss with no identical fetch in flight, or
    /// from the background when a stale entry is refreshed.
    #[instrument(skip_all, fields(key = %key))]
    pub async fn fetch<F, Fut>(
        &self,
        key: &CacheKey,
        policy: &CachePolicy,
        upstream: F,
    ) -> Result<Fetched<T>, FetchError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        let windows = policy.windows();

        if let Some((ttl, stale)) = windows {
            match self.store.get::<T>(key).await {
                Lookup::Hit {
                    entry,
                    stale: false,
                } => {
                    metrics::record_lookup(LookupStatus::Hit, key.namespace());
                    return Ok(Fetched {
                        data: entry.into_payload(),
                        source: ResponseSource::Cache,
                        stale: false,
                    });
                }
                Lookup::Hit { entry, stale: true } => {
                    metrics::record_lookup(LookupStatus::Stale, key.namespace());
                    debug!(cached_at = %entry.cached_at(), "serving stale entry");
                    self.revalidator.schedule(key, ttl, stale, upstream);
                    return Ok(Fetched {
                        data: entry.into_payload(),
                        source: ResponseSource::Cache,
                        stale: true,
                    });
                }
                Lookup::Miss => metrics::record_lookup(LookupStatus::Miss, key.namespace()),
            }
        }

        let store = self.store.clone();
        let owned = key.clone();
        let timeout = self.upstream_timeout;
        let data = self
            .coalescer
            .coalesce(FlightKey::Fetch(key.clone()), move || async move {
                let data = call_upstream(owned.namespace(), timeout, upstream()).await?;
                if let Some((ttl, stale)) = windows {
                    store.spawn_set(&owned, &data, ttl, stale);
                }
                Ok(data)
            })
            .await?;

        Ok(Fetched {
            data,
            source: ResponseSource::Upstream,
            stale: false,
        })
    }

    /// Removes `key` from the cache. Returns `true` if an entry was deleted.
    pub async fn invalidate(&self, key: &CacheKey) -> bool {
        self.store.delete(key).await
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &CacheStore<B, O> {
        &self.store
    }

    /// Returns the coalescer shared by fetches and revalidations.
    pub fn coalescer(&self) -> &RequestCoalescer<FlightKey, T, FetchError> {
        &self.coalescer
    }

    /// Returns the revalidator.
    pub fn revalidator(&self) -> &BackgroundRevalidator<T, B, O> {
        &self.revalidator
    }
}

/// Builder for [`CachedFetch`].
pub struct CachedFetchBuilder<T, B, O> {
    store: CacheStore<B, O>,
    coalescer: Option<RequestCoalescer<FlightKey, T, FetchError>>,
    upstream_timeout: Duration,
}

impl<T, B, O> CachedFetchBuilder<T, B, O>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    B: Backend + 'static,
    O: Offload,
{
    /// Sets the deadline for each upstream call.
    pub fn upstream_timeout(mut self, timeout: Duration) -> Self {
        self.upstream_timeout = timeout;
        self
    }

    /// Shares a coalescer with other fetchers of the same payload type.
    pub fn coalescer(mut self, coalescer: RequestCoalescer<FlightKey, T, FetchError>) -> Self {
        self.coalescer = Some(coalescer);
        self
    }

    /// Builds the fetcher.
    pub fn build(self) -> CachedFetch<T, B, O> {
        let coalescer = self.coalescer.unwrap_or_default();
        let revalidator =
            BackgroundRevalidator::new(self.store.clone(), coalescer.clone(), self.upstream_timeout);
        CachedFetch {
            store: self.store,
            coalescer,
            revalidator,
            upstream_timeout: self.upstream_timeout,
        }
    }
}
