//! Stale-while-revalidate refreshes.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use tintbox_backend::{Backend, CacheStore};
use tintbox_core::{CacheKey, Offload, OffloadKey};
use tracing::{debug, instrument, warn};

use crate::coalesce::{FlightKey, RequestCoalescer};
use crate::error::FetchError;
use crate::fetch::call_upstream;
use crate::metrics;

/// Refreshes stale entries in the background.
///
/// A refresh is spawned through the store's offloader under
/// [`OffloadKey::Revalidate`], so at most one is scheduled per key, and its
/// upstream call runs through the coalescer under [`FlightKey::Revalidate`].
/// A failed refresh leaves the stale entry as it is; it keeps being served
/// until its stale window runs out.
pub struct BackgroundRevalidator<T, B, O> {
    store: CacheStore<B, O>,
    coalescer: RequestCoalescer<FlightKey, T, FetchError>,
    upstream_timeout: Duration,
}

impl<T, B, O> Clone for BackgroundRevalidator<T, B, O> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            coalescer: self.coalescer.clone(),
            upstream_timeout: self.upstream_timeout,
        }
    }
}

impl<T, B, O> fmt::Debug for BackgroundRevalidator<T, B, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundRevalidator")
            .field("upstream_timeout", &self.upstream_timeout)
            .finish_non_exhaustive()
    }
}

impl<T, B, O> BackgroundRevalidator<T, B, O>
where
    T: Serialize + Clone + Send + Sync + 'static,
    B: Backend + 'static,
    O: Offload,
{
    /// Creates a revalidator writing to `store`.
    pub fn new(
        store: CacheStore<B, O>,
        coalescer: RequestCoalescer<FlightKey, T, FetchError>,
        upstream_timeout: Duration,
    ) -> Self {
        Self {
            store,
            coalescer,
            upstream_timeout,
        }
    }

    /// Schedules a refresh of `key`. Returns `false` if one is already
    /// scheduled or the offloader refused the task.
    pub fn schedule<F, Fut>(&self, key: &CacheKey, ttl: Duration, stale: Duration, upstream: F) -> bool
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        let this = self.clone();
        let owned = key.clone();
        let scheduled = self.store.offload().spawn_with_key(
            OffloadKey::Revalidate(key.clone()),
            async move {
                // Outcome is logged and counted inside.
                let _ = this.revalidate(&owned, ttl, stale, upstream).await;
            },
        );
        if !scheduled {
            debug!(%key, "revalidation not scheduled");
        }
        scheduled
    }

    /// Fetches `key` from the upstream and stores the result.
    ///
    /// Concurrent refreshes of one key share a single upstream call and a
    /// single cache write.
    #[instrument(skip_all, fields(key = %key))]
    pub async fn revalidate<F, Fut>(
        &self,
        key: &CacheKey,
        ttl: Duration,
        stale: Duration,
        upstream: F,
    ) -> Result<T, FetchError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        let store = self.store.clone();
        let owned = key.clone();
        let timeout = self.upstream_timeout;
        let result = self
            .coalescer
            .coalesce(FlightKey::Revalidate(key.clone()), move || async move {
                let data = call_upstream(owned.namespace(), timeout, upstream()).await?;
                store.set(&owned, &data, ttl, stale).await;
                Ok(data)
            })
            .await;

        match &result {
            Ok(_) => debug!("entry revalidated"),
            Err(error) => warn!(%error, "revalidation failed, keeping stale entry"),
        }
        metrics::record_revalidation(result.is_ok());
        result
    }
}
