#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

/// Request coalescing.
///
/// Concurrent identical fetches within one process share a single upstream
/// call through [`RequestCoalescer`](coalesce::RequestCoalescer). Coalescing is
/// best-effort and instance-local; the shared edge cache bounds duplication
/// across instances.
pub mod coalesce;

/// Deployment configuration loaded from YAML.
pub mod config;

/// Errors surfaced by [`CachedFetch`].
pub mod error;

/// The cache pipeline.
///
/// [`CachedFetch`] composes the edge cache, the coalescer and the background
/// revalidator into one `fetch` call.
pub mod fetch;

/// Metrics collection for cache observability.
///
/// When the `metrics` feature is enabled, this module records:
/// - Cache hits, misses, and stale responses
/// - Upstream calls, their timing, and coalesced joins
/// - Background revalidations and offload task lifecycle
pub mod metrics;

/// Background task execution.
pub mod offload;

/// Cache policy per command.
pub mod policy;

/// Stale-while-revalidate refreshes.
pub mod revalidate;

pub use coalesce::{FlightKey, FlightPanicked, RequestCoalescer};
pub use config::{ConfigError, TintboxConfig, UpstreamConfig};
pub use error::FetchError;
pub use fetch::{CachedFetch, CachedFetchBuilder, Fetched, ResponseSource};
pub use offload::{OffloadConfig, OffloadManager, TimeoutPolicy};
pub use policy::{CachePolicy, EnabledCachePolicy};
pub use revalidate::BackgroundRevalidator;

pub use tintbox_backend::{Backend, BackendError, CacheStore, CacheStoreBuilder, Format, Lookup};
pub use tintbox_core::{
    CacheEntry, CacheKey, CacheKeyBuilder, Clock, Freshness, Offload, OffloadKey, SystemClock,
};

/// Per-key request quotas.
pub use tintbox_ratelimit as ratelimit;
