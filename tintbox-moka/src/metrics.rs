//! Occupancy gauges of the in-process cache.
//!
//! Recorded after every write when the `metrics` feature is enabled:
//!
//! - `tintbox_moka_entries`: entries currently held
//! - `tintbox_moka_weighted_bytes`: weighted size (bytes for byte-bounded
//!   caches, entries otherwise)
//!
//! Both are labelled with `backend`.

#[cfg(feature = "metrics")]
lazy_static::lazy_static! {
    /// Entry count gauge.
    pub static ref ENTRIES: &'static str = {
        metrics::describe_gauge!(
            "tintbox_moka_entries",
            "Entries held by the in-process edge cache."
        );
        "tintbox_moka_entries"
    };

    /// Weighted size gauge.
    pub static ref WEIGHTED_BYTES: &'static str = {
        metrics::describe_gauge!(
            "tintbox_moka_weighted_bytes",
            "Weighted size of the in-process edge cache."
        );
        "tintbox_moka_weighted_bytes"
    };
}

/// Records the cache occupancy after a write.
#[cfg(feature = "metrics")]
pub fn record_occupancy(backend: &str, entries: u64, weighted: u64) {
    let backend = backend.to_owned();
    metrics::gauge!(*ENTRIES, "backend" => backend.clone()).set(entries as f64);
    metrics::gauge!(*WEIGHTED_BYTES, "backend" => backend).set(weighted as f64);
}

/// Records the cache occupancy after a write.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_occupancy(_backend: &str, _entries: u64, _weighted: u64) {}
