//! Rate limiter metrics.
//!
//! Enable the `metrics` feature to record them.
//!
//! - `tintbox_ratelimit_rejected_total` - Requests rejected as over quota
//! - `tintbox_ratelimit_conflicts_total` - Distributed writes that lost the version race
//! - `tintbox_ratelimit_fail_open_total` - Requests admitted because the store failed

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
lazy_static! {
    /// Track number of rejected requests.
    pub static ref RATELIMIT_REJECTED: &'static str = {
        metrics::describe_counter!(
            "tintbox_ratelimit_rejected_total",
            "Total number of requests rejected as over quota."
        );
        "tintbox_ratelimit_rejected_total"
    };
    /// Track number of optimistic-concurrency conflicts.
    pub static ref RATELIMIT_CONFLICTS: &'static str = {
        metrics::describe_counter!(
            "tintbox_ratelimit_conflicts_total",
            "Total number of rate limit writes that lost the version race."
        );
        "tintbox_ratelimit_conflicts_total"
    };
    /// Track number of requests decided by the failure policy.
    pub static ref RATELIMIT_FAIL_OPEN: &'static str = {
        metrics::describe_counter!(
            "tintbox_ratelimit_fail_open_total",
            "Total number of requests admitted because the rate limit store failed."
        );
        "tintbox_ratelimit_fail_open_total"
    };
}

/// Record a rejected request.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_rejection() {
    metrics::counter!(*RATELIMIT_REJECTED).increment(1);
}

/// Record a lost version race.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_conflict() {
    metrics::counter!(*RATELIMIT_CONFLICTS).increment(1);
}

/// Record a request admitted by the fail-open policy.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_fail_open() {
    metrics::counter!(*RATELIMIT_FAIL_OPEN).increment(1);
}

/// Record a rejected request (no-op when `metrics` feature disabled).
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_rejection() {}

/// Record a lost version race (no-op when `metrics` feature disabled).
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_conflict() {}

/// Record a fail-open admission (no-op when `metrics` feature disabled).
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_fail_open() {}
