//! Metrics declaration and recording helpers.
//!
//! Every helper compiles to a no-op unless the `metrics` feature is enabled.

use std::time::{Duration, Instant};

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
lazy_static! {
    // Cache status metrics

    /// Track number of cache hit events.
    pub static ref CACHE_HIT_COUNTER: &'static str = {
        metrics::describe_counter!(
            "tintbox_cache_hit_total",
            "Total number of fresh cache hits."
        );
        "tintbox_cache_hit_total"
    };
    /// Track number of cache miss events.
    pub static ref CACHE_MISS_COUNTER: &'static str = {
        metrics::describe_counter!(
            "tintbox_cache_miss_total",
            "Total number of cache misses."
        );
        "tintbox_cache_miss_total"
    };
    /// Track number of cache stale events.
    pub static ref CACHE_STALE_COUNTER: &'static str = {
        metrics::describe_counter!(
            "tintbox_cache_stale_total",
            "Total number of stale entries served while revalidating."
        );
        "tintbox_cache_stale_total"
    };

    // Upstream metrics

    /// Track number of upstream calls by outcome.
    pub static ref UPSTREAM_CALLS: &'static str = {
        metrics::describe_counter!(
            "tintbox_upstream_calls_total",
            "Total number of upstream calls, by outcome."
        );
        "tintbox_upstream_calls_total"
    };
    /// Metric of upstream call timings.
    pub static ref UPSTREAM_DURATION: &'static str = {
        metrics::describe_histogram!(
            "tintbox_upstream_duration_seconds",
            metrics::Unit::Seconds,
            "Duration of upstream calls in seconds."
        );
        "tintbox_upstream_duration_seconds"
    };
    /// Track number of callers that joined an in-flight request.
    pub static ref COALESCED_JOINS: &'static str = {
        metrics::describe_counter!(
            "tintbox_coalesced_total",
            "Total number of callers served by an already in-flight request."
        );
        "tintbox_coalesced_total"
    };
    /// Track number of background revalidations by outcome.
    pub static ref REVALIDATIONS: &'static str = {
        metrics::describe_counter!(
            "tintbox_revalidation_total",
            "Total number of background revalidations, by outcome."
        );
        "tintbox_revalidation_total"
    };

    // Offload manager metrics

    /// Track number of offload tasks spawned.
    pub static ref OFFLOAD_TASKS_SPAWNED: &'static str = {
        metrics::describe_counter!(
            "tintbox_offload_tasks_spawned_total",
            "Total number of offload tasks spawned."
        );
        "tintbox_offload_tasks_spawned_total"
    };
    /// Track number of offload tasks completed.
    pub static ref OFFLOAD_TASKS_COMPLETED: &'static str = {
        metrics::describe_counter!(
            "tintbox_offload_tasks_completed_total",
            "Total number of offload tasks completed."
        );
        "tintbox_offload_tasks_completed_total"
    };
    /// Track number of offload tasks that timed out.
    pub static ref OFFLOAD_TASKS_TIMEOUT: &'static str = {
        metrics::describe_counter!(
            "tintbox_offload_tasks_timeout_total",
            "Total number of offload tasks cancelled by timeout."
        );
        "tintbox_offload_tasks_timeout_total"
    };
    /// Track number of offload tasks deduplicated (skipped).
    pub static ref OFFLOAD_TASKS_DEDUPLICATED: &'static str = {
        metrics::describe_counter!(
            "tintbox_offload_tasks_deduplicated_total",
            "Total number of offload tasks skipped because an equal task was in flight."
        );
        "tintbox_offload_tasks_deduplicated_total"
    };
    /// Track number of offload tasks dropped at the concurrency limit.
    pub static ref OFFLOAD_TASKS_DROPPED: &'static str = {
        metrics::describe_counter!(
            "tintbox_offload_tasks_dropped_total",
            "Total number of offload tasks dropped at the concurrency limit."
        );
        "tintbox_offload_tasks_dropped_total"
    };
    /// Gauge of currently active offload tasks.
    pub static ref OFFLOAD_TASKS_ACTIVE: &'static str = {
        metrics::describe_gauge!(
            "tintbox_offload_tasks_active",
            "Number of currently active offload tasks."
        );
        "tintbox_offload_tasks_active"
    };
    /// Histogram of offload task duration.
    pub static ref OFFLOAD_TASK_DURATION: &'static str = {
        metrics::describe_histogram!(
            "tintbox_offload_task_duration_seconds",
            metrics::Unit::Seconds,
            "Duration of offload tasks in seconds."
        );
        "tintbox_offload_task_duration_seconds"
    };
}

/// Outcome of a cache lookup as seen by the fetch pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupStatus {
    /// Fresh entry served.
    Hit,
    /// Nothing usable cached.
    Miss,
    /// Stale entry served, revalidation scheduled.
    Stale,
}

/// Record a cache lookup.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_lookup(status: LookupStatus, namespace: &str) {
    let counter = match status {
        LookupStatus::Hit => *CACHE_HIT_COUNTER,
        LookupStatus::Miss => *CACHE_MISS_COUNTER,
        LookupStatus::Stale => *CACHE_STALE_COUNTER,
    };
    metrics::counter!(counter, "namespace" => namespace.to_owned()).increment(1);
}

/// Record an upstream call and how long it took.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_upstream(namespace: &str, duration: Duration, outcome: &'static str) {
    metrics::counter!(*UPSTREAM_CALLS, "namespace" => namespace.to_owned(), "outcome" => outcome)
        .increment(1);
    metrics::histogram!(*UPSTREAM_DURATION, "namespace" => namespace.to_owned())
        .record(duration.as_secs_f64());
}

/// Record a caller joining an in-flight request.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_coalesced_join() {
    metrics::counter!(*COALESCED_JOINS).increment(1);
}

/// Record a finished background revalidation.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_revalidation(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    metrics::counter!(*REVALIDATIONS, "outcome" => outcome).increment(1);
}

/// Record a spawned offload task.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_offload_spawned(key_type: &str) {
    metrics::counter!(*OFFLOAD_TASKS_SPAWNED, "key_type" => key_type.to_owned()).increment(1);
    metrics::gauge!(*OFFLOAD_TASKS_ACTIVE, "key_type" => key_type.to_owned()).increment(1.0);
}

/// Record an offload task skipped because an equal one was in flight.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_offload_deduplicated(key_type: &str) {
    metrics::counter!(*OFFLOAD_TASKS_DEDUPLICATED, "key_type" => key_type.to_owned())
        .increment(1);
}

/// Record an offload task dropped at the concurrency limit.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_offload_dropped(key_type: &str) {
    metrics::counter!(*OFFLOAD_TASKS_DROPPED, "key_type" => key_type.to_owned()).increment(1);
}

/// Record a finished offload task.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_offload_finished(start: Instant, key_type: &str, timed_out: bool) {
    let counter = if timed_out {
        *OFFLOAD_TASKS_TIMEOUT
    } else {
        *OFFLOAD_TASKS_COMPLETED
    };
    metrics::counter!(counter, "key_type" => key_type.to_owned()).increment(1);
    metrics::gauge!(*OFFLOAD_TASKS_ACTIVE, "key_type" => key_type.to_owned()).decrement(1.0);
    metrics::histogram!(*OFFLOAD_TASK_DURATION, "key_type" => key_type.to_owned())
        .record(start.elapsed().as_secs_f64());
}

/// No-op version when metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_lookup(_status: LookupStatus, _namespace: &str) {}

/// No-op version when metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_upstream(_namespace: &str, _duration: Duration, _outcome: &'static str) {}

/// No-op version when metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_coalesced_join() {}

/// No-op version when metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_revalidation(_success: bool) {}

/// No-op version when metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_offload_spawned(_key_type: &str) {}

/// No-op version when metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_offload_deduplicated(_key_type: &str) {}

/// No-op version when metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_offload_dropped(_key_type: &str) {}

/// No-op version when metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_offload_finished(_start: Instant, _key_type: &str, _timed_out: bool) {}
