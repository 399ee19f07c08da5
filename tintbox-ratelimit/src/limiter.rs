//! The [`RateLimiter`] contract shared by every backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RateLimitExceeded;

/// How many requests a key may make per window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitQuota {
    /// Requests admitted per window.
    pub limit: u64,
    /// Window length.
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

impl RateLimitQuota {
    /// Creates a quota of `limit` requests per `window`.
    pub const fn new(limit: u64, window: Duration) -> Self {
        Self { limit, window }
    }

    /// `limit` requests per minute.
    pub const fn per_minute(limit: u64) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    /// Window length as a chrono duration, saturating on overflow.
    pub(crate) fn chrono_window(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.window).unwrap_or(chrono::Duration::MAX)
    }
}

/// Outcome of a [`RateLimiter`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitStatus {
    /// Whether the request is (or would be) admitted.
    pub allowed: bool,
    /// The configured limit.
    pub limit: u64,
    /// Requests left in the current window.
    pub remaining: u64,
    /// When the quota frees up again.
    pub reset_at: DateTime<Utc>,
    /// Whole seconds to wait before retrying; only set (and at least 1) when
    /// the request was rejected.
    pub retry_after: Option<u64>,
}

impl RateLimitStatus {
    pub(crate) fn new(
        allowed: bool,
        limit: u64,
        used: u64,
        reset_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        let retry_after = (!allowed).then(|| ceil_secs(reset_at - now).max(1));
        Self {
            allowed,
            limit,
            remaining: limit.saturating_sub(used),
            reset_at,
            retry_after,
        }
    }

    /// An admitted status granted without consulting any state.
    pub(crate) fn open(quota: &RateLimitQuota, now: DateTime<Utc>) -> Self {
        Self::new(true, quota.limit, 0, now + quota.chrono_window(), now)
    }
}

fn ceil_secs(delta: chrono::Duration) -> u64 {
    let millis = delta.num_milliseconds().max(0) as u64;
    millis.div_ceil(1000)
}

/// Per-key request quota enforcement.
///
/// Every request is recorded by [`increment`](Self::increment), including
/// rejected ones; a request is admitted when the count after recording it is
/// at most the limit.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Reports whether a request for `key` would be admitted, without
    /// recording anything.
    async fn check(&self, key: &str) -> RateLimitStatus;

    /// Records a request for `key` and reports whether it is admitted.
    async fn increment(&self, key: &str) -> RateLimitStatus;

    /// The quota this limiter enforces.
    fn quota(&self) -> RateLimitQuota;

    /// Records a request and turns a rejection into an error.
    async fn admit(&self, key: &str) -> Result<RateLimitStatus, RateLimitExceeded> {
        let status = self.increment(key).await;
        if status.allowed {
            Ok(status)
        } else {
            crate::metrics::record_rejection();
            Err(RateLimitExceeded::from_status(key, &status))
        }
    }
}

#[async_trait]
impl<L> RateLimiter for Arc<L>
where
    L: RateLimiter + ?Sized,
{
    async fn check(&self, key: &str) -> RateLimitStatus {
        (**self).check(key).await
    }

    async fn increment(&self, key: &str) -> RateLimitStatus {
        (**self).increment(key).await
    }

    fn quota(&self) -> RateLimitQuota {
        (**self).quota()
    }

    async fn admit(&self, key: &str) -> Result<RateLimitStatus, RateLimitExceeded> {
        (**self).admit(key).await
    }
}
