//! Rate limiter error types.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::limiter::RateLimitStatus;

/// A request was rejected because its key is over quota.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("rate limit of {limit} exceeded for `{key}`, retry after {retry_after}s")]
pub struct RateLimitExceeded {
    /// The rate-limited key.
    pub key: String,
    /// The configured limit.
    pub limit: u64,
    /// Whole seconds to wait, at least 1.
    pub retry_after: u64,
    /// When the quota frees up again.
    pub reset_at: DateTime<Utc>,
}

impl RateLimitExceeded {
    pub(crate) fn from_status(key: &str, status: &RateLimitStatus) -> Self {
        Self {
            key: key.to_owned(),
            limit: status.limit,
            retry_after: status.retry_after.unwrap_or(1),
            reset_at: status.reset_at,
        }
    }
}

/// Error from a shared [`KvStore`](crate::KvStore).
#[derive(Debug, Error)]
pub enum KvError {
    /// The store could not be reached or rejected the command.
    #[error("rate limit store unavailable: {0}")]
    Connection(Box<dyn std::error::Error + Send + Sync>),

    /// A stored record could not be interpreted.
    #[error("corrupt rate limit record: {0}")]
    Corrupt(String),
}

/// Errors surfaced by the fallible [`DistributedLimiter`](crate::DistributedLimiter)
/// entry points. The [`RateLimiter`](crate::RateLimiter) methods never return
/// them; they apply the configured failure policy instead.
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// The request is over quota.
    #[error(transparent)]
    Exceeded(#[from] RateLimitExceeded),

    /// The shared store failed.
    #[error(transparent)]
    Backend(#[from] KvError),

    /// Every write attempt lost the version race.
    #[error("gave up after {attempts} conflicting writes")]
    Contention {
        /// Number of write attempts made.
        attempts: u32,
    },
}
