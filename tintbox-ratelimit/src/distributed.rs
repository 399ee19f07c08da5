//! Distributed fixed-window limiter over a versioned [`KvStore`].
//!
//! ## Increment protocol
//!
//! 1. Read the record and its version. No record, or an expired one, means a
//!    fresh window opened by this request.
//! 2. Compute the candidate record. `expires_at` is taken from the existing
//!    window and never moves, so a steady trickle of requests cannot keep a
//!    key alive forever.
//! 3. Write the candidate only if the version is unchanged. On a conflict
//!    another writer won the race: back off, re-read and try again, up to
//!    `max_attempts` writes.
//!
//! An applied write always contains the caller's increment, so concurrent
//! writers never lose counts; they only pay extra round trips. If the attempts
//! run out, or the store fails, the [`FailurePolicy`] decides.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tintbox_core::{Clock, SystemClock};
use tracing::{debug, instrument, trace, warn};

use crate::config::DistributedSettings;
use crate::error::{RateLimitError, RateLimitExceeded};
use crate::kv::{KvStore, Versioned, WindowRecord, WriteOutcome};
use crate::limiter::{RateLimitQuota, RateLimitStatus, RateLimiter};

/// What a limiter does when it cannot reach a decision from the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Admit the request. Quota precision is traded for availability.
    #[default]
    Open,
    /// Reject the request with a one second retry-after.
    Closed,
}

/// Per-key fixed-window counter shared by every instance through a
/// [`KvStore`].
pub struct DistributedLimiter<S> {
    store: S,
    quota: RateLimitQuota,
    clock: Arc<dyn Clock>,
    settings: DistributedSettings,
}

impl<S> fmt::Debug for DistributedLimiter<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributedLimiter")
            .field("quota", &self.quota)
            .field("settings", &self.settings)
            .finish()
    }
}

impl<S> DistributedLimiter<S>
where
    S: KvStore,
{
    /// Creates a builder over `store` enforcing `quota`.
    pub fn builder(store: S, quota: RateLimitQuota) -> DistributedLimiterBuilder<S> {
        DistributedLimiterBuilder {
            store,
            quota,
            clock: Arc::new(SystemClock),
            settings: DistributedSettings::default(),
        }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.settings.key_prefix, key)
    }

    fn status(&self, record: &WindowRecord, now: DateTime<Utc>) -> RateLimitStatus {
        let limit = self.quota.limit;
        RateLimitStatus::new(
            record.count <= limit,
            limit,
            record.count,
            record.expires_at,
            now,
        )
    }

    /// Records a request, surfacing store failures and contention instead of
    /// applying the failure policy.
    #[instrument(skip(self), level = "debug")]
    pub async fn try_increment(&self, key: &str) -> Result<RateLimitStatus, RateLimitError> {
        let storage_key = self.storage_key(key);
        let window = self.quota.chrono_window();
        let max_attempts = self.settings.max_attempts.max(1);
        let mut delays = self.settings.backoff.delays();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let now = self.clock.now();
            let (candidate, expected) = match self.store.read(&storage_key).await? {
                Some(Versioned { value, version }) if !value.is_expired(now) => {
                    (value.incremented(), Some(version))
                }
                Some(Versioned { version, .. }) => (WindowRecord::start(now, window), Some(version)),
                None => (WindowRecord::start(now, window), None),
            };

            match self
                .store
                .write_if_version(&storage_key, &candidate, expected)
                .await?
            {
                WriteOutcome::Applied { version } => {
                    trace!(count = candidate.count, version, attempt, "increment applied");
                    return Ok(self.status(&candidate, now));
                }
                WriteOutcome::Conflict => {
                    crate::metrics::record_conflict();
                    if attempt >= max_attempts {
                        return Err(RateLimitError::Contention { attempts: attempt });
                    }
                    let delay = delays.next().unwrap_or(self.settings.backoff.max_delay);
                    debug!(attempt, ?delay, "version conflict, retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Records a request and rejects it when over quota, surfacing store
    /// failures as errors.
    pub async fn try_admit(&self, key: &str) -> Result<RateLimitStatus, RateLimitError> {
        let status = self.try_increment(key).await?;
        if status.allowed {
            Ok(status)
        } else {
            crate::metrics::record_rejection();
            Err(RateLimitExceeded::from_status(key, &status).into())
        }
    }

    fn fallback(&self, key: &str, error: &RateLimitError) -> RateLimitStatus {
        let now = self.clock.now();
        match self.settings.failure_policy {
            FailurePolicy::Open => {
                warn!(key, %error, "rate limit store unavailable, failing open");
                crate::metrics::record_fail_open();
                RateLimitStatus::open(&self.quota, now)
            }
            FailurePolicy::Closed => {
                warn!(key, %error, "rate limit store unavailable, failing closed");
                let limit = self.quota.limit;
                RateLimitStatus::new(false, limit, limit, now, now)
            }
        }
    }
}

#[async_trait]
impl<S> RateLimiter for DistributedLimiter<S>
where
    S: KvStore,
{
    async fn check(&self, key: &str) -> RateLimitStatus {
        let now = self.clock.now();
        let limit = self.quota.limit;
        match self.store.read(&self.storage_key(key)).await {
            Ok(Some(Versioned { value, .. })) if !value.is_expired(now) => {
                RateLimitStatus::new(value.count < limit, limit, value.count, value.expires_at, now)
            }
            Ok(_) => RateLimitStatus::new(limit > 0, limit, 0, now + self.quota.chrono_window(), now),
            Err(error) => self.fallback(key, &RateLimitError::Backend(error)),
        }
    }

    async fn increment(&self, key: &str) -> RateLimitStatus {
        match self.try_increment(key).await {
            Ok(status) => status,
            Err(error) => self.fallback(key, &error),
        }
    }

    fn quota(&self) -> RateLimitQuota {
        self.quota
    }
}

/// Builder for [`DistributedLimiter`].
pub struct DistributedLimiterBuilder<S> {
    store: S,
    quota: RateLimitQuota,
    clock: Arc<dyn Clock>,
    settings: DistributedSettings,
}

impl<S> DistributedLimiterBuilder<S>
where
    S: KvStore,
{
    /// Sets the clock windows are stamped with.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the number of write attempts per increment.
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.settings.max_attempts = max_attempts;
        self
    }

    /// Sets the delay schedule between attempts.
    pub fn backoff(mut self, backoff: crate::Backoff) -> Self {
        self.settings.backoff = backoff;
        self
    }

    /// Sets the failure policy.
    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.settings.failure_policy = policy;
        self
    }

    /// Sets the prefix of keys in the shared store.
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.settings.key_prefix = prefix.into();
        self
    }

    /// Applies settings loaded from configuration.
    pub fn settings(mut self, settings: &DistributedSettings) -> Self {
        self.settings = settings.clone();
        self
    }

    /// Builds the limiter.
    pub fn build(self) -> DistributedLimiter<S> {
        DistributedLimiter {
            store: self.store,
            quota: self.quota,
            clock: self.clock,
            settings: self.settings,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::kv::MemoryKvStore;
    use tintbox_core::MockClock;

    fn limiter(clock: &MockClock, limit: u64) -> DistributedLimiter<MemoryKvStore> {
        DistributedLimiter::builder(
            MemoryKvStore::new(Arc::new(clock.clone())),
            RateLimitQuota::new(limit, Duration::from_secs(60)),
        )
        .clock(Arc::new(clock.clone()))
        .build()
    }

    #[tokio::test]
    async fn test_window_expiry_is_fixed_at_first_increment() {
        let clock = MockClock::starting_now();
        let start = clock.now();
        let limiter = limiter(&clock, 100);

        limiter.increment("k").await;
        for _ in 0..5 {
            clock.advance_secs(10);
            let status = limiter.increment("k").await;
            assert_eq!(status.reset_at, start + chrono::Duration::seconds(60));
        }

        clock.advance_secs(10);
        let fresh = limiter.increment("k").await;
        assert_eq!(fresh.remaining, 99, "a new window starts after expiry");
        assert_eq!(fresh.reset_at, clock.now() + chrono::Duration::seconds(60));
    }

    #[tokio::test]
    async fn test_check_reads_without_writing() {
        let clock = MockClock::starting_now();
        let limiter = limiter(&clock, 1);

        assert!(limiter.check("k").await.allowed);
        assert!(limiter.store().is_empty());
        assert!(limiter.increment("k").await.allowed);

        let blocked = limiter.check("k").await;
        assert!(!blocked.allowed);
        assert_eq!(blocked.retry_after, Some(60));
    }

    #[tokio::test]
    async fn test_keys_are_prefixed() {
        let clock = MockClock::starting_now();
        let limiter = limiter(&clock, 1);
        limiter.increment("user:1").await;
        assert!(
            limiter
                .store()
                .read("ratelimit:user:1")
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_try_admit_reports_exceeded() {
        let clock = MockClock::starting_now();
        let limiter = limiter(&clock, 1);

        limiter.try_admit("k").await.unwrap();
        match limiter.try_admit("k").await {
            Err(RateLimitError::Exceeded(exceeded)) => {
                assert_eq!(exceeded.key, "k");
                assert_eq!(exceeded.retry_after, 60);
            }
            other => panic!("expected exceeded, got {other:?}"),
        }
    }
}
