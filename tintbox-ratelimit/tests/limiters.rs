//! Behaviour shared by both limiter backends, plus the distributed counter
//! under contention and store failure.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tintbox_core::MockClock;
use tintbox_ratelimit::{
    Backoff, DistributedLimiter, FailurePolicy, KvError, KvStore, MemoryKvStore, RateLimitError,
    RateLimitQuota, RateLimiter, SlidingWindowLimiter, Versioned, WindowRecord, WriteOutcome,
};

fn quota() -> RateLimitQuota {
    RateLimitQuota::new(10, Duration::from_secs(60))
}

async fn ten_per_minute(limiter: &dyn RateLimiter, clock: &MockClock) {
    for n in 1..=10 {
        let status = limiter.increment("user:1").await;
        assert!(status.allowed, "request {n} must be admitted");
        assert_eq!(status.remaining, 10 - n);
    }

    let rejected = limiter.increment("user:1").await;
    assert!(!rejected.allowed);
    assert!(rejected.retry_after.is_some_and(|secs| secs > 0));

    let exceeded = limiter.admit("user:1").await.unwrap_err();
    assert!(exceeded.retry_after > 0);

    // Other keys have their own quota.
    assert!(limiter.increment("user:2").await.allowed);

    clock.advance_secs(60);
    assert!(limiter.increment("user:1").await.allowed);
}

#[tokio::test]
async fn test_sliding_window_ten_per_minute() {
    let clock = MockClock::starting_now();
    let limiter = SlidingWindowLimiter::builder(quota())
        .clock(Arc::new(clock.clone()))
        .build();
    ten_per_minute(&limiter, &clock).await;
}

#[tokio::test]
async fn test_distributed_ten_per_minute() {
    let clock = MockClock::starting_now();
    let limiter =
        DistributedLimiter::builder(MemoryKvStore::new(Arc::new(clock.clone())), quota())
            .clock(Arc::new(clock.clone()))
            .build();
    ten_per_minute(&limiter, &clock).await;
}

#[tokio::test]
async fn test_sliding_window_evicts_least_recently_used_keys() {
    let clock = MockClock::starting_now();
    let limiter = SlidingWindowLimiter::builder(quota())
        .clock(Arc::new(clock.clone()))
        .max_keys(3)
        .sweep_every(5)
        .build();

    for key in ["a", "b", "c", "d"] {
        limiter.increment(key).await;
        clock.advance_secs(1);
    }
    assert_eq!(limiter.tracked_keys(), 4);

    // The fifth request triggers a sweep down to three keys; "a" and "b"
    // were used least recently.
    limiter.increment("e").await;
    assert_eq!(limiter.tracked_keys(), 3);
    assert_eq!(limiter.check("a").await.remaining, 10);
    assert_eq!(limiter.check("e").await.remaining, 9);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_increments_are_never_lost() {
    let store = Arc::new(MemoryKvStore::default());
    let quota = RateLimitQuota::new(10_000, Duration::from_secs(3600));
    let limiter = Arc::new(
        DistributedLimiter::builder(store.clone(), quota)
            .max_attempts(u32::MAX)
            .backoff(Backoff::new(Duration::from_micros(50), Duration::from_millis(2)))
            .failure_policy(FailurePolicy::Closed)
            .build(),
    );

    let writers = 16;
    let per_writer = 25;
    let tasks: Vec<_> = (0..writers)
        .map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move {
                for _ in 0..per_writer {
                    limiter.try_increment("hot").await.unwrap();
                }
            })
        })
        .collect();
    for task in futures::future::join_all(tasks).await {
        task.unwrap();
    }

    let record = store.read("ratelimit:hot").await.unwrap().unwrap();
    assert_eq!(record.value.count, writers * per_writer);
}

/// Delegates to a memory store but reports a conflict for the first
/// `conflicts` writes.
struct ConflictingStore {
    inner: MemoryKvStore,
    conflicts: u32,
    writes: AtomicU32,
}

#[async_trait]
impl KvStore for ConflictingStore {
    async fn read(&self, key: &str) -> Result<Option<Versioned<WindowRecord>>, KvError> {
        self.inner.read(key).await
    }

    async fn write_if_version(
        &self,
        key: &str,
        record: &WindowRecord,
        expected: Option<u64>,
    ) -> Result<WriteOutcome, KvError> {
        if self.writes.fetch_add(1, Ordering::SeqCst) < self.conflicts {
            return Ok(WriteOutcome::Conflict);
        }
        self.inner.write_if_version(key, record, expected).await
    }
}

fn conflicting(conflicts: u32) -> ConflictingStore {
    ConflictingStore {
        inner: MemoryKvStore::default(),
        conflicts,
        writes: AtomicU32::new(0),
    }
}

#[tokio::test(start_paused = true)]
async fn test_conflicts_are_retried_within_budget() {
    let limiter = DistributedLimiter::builder(conflicting(3), quota())
        .max_attempts(4)
        .build();

    let status = limiter.try_increment("k").await.unwrap();
    assert_eq!(status.remaining, 9);
    assert_eq!(limiter.store().writes.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_fail_open() {
    let limiter = DistributedLimiter::builder(conflicting(u32::MAX), quota())
        .max_attempts(3)
        .build();

    assert!(matches!(
        limiter.try_increment("k").await,
        Err(RateLimitError::Contention { attempts: 3 })
    ));

    let status = limiter.increment("k").await;
    assert!(status.allowed);
    assert_eq!(status.retry_after, None);
}

struct UnreachableStore;

fn unreachable() -> KvError {
    KvError::Connection(Box::new(std::io::Error::other("connection refused")))
}

#[async_trait]
impl KvStore for UnreachableStore {
    async fn read(&self, _key: &str) -> Result<Option<Versioned<WindowRecord>>, KvError> {
        Err(unreachable())
    }

    async fn write_if_version(
        &self,
        _key: &str,
        _record: &WindowRecord,
        _expected: Option<u64>,
    ) -> Result<WriteOutcome, KvError> {
        Err(unreachable())
    }
}

#[tokio::test]
async fn test_store_failure_follows_policy() {
    let open = DistributedLimiter::builder(UnreachableStore, quota()).build();
    assert!(open.increment("k").await.allowed);
    assert!(open.check("k").await.allowed);
    assert!(open.admit("k").await.is_ok());

    let closed = DistributedLimiter::builder(UnreachableStore, quota())
        .failure_policy(FailurePolicy::Closed)
        .build();
    let status = closed.increment("k").await;
    assert!(!status.allowed);
    assert_eq!(status.retry_after, Some(1));
}
