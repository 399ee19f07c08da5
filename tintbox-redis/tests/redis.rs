//! Round trips against a real Redis started with testcontainers.
//!
//! Set `REDIS_URL` to reuse a running server instead of starting a container.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use testcontainers::ContainerAsync;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::redis::Redis;
use tintbox_backend::{Backend, CacheStore, DeleteStatus, Lookup};
use tintbox_core::{CacheEntry, CacheKeyBuilder, MockClock};
use tintbox_ratelimit::{
    DistributedLimiter, KvStore, RateLimitQuota, RateLimiter, WindowRecord, WriteOutcome,
};
use tintbox_redis::RedisBackend;

async fn redis_url() -> (String, Option<ContainerAsync<Redis>>) {
    if let Ok(url) = std::env::var("REDIS_URL") {
        return (url, None);
    }
    let container = Redis::default()
        .start()
        .await
        .expect("failed to start redis container");
    let host = container.get_host().await.expect("container host");
    let port = container
        .get_host_port_ipv4(6379)
        .await
        .expect("container port");
    (format!("redis://{host}:{port}/"), Some(container))
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_envelope_round_trip() {
    let (url, _container) = redis_url().await;
    let backend = RedisBackend::builder().server(url).build().unwrap();
    let key = CacheKeyBuilder::new("match").param("hex", "#123456").build();
    let entry = CacheEntry::new(bytes::Bytes::from_static(b"{}"), Utc::now(), 300, 120);

    backend.write(&key, entry.clone()).await.unwrap();
    assert_eq!(backend.read(&key).await.unwrap(), Some(entry));
    assert_eq!(
        backend.remove(&key).await.unwrap(),
        DeleteStatus::Deleted
    );
    assert_eq!(backend.read(&key).await.unwrap(), None);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_store_over_redis() {
    let (url, _container) = redis_url().await;
    let clock = MockClock::starting_now();
    let store = CacheStore::builder(RedisBackend::builder().server(url).build().unwrap())
        .clock(Arc::new(clock.clone()))
        .build();
    let key = CacheKeyBuilder::new("palette").param("id", 1).build();

    store
        .set(&key, "v1", Duration::from_secs(300), Duration::from_secs(120))
        .await;
    clock.advance_secs(301);
    assert!(matches!(
        store.get::<String>(&key).await,
        Lookup::Hit { stale: true, .. }
    ));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_compare_and_set() {
    let (url, _container) = redis_url().await;
    let kv = RedisBackend::builder().server(url).build().unwrap().kv_store();
    let record = WindowRecord::start(Utc::now(), chrono::Duration::seconds(60));

    let WriteOutcome::Applied { version } =
        kv.write_if_version("rl:cas", &record, None).await.unwrap()
    else {
        panic!("create must apply");
    };
    assert_eq!(
        kv.write_if_version("rl:cas", &record, None).await.unwrap(),
        WriteOutcome::Conflict
    );
    assert_eq!(
        kv.write_if_version("rl:cas", &record.incremented(), Some(version))
            .await
            .unwrap(),
        WriteOutcome::Applied {
            version: version + 1
        }
    );

    let stored = kv.read("rl:cas").await.unwrap().unwrap();
    assert_eq!(stored.value.count, 2);
    assert_eq!(stored.version, version + 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires docker"]
async fn test_distributed_limiter_conserves_counts() {
    let (url, _container) = redis_url().await;
    let kv = RedisBackend::builder().server(url).build().unwrap().kv_store();
    let limiter = Arc::new(
        DistributedLimiter::builder(kv, RateLimitQuota::new(1_000, Duration::from_secs(60)))
            .max_attempts(u32::MAX)
            .build(),
    );

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move {
                for _ in 0..20 {
                    assert!(limiter.increment("conserve").await.allowed);
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    let status = limiter.check("conserve").await;
    assert_eq!(status.remaining, 1_000 - 160);
}
