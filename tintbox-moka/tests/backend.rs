//! Behaviour of the moka backend: envelopes, physical expiry and capacity.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use tintbox_backend::{Backend, CacheStore, DeleteStatus, Lookup};
use tintbox_core::{CacheEntry, CacheKey, CacheKeyBuilder, MockClock};
use tintbox_moka::{MokaBackend, MokaBackendBuilder};

fn make_key(id: u32) -> CacheKey {
    CacheKeyBuilder::new("palette").param("id", id).build()
}

fn make_entry(size: usize, ttl: u64, swr: u64) -> CacheEntry<Bytes> {
    CacheEntry::new(Bytes::from(vec![0u8; size]), Utc::now(), ttl, swr)
}

#[tokio::test]
async fn test_envelope_is_returned_as_written() {
    let backend = MokaBackend::builder().max_entries(100).build();
    let key = make_key(1);
    let entry = make_entry(16, 300, 120);

    backend.write(&key, entry.clone()).await.unwrap();

    assert_eq!(backend.read(&key).await.unwrap(), Some(entry));
    assert_eq!(
        backend.remove(&key).await.unwrap(),
        DeleteStatus::Deleted
    );
    assert_eq!(backend.remove(&key).await.unwrap(), DeleteStatus::Missing);
    assert_eq!(backend.read(&key).await.unwrap(), None);
}

#[tokio::test]
async fn test_entry_is_reaped_after_ttl_plus_swr() {
    let backend = MokaBackend::builder().max_entries(100).build();
    let key = make_key(1);

    backend.write(&key, make_entry(8, 1, 0)).await.unwrap();
    assert!(backend.read(&key).await.unwrap().is_some());

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    backend.cache().run_pending_tasks().await;

    assert!(backend.read(&key).await.unwrap().is_none());
}

#[tokio::test]
async fn test_overwrite_restarts_physical_deadline() {
    let backend = MokaBackend::builder().max_entries(100).build();
    let key = make_key(1);

    backend.write(&key, make_entry(8, 1, 0)).await.unwrap();
    backend.write(&key, make_entry(8, 60, 30)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    backend.cache().run_pending_tasks().await;

    let entry = backend.read(&key).await.unwrap().expect("refreshed entry");
    assert_eq!(entry.ttl(), 60);
    assert_eq!(entry.swr(), 30);
}

#[tokio::test]
async fn test_max_bytes_evicts_down_to_budget() {
    let key = make_key(1);
    let entry = make_entry(100, 3600, 0);
    let single = key.memory_size() + entry.memory_size();

    let backend = MokaBackendBuilder::default()
        .max_bytes((single * 3) as u64)
        .build();

    for id in 1..=4 {
        backend
            .write(&make_key(id), make_entry(100, 3600, 0))
            .await
            .unwrap();
        backend.cache().run_pending_tasks().await;
    }

    let mut present = 0;
    for id in 1..=4 {
        if backend.read(&make_key(id)).await.unwrap().is_some() {
            present += 1;
        }
    }
    assert_eq!(present, 3);
    assert!(backend.read(&make_key(4)).await.unwrap().is_some());
}

#[tokio::test]
async fn test_store_over_moka_classifies_entries() {
    let clock = MockClock::starting_now();
    let store = CacheStore::builder(MokaBackend::builder().max_entries(100).build())
        .clock(Arc::new(clock.clone()))
        .build();
    let key = make_key(7);

    store
        .set(&key, "#ff8800", Duration::from_secs(300), Duration::from_secs(120))
        .await;

    assert!(matches!(
        store.get::<String>(&key).await,
        Lookup::Hit { stale: false, .. }
    ));
    clock.advance_secs(301);
    assert!(store.get::<String>(&key).await.is_stale());
    clock.advance_secs(120);
    assert!(store.get::<String>(&key).await.is_miss());
}
