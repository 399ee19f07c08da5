//! Process-local request coalescing.
//!
//! The first caller for a key starts a flight: a shared future registered in a
//! [`DashMap`]. Callers arriving before it settles join that flight and get a
//! clone of its result instead of calling the upstream again. A flight leaves
//! the registry as soon as it settles (with a value, an error or a panic), or
//! when every caller waiting on it has gone away. A panic inside a flight
//! reaches every waiter as a [`FlightPanicked`] error.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::{BoxFuture, FutureExt, Shared};
use thiserror::Error;
use tintbox_core::CacheKey;
use tracing::{error, trace};

use crate::metrics;

type Flight<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

/// Registry key used by [`CachedFetch`](crate::CachedFetch).
///
/// Revalidations get their own variant so a background refresh never
/// collides with a miss-triggered fetch of the same cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FlightKey {
    /// Foreground fetch after a cache miss.
    Fetch(CacheKey),
    /// Background refresh of a stale entry.
    Revalidate(CacheKey),
}

/// The work behind a flight panicked.
#[derive(Debug, Clone, Error)]
#[error("in-flight request panicked: {message}")]
pub struct FlightPanicked {
    message: String,
}

impl FlightPanicked {
    fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = match payload.downcast::<String>() {
            Ok(message) => *message,
            Err(payload) => match payload.downcast::<&'static str>() {
                Ok(message) => (*message).to_owned(),
                Err(_) => "unknown panic payload".to_owned(),
            },
        };
        Self { message }
    }

    /// The panic message, when it was a string.
    pub fn message(&self) -> &str {
        &self.message
    }
}

struct Registry<K, T, E> {
    flights: DashMap<K, (u64, Flight<T, E>)>,
    next_id: AtomicU64,
}

/// Deduplicates concurrent work per key.
///
/// Clones share the same registry.
pub struct RequestCoalescer<K, T, E> {
    registry: Arc<Registry<K, T, E>>,
}

impl<K, T, E> Clone for RequestCoalescer<K, T, E> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
        }
    }
}

impl<K, T, E> fmt::Debug for RequestCoalescer<K, T, E>
where
    K: Hash + Eq,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestCoalescer")
            .field("in_flight", &self.registry.flights.len())
            .finish()
    }
}

impl<K, T, E> Default for RequestCoalescer<K, T, E>
where
    K: Hash + Eq,
{
    fn default() -> Self {
        Self {
            registry: Arc::new(Registry {
                flights: DashMap::new(),
                next_id: AtomicU64::new(0),
            }),
        }
    }
}

impl<K, T, E> RequestCoalescer<K, T, E>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    E: From<FlightPanicked> + Clone + Send + Sync + 'static,
{
    /// Creates an empty coalescer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `produce` for `key`, or joins the flight already running for it.
    ///
    /// `produce` is only called when this caller starts the flight. It is
    /// called while the registry slot is locked, so it must only build the
    /// future and leave the work to it.
    pub async fn coalesce<F, Fut>(&self, key: K, produce: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let (id, flight) = match self.registry.flights.entry(key.clone()) {
            Entry::Occupied(slot) => {
                trace!("joining in-flight request");
                metrics::record_coalesced_join();
                slot.get().clone()
            }
            Entry::Vacant(slot) => {
                let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
                let guard = FlightGuard {
                    registry: Arc::downgrade(&self.registry),
                    key: slot.key().clone(),
                    id,
                };
                let produced = AssertUnwindSafe(produce()).catch_unwind();
                let flight = async move {
                    let result = produced.await;
                    drop(guard);
                    match result {
                        Ok(result) => result,
                        Err(payload) => {
                            let panicked = FlightPanicked::from_payload(payload);
                            error!(message = panicked.message(), "in-flight request panicked");
                            Err(E::from(panicked))
                        }
                    }
                }
                .boxed()
                .shared();
                slot.insert((id, flight.clone()));
                (id, flight)
            }
        };

        let mut waiter = Waiter {
            registry: self.registry.clone(),
            key,
            id,
            flight,
            settled: false,
        };
        let result = (&mut waiter.flight).await;
        waiter.settled = true;
        result
    }

    /// Number of flights currently registered.
    pub fn in_flight(&self) -> usize {
        self.registry.flights.len()
    }

    /// Whether a flight for `key` is registered.
    pub fn is_in_flight(&self, key: &K) -> bool {
        self.registry.flights.contains_key(key)
    }
}

/// Owned by the flight future; unregisters it once the work is over.
struct FlightGuard<K, T, E>
where
    K: Hash + Eq,
{
    registry: Weak<Registry<K, T, E>>,
    key: K,
    id: u64,
}

impl<K, T, E> Drop for FlightGuard<K, T, E>
where
    K: Hash + Eq,
{
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry
                .flights
                .remove_if(&self.key, |_, (id, _)| *id == self.id);
        }
    }
}

/// Held by each caller while it waits. A caller dropped before the flight
/// settles unregisters the flight if nobody else is waiting on it.
struct Waiter<K, T, E>
where
    K: Hash + Eq,
{
    registry: Arc<Registry<K, T, E>>,
    key: K,
    id: u64,
    flight: Flight<T, E>,
    settled: bool,
}

impl<K, T, E> Drop for Waiter<K, T, E>
where
    K: Hash + Eq,
{
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        // The registry and this waiter hold the only two handles.
        let abandoned = self.registry.flights.remove_if(&self.key, |_, (id, flight)| {
            *id == self.id && flight.strong_count() == Some(2)
        });
        if abandoned.is_some() {
            trace!("last waiter left, abandoning flight");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use futures::future::join_all;

    use super::*;

    type Coalescer = RequestCoalescer<&'static str, u32, String>;

    impl From<FlightPanicked> for String {
        fn from(panicked: FlightPanicked) -> Self {
            panicked.to_string()
        }
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_call() {
        let coalescer = Coalescer::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let results = join_all((0..10).map(|_| {
            let calls = calls.clone();
            coalescer.coalesce("palette:1", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(42)
            })
        }))
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|result| result == &Ok(42)));
        assert_eq!(coalescer.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_failure_reaches_every_waiter_and_is_not_cached() {
        let coalescer = Coalescer::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let produce = |calls: Arc<AtomicUsize>| {
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                Err::<u32, _>("upstream down".to_owned())
            }
        };

        let results = join_all(
            (0..3).map(|_| coalescer.coalesce("palette:1", produce(calls.clone()))),
        )
        .await;
        assert!(results.iter().all(|r| r == &Err("upstream down".to_owned())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Settled flights are gone: the next caller starts a new one.
        let _ = coalescer.coalesce("palette:1", produce(calls.clone())).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_coalesce() {
        let coalescer = Coalescer::new();
        let (a, b) = tokio::join!(
            coalescer.coalesce("a", || async { Ok(1) }),
            coalescer.coalesce("b", || async { Ok(2) }),
        );
        assert_eq!((a, b), (Ok(1), Ok(2)));
    }

    #[tokio::test]
    async fn test_abandoned_flight_is_unregistered() {
        let coalescer = Coalescer::new();

        let waited = tokio::time::timeout(
            Duration::from_millis(5),
            coalescer.coalesce("slow", || std::future::pending()),
        )
        .await;
        assert!(waited.is_err());
        assert_eq!(coalescer.in_flight(), 0);

        assert_eq!(coalescer.coalesce("slow", || async { Ok(7) }).await, Ok(7));
    }

    async fn explode() -> Result<u32, String> {
        tokio::time::sleep(Duration::from_millis(10)).await;
        panic!("upstream handler panicked")
    }

    #[tokio::test]
    async fn test_panic_reaches_every_waiter_as_an_error() {
        let coalescer = Coalescer::new();

        let results = join_all((0..3).map(|_| coalescer.coalesce("boom", explode))).await;
        for result in results {
            let message = result.unwrap_err();
            assert_eq!(
                message,
                "in-flight request panicked: upstream handler panicked"
            );
        }
        assert_eq!(coalescer.in_flight(), 0);

        assert_eq!(coalescer.coalesce("boom", || async { Ok(1) }).await, Ok(1));
    }

    #[test]
    fn test_panic_payload_message() {
        let owned = FlightPanicked::from_payload(Box::new(format!("code {}", 7)));
        assert_eq!(owned.message(), "code 7");
        let opaque = FlightPanicked::from_payload(Box::new(7u8));
        assert_eq!(opaque.message(), "unknown panic payload");
    }
}
