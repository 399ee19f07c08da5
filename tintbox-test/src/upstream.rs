//! Counting upstream double.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use tintbox::FetchError;

/// Boxed upstream call accepted by `CachedFetch::fetch`.
pub type UpstreamFn<T> = Box<dyn FnOnce() -> BoxFuture<'static, Result<T, FetchError>> + Send>;

/// Hands out upstream calls and counts how many actually ran.
#[derive(Clone, Debug, Default)]
pub struct Upstream {
    calls: Arc<AtomicUsize>,
}

impl Upstream {
    pub fn new() -> Self {
        Self::default()
    }

    /// A call that answers `value` after `delay`.
    pub fn returning<T>(&self, value: T, delay: Duration) -> UpstreamFn<T>
    where
        T: Send + 'static,
    {
        let calls = self.calls.clone();
        Box::new(move || {
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(value)
            })
        })
    }

    /// A call that fails with `status`.
    pub fn failing<T>(&self, status: u16) -> UpstreamFn<T>
    where
        T: Send + 'static,
    {
        let calls = self.calls.clone();
        Box::new(move || {
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(FetchError::Upstream {
                    status,
                    text: "upstream unavailable".to_owned(),
                })
            })
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}
