//! Time source abstraction.
//!
//! Freshness and rate-limit windows are computed against a [`Clock`] that is
//! injected into every component, so tests can move time explicitly instead of
//! sleeping.

use std::fmt::Debug;

use chrono::{DateTime, Utc};

/// A source of the current wall-clock time.
pub trait Clock: Debug + Send + Sync {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(any(test, feature = "test-helpers"))]
pub use mock::MockClock;

#[cfg(any(test, feature = "test-helpers"))]
mod mock {
    use std::sync::{Arc, Mutex, PoisonError};

    use chrono::{DateTime, Duration, Utc};

    use super::Clock;

    /// Manually driven clock for tests.
    ///
    /// Clones share the same instant.
    #[derive(Debug, Clone)]
    pub struct MockClock {
        now: Arc<Mutex<DateTime<Utc>>>,
    }

    impl MockClock {
        /// Creates a clock frozen at `now`.
        pub fn new(now: DateTime<Utc>) -> Self {
            Self {
                now: Arc::new(Mutex::new(now)),
            }
        }

        /// Creates a clock frozen at the current system time.
        pub fn starting_now() -> Self {
            Self::new(Utc::now())
        }

        /// Moves the clock forward.
        pub fn advance(&self, by: Duration) {
            let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
            *now += by;
        }

        /// Moves the clock forward by whole seconds.
        pub fn advance_secs(&self, secs: i64) {
            self.advance(Duration::seconds(secs));
        }

        /// Sets the clock to an absolute instant.
        pub fn set(&self, to: DateTime<Utc>) {
            *self.now.lock().unwrap_or_else(PoisonError::into_inner) = to;
        }
    }

    impl Clock for MockClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }
}
