//! Error types for Redis operations.
//!
//! Errors convert into [`BackendError`] for the edge cache and into
//! [`KvError`] for the rate limit store.

use redis::RedisError;
use tintbox_backend::BackendError;
use tintbox_ratelimit::KvError;

/// Error type for Redis operations.
///
/// The connection is established lazily, so an unreachable server shows up on
/// the first operation rather than in [`RedisBackendBuilder::build`].
///
/// [`RedisBackendBuilder::build`]: crate::RedisBackendBuilder::build
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An error from the underlying Redis client: bad URL, connection
    /// failure, protocol or command error.
    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),

    /// A stored hash is missing fields or holds values that cannot be parsed.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl From<Error> for BackendError {
    fn from(error: Error) -> Self {
        match error {
            Error::Redis(error) => Self::unavailable(error),
            Error::Corrupt(reason) => Self::Malformed(reason),
        }
    }
}

impl From<Error> for KvError {
    fn from(error: Error) -> Self {
        match error {
            Error::Redis(error) => Self::Connection(Box::new(error)),
            Error::Corrupt(reason) => Self::Corrupt(reason),
        }
    }
}
