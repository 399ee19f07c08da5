//! Edge cache failures.

use thiserror::Error;

type Source = Box<dyn std::error::Error + Send + Sync>;

/// Failure of a [`Backend`](crate::Backend) operation.
///
/// Only logged: a [`CacheStore`](crate::CacheStore) turns every one of these
/// into a miss or a skipped write.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The cache could not be reached, or it rejected the command.
    #[error("edge cache unavailable: {0}")]
    Unavailable(Source),

    /// A stored envelope is missing fields or holds unparsable metadata.
    #[error("malformed cache entry: {0}")]
    Malformed(String),
}

impl BackendError {
    /// Wraps a transport or protocol error.
    pub fn unavailable(source: impl Into<Source>) -> Self {
        Self::Unavailable(source.into())
    }
}

/// Outcome of [`Backend::remove`](crate::Backend::remove).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteStatus {
    /// An entry was removed.
    Deleted,
    /// There was nothing to remove.
    Missing,
}
