//! Errors surfaced to callers of [`CachedFetch`](crate::CachedFetch).
//!
//! Cache backend failures never appear here: the store treats them as misses
//! and dropped writes. Every variant is an upstream outcome, and all of them
//! are `Clone` so one coalesced result can be handed to every waiter.

use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::coalesce::FlightPanicked;

/// Failure of an upstream fetch.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// The upstream answered with a non-success status. Not retried here.
    #[error("upstream responded with status {status}: {text}")]
    Upstream {
        /// HTTP status code.
        status: u16,
        /// Response text, possibly truncated.
        text: String,
    },

    /// The upstream did not answer in time.
    #[error("upstream did not respond within {0:?}")]
    Timeout(Duration),

    /// The response body is larger than the configured ceiling.
    #[error("upstream response exceeds {limit} bytes")]
    ResponseTooLarge {
        /// Configured ceiling in bytes.
        limit: u64,
        /// Declared `Content-Length`, when the upstream sent one.
        declared: Option<u64>,
    },

    /// The request never produced a response (connection, TLS, DNS, ...).
    #[error("upstream transport error: {0}")]
    Transport(Arc<dyn StdError + Send + Sync>),

    /// The response could not be decoded into the expected type.
    #[error("upstream response could not be decoded: {0}")]
    Decode(String),

    /// The upstream call panicked.
    #[error(transparent)]
    Panicked(#[from] FlightPanicked),
}

impl FetchError {
    /// Wraps any error as a transport failure.
    pub fn transport<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Transport(Arc::new(error))
    }

    /// `true` for [`FetchError::Timeout`]; callers usually answer with a
    /// "try again" message.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// `true` for [`FetchError::ResponseTooLarge`].
    pub fn is_too_large(&self) -> bool {
        matches!(self, Self::ResponseTooLarge { .. })
    }

    /// Upstream status code, if the upstream answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Upstream { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_helpers() {
        let upstream = FetchError::Upstream {
            status: 503,
            text: "unavailable".to_owned(),
        };
        assert_eq!(upstream.status(), Some(503));
        assert!(!upstream.is_timeout());

        assert!(FetchError::Timeout(Duration::from_secs(5)).is_timeout());
        assert!(
            FetchError::ResponseTooLarge {
                limit: 1024,
                declared: Some(4096)
            }
            .is_too_large()
        );
        assert_eq!(FetchError::Decode("eof".to_owned()).status(), None);
    }

    #[test]
    fn test_transport_keeps_message() {
        let error = FetchError::transport(std::io::Error::other("connection reset"));
        assert_eq!(error.to_string(), "upstream transport error: connection reset");
        assert!(error.clone().to_string().contains("connection reset"));
    }
}
