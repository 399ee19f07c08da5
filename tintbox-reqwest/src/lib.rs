#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

mod fetcher;

pub use fetcher::{DEFAULT_ERROR_TEXT_BYTES, HttpFetcher, HttpFetcherBuilder};

/// Re-export reqwest for convenience in type annotations.
pub use reqwest;
