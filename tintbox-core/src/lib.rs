#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod clock;
pub mod key;
pub mod label;
pub mod offload;
pub mod value;

#[cfg(any(test, feature = "test-helpers"))]
pub use clock::MockClock;
pub use clock::{Clock, SystemClock};
pub use key::{CacheKey, CacheKeyBuilder, DEFAULT_KEY_VERSION, KeyValue};
pub use label::BackendLabel;
pub use offload::{DisabledOffload, Offload, OffloadKey, TokioOffload};
#[doc(hidden)]
pub use smol_str::SmolStr;
pub use value::{CacheEntry, Freshness};

/// Raw byte data type used for serialized cache payloads.
/// Using `Bytes` provides efficient zero-copy cloning via reference counting.
pub type Raw = bytes::Bytes;
