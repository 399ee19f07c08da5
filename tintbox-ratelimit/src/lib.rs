#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod backoff;
pub mod config;
pub mod distributed;
pub mod error;
pub mod kv;
pub mod limiter;
pub mod metrics;
pub mod sliding;

pub use backoff::Backoff;
pub use config::{DistributedSettings, LimiterBackend, MemorySettings, RateLimitConfig};
pub use distributed::{DistributedLimiter, DistributedLimiterBuilder, FailurePolicy};
pub use error::{KvError, RateLimitError, RateLimitExceeded};
pub use kv::{KvStore, MemoryKvStore, Versioned, WindowRecord, WriteOutcome};
pub use limiter::{RateLimitQuota, RateLimitStatus, RateLimiter};
pub use sliding::{SlidingWindowLimiter, SlidingWindowLimiterBuilder};
