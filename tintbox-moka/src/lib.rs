#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

mod backend;
mod builder;
pub mod metrics;

pub use backend::MokaBackend;
pub use builder::{DEFAULT_MAX_ENTRIES, MokaBackendBuilder};
pub use moka::policy::EvictionPolicy;
