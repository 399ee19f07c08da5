#![doc = include_str!("../README.md")]

mod backend;
pub mod error;
pub mod format;
pub mod store;

pub use backend::{Backend, BackendResult};
pub use error::{BackendError, DeleteStatus};
pub use format::{Format, FormatError};
pub use store::{CacheStore, CacheStoreBuilder, Lookup};
