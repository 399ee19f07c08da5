#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod backend;
pub mod error;
pub mod kv;

#[doc(inline)]
pub use crate::backend::{RedisBackend, RedisBackendBuilder};
#[doc(inline)]
pub use crate::error::Error;
#[doc(inline)]
pub use crate::kv::RedisKvStore;
