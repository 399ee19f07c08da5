#![doc = include_str!("../README.md")]

pub mod kv;
pub mod mock_backend;
pub mod tracing;
pub mod upstream;

pub use kv::ScriptedKvStore;
pub use mock_backend::{BackendCounters, FailingBackend, MockBackend};
pub use tintbox_core::MockClock;
pub use upstream::Upstream;
