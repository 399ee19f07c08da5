//! Background task execution.
//!
//! Cache writes, lazy deletes of expired entries and stale revalidations are
//! handed to an [`OffloadManager`] so the response path never waits on them.
//!
//! ```ignore
//! use tintbox::offload::{OffloadConfig, OffloadManager};
//!
//! let manager = OffloadManager::new(OffloadConfig::builder().timeout(Duration::from_secs(30)).build());
//! manager.spawn("warmup", async { /* ... */ });
//! manager.wait_all().await;
//! ```

mod manager;
mod policy;

pub use manager::{OffloadHandle, OffloadManager};
pub use policy::{OffloadConfig, OffloadConfigBuilder, TimeoutPolicy};
pub use tintbox_core::{Offload, OffloadKey};
