//! Rate limit store with injected faults.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use tintbox_ratelimit::{KvError, KvStore, MemoryKvStore, Versioned, WindowRecord, WriteOutcome};

/// Wraps a [`MemoryKvStore`], reporting a version conflict for the first
/// `conflicts` writes and failing every call while marked down.
#[derive(Debug)]
pub struct ScriptedKvStore {
    inner: MemoryKvStore,
    conflicts: AtomicU32,
    writes: AtomicU32,
    down: AtomicBool,
}

impl ScriptedKvStore {
    pub fn new(inner: MemoryKvStore) -> Self {
        Self {
            inner,
            conflicts: AtomicU32::new(0),
            writes: AtomicU32::new(0),
            down: AtomicBool::new(false),
        }
    }

    /// Makes the next `n` writes lose the version race.
    pub fn conflict_next(&self, n: u32) {
        self.conflicts.store(n, Ordering::SeqCst);
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Write attempts seen so far, including conflicting ones.
    pub fn writes(&self) -> u32 {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_up(&self) -> Result<(), KvError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(KvError::Connection(Box::new(std::io::Error::other(
                "connection refused",
            ))));
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for ScriptedKvStore {
    async fn read(&self, key: &str) -> Result<Option<Versioned<WindowRecord>>, KvError> {
        self.check_up()?;
        self.inner.read(key).await
    }

    async fn write_if_version(
        &self,
        key: &str,
        record: &WindowRecord,
        expected: Option<u64>,
    ) -> Result<WriteOutcome, KvError> {
        self.check_up()?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Ok(WriteOutcome::Conflict);
        }
        self.inner.write_if_version(key, record, expected).await
    }
}
