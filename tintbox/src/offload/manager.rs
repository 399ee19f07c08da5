//! OffloadManager implementation for background task execution.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use smol_str::SmolStr;
use tintbox_core::{Offload, OffloadKey};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info_span, warn};

use super::policy::{OffloadConfig, TimeoutPolicy};
use crate::metrics;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Handle to a spawned offload task.
#[derive(Debug)]
pub struct OffloadHandle {
    handle: JoinHandle<()>,
    id: u64,
}

impl OffloadHandle {
    /// Check if the task is finished.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Abort the task.
    pub fn abort(&self) {
        self.handle.abort();
    }
}

/// Internal state shared across clones.
#[derive(Debug)]
struct OffloadManagerInner {
    config: OffloadConfig,
    tasks: DashMap<OffloadKey, OffloadHandle>,
    key_counter: AtomicU64,
}

/// Manager for offloading tasks to background execution.
///
/// Supports task deduplication, a concurrency limit, timeout policies, and
/// metrics collection. Clones share the same task registry.
#[derive(Clone, Debug)]
pub struct OffloadManager {
    inner: Arc<OffloadManagerInner>,
}

impl OffloadManager {
    /// Create a new OffloadManager with the given configuration.
    pub fn new(config: OffloadConfig) -> Self {
        Self {
            inner: Arc::new(OffloadManagerInner {
                config,
                tasks: DashMap::new(),
                key_counter: AtomicU64::new(0),
            }),
        }
    }

    /// Create a new OffloadManager with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(OffloadConfig::default())
    }

    /// Returns the configuration this manager was created with.
    pub fn config(&self) -> &OffloadConfig {
        &self.inner.config
    }

    fn next_id(&self) -> u64 {
        self.inner.key_counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Spawn a task with auto-generated key and specified kind.
    ///
    /// The kind is used for metrics labels and tracing. Returns the generated
    /// key, or `None` if the concurrency limit dropped the task.
    pub fn spawn<F>(&self, kind: impl Into<SmolStr>, task: F) -> Option<OffloadKey>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let key = OffloadKey::Generated {
            kind: kind.into(),
            id: self.next_id(),
        };
        self.spawn_with_key(key.clone(), task).then_some(key)
    }

    /// Spawn a task with a specific key.
    ///
    /// If a task with the same cache-derived key is already in flight and
    /// deduplication is enabled, the new task is skipped. When
    /// `max_concurrent_tasks` is reached the task is dropped.
    ///
    /// Returns `true` if the task was spawned.
    pub fn spawn_with_key<F>(&self, key: OffloadKey, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let key_type = key.key_type();

        if let Some(max) = self.inner.config.max_concurrent_tasks
            && self.active_task_count() >= max
        {
            warn!(?key, max, "Offload task dropped - concurrency limit reached");
            metrics::record_offload_dropped(&key_type);
            return false;
        }

        let deduplicate = self.inner.config.deduplicate && key.is_deduplicated();
        let id = self.next_id();

        // The task removes its own registry entry, so it is inserted while
        // the entry lock is still held.
        match self.inner.tasks.entry(key.clone()) {
            Entry::Occupied(slot) if deduplicate && !slot.get().is_finished() => {
                debug!(?key, "Task deduplicated - already in flight");
                metrics::record_offload_deduplicated(&key_type);
                return false;
            }
            Entry::Occupied(mut slot) => {
                slot.insert(self.spawn_inner(task, key, id));
            }
            Entry::Vacant(slot) => {
                slot.insert(self.spawn_inner(task, key, id));
            }
        }

        metrics::record_offload_spawned(&key_type);
        true
    }

    /// Get the number of currently active tasks.
    pub fn active_task_count(&self) -> usize {
        self.inner.tasks.iter().filter(|e| !e.is_finished()).count()
    }

    /// Get the total number of tracked tasks (including finished).
    pub fn total_task_count(&self) -> usize {
        self.inner.tasks.len()
    }

    /// Clean up finished task handles.
    pub fn cleanup_finished(&self) {
        self.inner.tasks.retain(|_, handle| !handle.is_finished());
    }

    /// Cancel all running tasks.
    pub fn cancel_all(&self) {
        for entry in self.inner.tasks.iter() {
            entry.abort();
        }
    }

    /// Cancel a specific task by key.
    pub fn cancel(&self, key: &OffloadKey) -> bool {
        if let Some(entry) = self.inner.tasks.get(key) {
            entry.abort();
            true
        } else {
            false
        }
    }

    /// Check if a task with the given key is in flight.
    pub fn is_in_flight(&self, key: &OffloadKey) -> bool {
        self.inner.tasks.get(key).is_some_and(|h| !h.is_finished())
    }

    /// Wait for all currently tracked tasks to complete.
    ///
    /// Tasks spawned while waiting are waited for too, so this also drains
    /// follow-up work such as the cache write issued by a revalidation.
    pub async fn wait_all(&self) {
        loop {
            self.cleanup_finished();
            if self.inner.tasks.is_empty() {
                break;
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    /// Wait for all tasks with a timeout.
    ///
    /// Returns `true` if all tasks completed within the timeout,
    /// `false` if the timeout was reached.
    pub async fn wait_all_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait_all()).await.is_ok()
    }

    fn spawn_inner<F>(&self, task: F, key: OffloadKey, id: u64) -> OffloadHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let timeout_policy = self.inner.config.timeout_policy;
        let inner = self.inner.clone();
        let key_type = key.key_type();

        let span = info_span!(
            "offload_task",
            key_type = %key_type,
            key = ?key,
        );

        let handle = tokio::spawn(
            async move {
                let start = Instant::now();
                let timed_out = match timeout_policy {
                    TimeoutPolicy::None => {
                        task.await;
                        false
                    }
                    TimeoutPolicy::Cancel(duration) => {
                        let timed_out = tokio::time::timeout(duration, task).await.is_err();
                        if timed_out {
                            warn!(?key, "Offload task cancelled due to timeout");
                        }
                        timed_out
                    }
                    TimeoutPolicy::Warn(duration) => {
                        task.await;
                        let elapsed = start.elapsed();
                        if elapsed > duration {
                            warn!(
                                ?key,
                                elapsed_ms = elapsed.as_millis(),
                                threshold_ms = duration.as_millis(),
                                "Offload task exceeded timeout threshold"
                            );
                        }
                        false
                    }
                };
                inner.tasks.remove_if(&key, |_, handle| handle.id == id);
                metrics::record_offload_finished(start, &key_type, timed_out);
            }
            .instrument(span),
        );

        OffloadHandle { handle, id }
    }
}

impl Default for OffloadManager {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl Offload for OffloadManager {
    fn spawn<F>(&self, kind: impl Into<SmolStr>, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        OffloadManager::spawn(self, kind, future);
    }

    fn spawn_with_key<F>(&self, key: OffloadKey, future: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        OffloadManager::spawn_with_key(self, key, future)
    }
}
