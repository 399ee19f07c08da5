use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What happens to a background task that runs long.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicy {
    /// Tasks run to completion however long they take.
    #[default]
    None,
    /// The task is dropped once the duration elapses.
    Cancel(#[serde(with = "humantime_serde")] Duration),
    /// The task completes, and a warning is logged if it took longer.
    Warn(#[serde(with = "humantime_serde")] Duration),
}

/// Settings of an [`OffloadManager`](super::OffloadManager).
///
/// ```yaml
/// max_concurrent_tasks: 256
/// timeout_policy:
///   cancel: 30s
/// deduplicate: true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OffloadConfig {
    /// Cap on tasks running at once; spawns over the cap are dropped with a
    /// warning. Unlimited when absent.
    pub max_concurrent_tasks: Option<usize>,
    /// Applied to every task.
    pub timeout_policy: TimeoutPolicy,
    /// Collapse revalidations and evictions of one key while one is running.
    pub deduplicate: bool,
}

impl Default for OffloadConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: None,
            timeout_policy: TimeoutPolicy::None,
            deduplicate: true,
        }
    }
}

impl OffloadConfig {
    /// Starts from the defaults.
    pub fn builder() -> OffloadConfigBuilder {
        OffloadConfigBuilder(Self::default())
    }
}

/// Builder for [`OffloadConfig`].
#[derive(Debug, Clone)]
pub struct OffloadConfigBuilder(OffloadConfig);

impl OffloadConfigBuilder {
    /// Caps concurrently running tasks.
    pub fn max_concurrent_tasks(mut self, max: usize) -> Self {
        self.0.max_concurrent_tasks = Some(max);
        self
    }

    /// Sets the timeout policy.
    pub fn timeout_policy(mut self, policy: TimeoutPolicy) -> Self {
        self.0.timeout_policy = policy;
        self
    }

    /// Shorthand for [`TimeoutPolicy::Cancel`].
    pub fn timeout(self, after: Duration) -> Self {
        self.timeout_policy(TimeoutPolicy::Cancel(after))
    }

    /// Turns per-key deduplication on or off.
    pub fn deduplicate(mut self, enabled: bool) -> Self {
        self.0.deduplicate = enabled;
        self
    }

    /// Finishes the configuration.
    pub fn build(self) -> OffloadConfig {
        self.0
    }
}
