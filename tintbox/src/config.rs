//! Deployment configuration.
//!
//! ```yaml
//! key_version: 2
//! default_policy:
//!   Enabled:
//!     ttl: 5m
//!     stale: 2m
//! commands:
//!   random: Disabled
//!   palette:
//!     Enabled:
//!       ttl: 1h
//! upstream:
//!   timeout: 5s
//!   max_body_bytes: 1048576
//! offload:
//!   timeout_policy:
//!     cancel: 30s
//! rate_limit:
//!   limit: 10
//!   window: 60s
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tintbox_backend::Format;
use tintbox_core::{CacheKeyBuilder, DEFAULT_KEY_VERSION};
use tintbox_ratelimit::RateLimitConfig;

use crate::fetch::DEFAULT_UPSTREAM_TIMEOUT;
use crate::offload::OffloadConfig;
use crate::policy::CachePolicy;

/// Configuration loading failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The document is not valid YAML for this schema.
    #[error("failed to parse configuration: {0}")]
    Parse(String),
    /// The document parsed but holds unusable values.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Upstream call limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Deadline for one upstream call.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Largest response body accepted, in bytes.
    pub max_body_bytes: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_UPSTREAM_TIMEOUT,
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TintboxConfig {
    /// Schema version mixed into every cache key. Bump it to orphan entries
    /// written in an older payload shape.
    pub key_version: u32,
    /// Policy of commands without an entry in `commands`.
    pub default_policy: CachePolicy,
    /// Per-command policies.
    pub commands: BTreeMap<String, CachePolicy>,
    /// Upstream call limits.
    pub upstream: UpstreamConfig,
    /// Background task settings.
    pub offload: OffloadConfig,
    /// Payload encoding in the edge cache.
    pub format: Format,
    /// Per-key request quota. No limiting when absent.
    pub rate_limit: Option<RateLimitConfig>,
}

impl Default for TintboxConfig {
    fn default() -> Self {
        Self {
            key_version: DEFAULT_KEY_VERSION,
            default_policy: CachePolicy::default(),
            commands: BTreeMap::new(),
            upstream: UpstreamConfig::default(),
            offload: OffloadConfig::default(),
            format: Format::default(),
            rate_limit: None,
        }
    }
}

impl TintboxConfig {
    /// Parses and validates a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_saphyr::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values serde cannot rule out.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upstream.timeout.is_zero() {
            return Err(ConfigError::Invalid("upstream.timeout must be positive".to_owned()));
        }
        if self.upstream.max_body_bytes == 0 {
            return Err(ConfigError::Invalid(
                "upstream.max_body_bytes must be positive".to_owned(),
            ));
        }
        let policies = std::iter::once(("default_policy", &self.default_policy))
            .chain(self.commands.iter().map(|(name, policy)| (name.as_str(), policy)));
        for (name, policy) in policies {
            if let Some((ttl, _)) = policy.windows()
                && ttl.is_zero()
            {
                return Err(ConfigError::Invalid(format!("`{name}`: ttl must be positive")));
            }
        }
        if let Some(rate_limit) = &self.rate_limit
            && rate_limit.window.is_zero()
        {
            return Err(ConfigError::Invalid("rate_limit.window must be positive".to_owned()));
        }
        Ok(())
    }

    /// Cache policy of `command`.
    pub fn policy_for(&self, command: &str) -> CachePolicy {
        self.commands
            .get(command)
            .copied()
            .unwrap_or(self.default_policy)
    }

    /// Key builder for `command`, stamped with the configured key version.
    pub fn key_builder(&self, command: &str) -> CacheKeyBuilder {
        CacheKeyBuilder::new(command).version(self.key_version)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tintbox_ratelimit::{LimiterBackend, RateLimitQuota};

    use super::*;
    use crate::offload::TimeoutPolicy;

    const YAML: &str = r#"
key_version: 2
default_policy:
  Enabled:
    ttl: 5m
    stale: 2m
commands:
  random: Disabled
  palette:
    Enabled:
      ttl: 1h
upstream:
  timeout: 5s
  max_body_bytes: 65536
offload:
  max_concurrent_tasks: 64
  timeout_policy:
    cancel: 30s
format: Bincode
rate_limit:
  limit: 10
  window: 60s
  backend:
    type: distributed
"#;

    #[test]
    fn test_full_document() {
        let config = TintboxConfig::from_yaml(YAML).unwrap();

        assert_eq!(config.key_version, 2);
        assert_eq!(
            config.policy_for("match"),
            CachePolicy::enabled(Duration::from_secs(300), Duration::from_secs(120))
        );
        assert_eq!(config.policy_for("random"), CachePolicy::Disabled);
        assert_eq!(
            config.policy_for("palette"),
            CachePolicy::enabled(Duration::from_secs(3600), Duration::ZERO)
        );
        assert_eq!(
            config.upstream,
            UpstreamConfig {
                timeout: Duration::from_secs(5),
                max_body_bytes: 65536,
            }
        );
        assert_eq!(config.offload.max_concurrent_tasks, Some(64));
        assert_eq!(
            config.offload.timeout_policy,
            TimeoutPolicy::Cancel(Duration::from_secs(30))
        );
        assert_eq!(config.format, Format::Bincode);

        let rate_limit = config.rate_limit.unwrap();
        assert_eq!(rate_limit.quota(), RateLimitQuota::per_minute(10));
        assert!(matches!(rate_limit.backend, LimiterBackend::Distributed(_)));
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = TintboxConfig::from_yaml("{}").unwrap();
        assert_eq!(config, TintboxConfig::default());
        assert_eq!(config.policy_for("anything"), CachePolicy::default());
    }

    #[test]
    fn test_key_version_reaches_keys() {
        let v1 = TintboxConfig::default();
        let v2 = TintboxConfig {
            key_version: 2,
            ..TintboxConfig::default()
        };
        let a = v1.key_builder("match").param("hex", "#fff").build();
        let b = v2.key_builder("match").param("hex", "#fff").build();
        assert_ne!(a, b);
        assert_eq!(b.version(), 2);
    }

    #[test]
    fn test_rejects_zero_ttl() {
        let yaml = "commands:\n  match:\n    Enabled:\n      ttl: 0s\n";
        assert!(matches!(
            TintboxConfig::from_yaml(yaml),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_rejects_malformed_document() {
        assert!(matches!(
            TintboxConfig::from_yaml("upstream: [1, 2"),
            Err(ConfigError::Parse(_))
        ));
    }
}
