//! Typed engine configuration.
//!
//! Every field has a default, so an empty config is valid. Unknown keys are
//! rejected at every level: a misspelt override must not be silently ignored.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub primary: PrimaryConfig,
    pub durable: DurableConfig,
    pub mirror: MirrorConfig,
    pub notifications: NotificationConfig,
    pub acknowledge: AcknowledgeConfig,
}

/// Primary (live) feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PrimaryConfig {
    /// Key of the live alert slot; wins same-timestamp ties in the merged view.
    pub sentinel_key: String,
    /// Only mirror these keys. Empty = every key.
    pub watch_keys: Vec<String>,
    /// Capacity of the feed channel.
    pub feed_buffer: usize,
}

impl Default for PrimaryConfig {
    fn default() -> Self {
        Self {
            sentinel_key: "0".to_string(),
            watch_keys: Vec::new(),
            feed_buffer: 256,
        }
    }
}

/// Durable (document) feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DurableConfig {
    /// Snapshot size: the N most recent documents.
    pub feed_limit: usize,
    pub feed_buffer: usize,
    /// Name of the env var holding the database URL (never the URL itself).
    pub database_url_env: String,
}

impl Default for DurableConfig {
    fn default() -> Self {
        Self {
            feed_limit: 50,
            feed_buffer: 16,
            database_url_env: "HS_DATABASE_URL".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MirrorConfig {
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
    pub queue_capacity: usize,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff_ms: 250,
            queue_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub throttle_window_ms: i64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            throttle_window_ms: 300_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AcknowledgeConfig {
    pub primary_backwrite_attempts: u32,
    pub primary_backwrite_backoff_ms: u64,
}

impl Default for AcknowledgeConfig {
    fn default() -> Self {
        Self {
            primary_backwrite_attempts: 3,
            primary_backwrite_backoff_ms: 500,
        }
    }
}

impl EngineConfig {
    pub fn from_json(v: &Value) -> Result<Self> {
        let cfg: EngineConfig =
            serde_json::from_value(v.clone()).context("CONFIG_INVALID: engine config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.primary.sentinel_key.trim().is_empty() {
            bail!("CONFIG_INVALID primary.sentinel_key must not be empty");
        }
        if self.primary.feed_buffer == 0 {
            bail!("CONFIG_INVALID primary.feed_buffer must be > 0");
        }
        if self.durable.feed_limit == 0 {
            bail!("CONFIG_INVALID durable.feed_limit must be > 0");
        }
        if self.durable.feed_buffer == 0 {
            bail!("CONFIG_INVALID durable.feed_buffer must be > 0");
        }
        if self.mirror.max_attempts == 0 {
            bail!("CONFIG_INVALID mirror.max_attempts must be >= 1");
        }
        if self.mirror.queue_capacity == 0 {
            bail!("CONFIG_INVALID mirror.queue_capacity must be > 0");
        }
        if self.notifications.throttle_window_ms < 0 {
            bail!("CONFIG_INVALID notifications.throttle_window_ms must be >= 0");
        }
        if self.acknowledge.primary_backwrite_attempts == 0 {
            bail!("CONFIG_INVALID acknowledge.primary_backwrite_attempts must be >= 1");
        }
        Ok(())
    }
}
