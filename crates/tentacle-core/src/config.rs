//! Tentacle configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, TentacleError};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TentacleConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

impl TentacleConfig {
    /// Load config from the default path (~/.tentacle/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TentacleError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| TentacleError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| TentacleError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Tentacle home directory (~/.tentacle).
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".tentacle")
    }
}

/// Durable schedule store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
}

fn default_store_path() -> String {
    "~/.tentacle/store.db".into()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

/// Broker (invocation queue) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_path")]
    pub path: String,
    /// Queue invocations are published to unless an entry overrides it.
    #[serde(default = "default_queue")]
    pub queue: String,
    /// Seconds before an unacknowledged delivery becomes visible again.
    #[serde(default = "default_redelivery_secs")]
    pub redelivery_secs: u64,
}

fn default_broker_path() -> String {
    "~/.tentacle/broker.db".into()
}
fn default_queue() -> String {
    "tentacle".into()
}
fn default_redelivery_secs() -> u64 {
    300
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            path: default_broker_path(),
            queue: default_queue(),
            redelivery_secs: default_redelivery_secs(),
        }
    }
}

/// Scheduler core configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between evaluation cycles.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// Logical scheduler role; replicas sharing a role contend for one lock.
    #[serde(default = "default_role")]
    pub role: String,
    /// Lock lease in seconds. Must outlive a tick so the active instance
    /// refreshes before expiry; see `SchedulerConfig::validate`.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
    /// Which ticker implementation to run ("core" or "noop").
    #[serde(default = "default_ticker")]
    pub ticker: String,
}

fn default_tick_secs() -> u64 {
    5
}
fn default_role() -> String {
    "default".into()
}
fn default_lease_secs() -> u64 {
    15
}
fn default_ticker() -> String {
    "core".into()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            role: default_role(),
            lease_secs: default_lease_secs(),
            ticker: default_ticker(),
        }
    }
}

impl SchedulerConfig {
    /// Lease must cover at least two ticks, otherwise the active instance
    /// can lose its own lock between refreshes.
    pub fn validate(&self) -> Result<()> {
        if self.tick_secs == 0 {
            return Err(TentacleError::config("scheduler.tick_secs must be >= 1"));
        }
        if self.lease_secs < self.tick_secs * 2 {
            return Err(TentacleError::config(format!(
                "scheduler.lease_secs ({}) must be at least twice tick_secs ({})",
                self.lease_secs, self.tick_secs
            )));
        }
        Ok(())
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of concurrent consumers.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Per-action execution timeout in seconds.
    #[serde(default = "default_action_timeout_secs")]
    pub action_timeout_secs: u64,
}

fn default_concurrency() -> usize {
    4
}
fn default_action_timeout_secs() -> u64 {
    30
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            action_timeout_secs: default_action_timeout_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TentacleConfig::default();
        assert_eq!(config.scheduler.tick_secs, 5);
        assert_eq!(config.scheduler.role, "default");
        assert_eq!(config.broker.queue, "tentacle");
        assert_eq!(config.worker.concurrency, 4);
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml = r#"
            [scheduler]
            tick_secs = 10
            role = "reports"

            [broker]
            queue = "reports"
        "#;
        let config: TentacleConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.scheduler.tick_secs, 10);
        assert_eq!(config.scheduler.role, "reports");
        assert_eq!(config.broker.queue, "reports");
        // Untouched sections fall back to defaults.
        assert_eq!(config.worker.concurrency, 4);
        assert_eq!(config.scheduler.lease_secs, 15);
    }

    #[test]
    fn test_scheduler_validate() {
        let mut sched = SchedulerConfig::default();
        assert!(sched.validate().is_ok());

        sched.lease_secs = sched.tick_secs; // lease too short
        assert!(sched.validate().is_err());

        sched.tick_secs = 0;
        assert!(sched.validate().is_err());
    }

    #[test]
    fn test_roundtrip() {
        let config = TentacleConfig::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        let back: TentacleConfig = toml::from_str(&toml).unwrap();
        assert_eq!(back.broker.redelivery_secs, config.broker.redelivery_secs);
    }
}
