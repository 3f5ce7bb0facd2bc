//! tablegrid.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_CLUSTER_COLLECTION: &str = "OrleansCluster";
const DEFAULT_REMINDER_COLLECTION: &str = "OrleansReminders";
const DEFAULT_GATEWAY_REFRESH: &str = "60s";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableGridConfig {
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub membership: MembershipConfig,
    #[serde(default)]
    pub reminders: ReminderConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub cluster_id: String,
    pub service_id: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// redb file backing the document store. In-memory when absent.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MembershipConfig {
    #[serde(default = "default_cluster_collection")]
    pub collection: String,
    #[serde(default = "default_true")]
    pub can_create_resources: bool,
    /// Drop and recreate the collection at startup. Test isolation only.
    #[serde(default)]
    pub drop_collection_on_init: bool,
    /// How long clients may trust a gateway list (e.g. "60s").
    #[serde(default = "default_gateway_refresh")]
    pub gateway_refresh_period: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReminderConfig {
    #[serde(default = "default_reminder_collection")]
    pub collection: String,
    #[serde(default = "default_true")]
    pub can_create_resources: bool,
    #[serde(default)]
    pub drop_collection_on_init: bool,
}

fn default_cluster_collection() -> String {
    DEFAULT_CLUSTER_COLLECTION.to_string()
}

fn default_reminder_collection() -> String {
    DEFAULT_REMINDER_COLLECTION.to_string()
}

fn default_gateway_refresh() -> String {
    DEFAULT_GATEWAY_REFRESH.to_string()
}

fn default_true() -> bool {
    true
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            collection: default_cluster_collection(),
            can_create_resources: true,
            drop_collection_on_init: false,
            gateway_refresh_period: default_gateway_refresh(),
        }
    }
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            collection: default_reminder_collection(),
            can_create_resources: true,
            drop_collection_on_init: false,
        }
    }
}

impl MembershipConfig {
    /// Parsed `gateway_refresh_period`.
    pub fn gateway_refresh(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.gateway_refresh_period).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "membership.gateway_refresh_period {:?} is not a duration",
                self.gateway_refresh_period
            ))
        })
    }
}

impl TableGridConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: TableGridConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Scaffold a config with default collections and an in-memory store.
    pub fn scaffold(cluster_id: &str, service_id: &str) -> Self {
        TableGridConfig {
            cluster: ClusterConfig {
                cluster_id: cluster_id.to_string(),
                service_id: service_id.to_string(),
            },
            store: StoreConfig::default(),
            membership: MembershipConfig::default(),
            reminders: ReminderConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cluster.cluster_id.trim().is_empty() {
            return Err(ConfigError::Invalid("cluster.cluster_id is empty".into()));
        }
        if self.cluster.service_id.trim().is_empty() {
            return Err(ConfigError::Invalid("cluster.service_id is empty".into()));
        }
        if self.membership.collection.trim().is_empty() {
            return Err(ConfigError::Invalid("membership.collection is empty".into()));
        }
        if self.reminders.collection.trim().is_empty() {
            return Err(ConfigError::Invalid("reminders.collection is empty".into()));
        }
        self.membership.gateway_refresh()?;
        Ok(())
    }
}

/// Parse a duration string like "500ms", "5s", "2m", "1h", or a bare
/// number of seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.parse::<u64>().ok().map(|h| Duration::from_secs(h * 3600))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
