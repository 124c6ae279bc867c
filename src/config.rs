//! Configuration types for Discord Purge

use crate::driver::{DeletionPolicy, MIN_DELETE_INTERVAL};
use crate::endpoints::DEFAULT_API_BASE;
use crate::types::{Error, Result, Snowflake};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tokio::fs;

/// Full configuration loaded from YAML
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub run: RunConfig,
}

/// Remote API settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    /// API root including the version segment
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Account token; the DISCORD_TOKEN environment variable wins over this
    #[serde(default)]
    pub token: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: None,
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_API_BASE.to_string()
}

/// Deletion run settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunConfig {
    /// Count what would be deleted without deleting anything
    #[serde(default)]
    pub dry_run: bool,

    /// Channel IDs whose messages are kept (quoted strings)
    #[serde(default)]
    pub skip_channels: Vec<String>,

    /// Pause after each deletion, in milliseconds
    #[serde(default = "default_delete_interval_ms")]
    pub delete_interval_ms: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            skip_channels: Vec::new(),
            delete_interval_ms: default_delete_interval_ms(),
        }
    }
}

fn default_delete_interval_ms() -> u64 {
    MIN_DELETE_INTERVAL.as_millis() as u64
}

impl Config {
    /// Load configuration from a YAML file
    pub async fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).await?;
        let config: Config = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let base = self.api.base_url.trim();
        if !(base.starts_with("https://") || base.starts_with("http://")) {
            return Err(Error::Config(format!(
                "api.base_url must be an http(s) URL, got {:?}",
                self.api.base_url
            )));
        }

        if self.run.delete_interval_ms < default_delete_interval_ms() {
            return Err(Error::Config(format!(
                "run.delete_interval_ms must be at least {}, got {}",
                default_delete_interval_ms(),
                self.run.delete_interval_ms
            )));
        }

        for id in &self.run.skip_channels {
            Snowflake::parse(id).map_err(|_| {
                Error::Config(format!("Invalid channel ID in run.skip_channels: {:?}", id))
            })?;
        }

        Ok(())
    }

    /// Build the deletion policy, merging in extra channels to skip
    pub fn policy(&self, extra_skips: HashSet<Snowflake>) -> Result<DeletionPolicy> {
        let mut skip_channels = extra_skips;
        for id in &self.run.skip_channels {
            skip_channels.insert(Snowflake::parse(id)?);
        }

        Ok(DeletionPolicy {
            dry_run: self.run.dry_run,
            skip_channels,
            delete_interval: Duration::from_millis(self.run.delete_interval_ms),
        })
    }
}
