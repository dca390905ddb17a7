//! Configuration management for mvault.
//!
//! Configuration is loaded from multiple sources with precedence:
//! 1. `--data-dir` / `MEMVAULT_DATA_DIR`
//! 2. Config file (`MEMVAULT_CONFIG`, else `<data dir>/config.toml`)
//! 3. Default values

use anyhow::{Context, Result};
use directories::ProjectDirs;
use memvault_core::{MemoryConfig, VaultConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Paths
    pub paths: PathsConfig,

    /// Tier sizes and promotion policy
    pub memory: MemoryConfig,

    /// Snapshot key rotation and backups
    pub storage: StoragePolicy,

    /// Long-term archive
    pub long_term: LongTermPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Vault data directory
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoragePolicy {
    /// Backups to keep
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,

    /// Rotate the snapshot key after this many days
    #[serde(default = "default_key_rotation_days")]
    pub key_rotation_days: u64,

    /// Back up the previous snapshot on every save
    #[serde(default = "default_true")]
    pub backup_on_save: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LongTermPolicy {
    /// Archive long-term memories older than this many days
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
}

const DAY_SECS: u64 = 86400;

// Default value functions
fn default_data_dir() -> PathBuf {
    if let Some(proj_dirs) = ProjectDirs::from("dev", "memvault", "memvault") {
        proj_dirs.data_dir().to_path_buf()
    } else {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".memvault")
    }
}

fn default_max_backups() -> usize {
    10
}

fn default_key_rotation_days() -> u64 {
    30
}

fn default_retention_days() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl Default for StoragePolicy {
    fn default() -> Self {
        Self {
            max_backups: default_max_backups(),
            key_rotation_days: default_key_rotation_days(),
            backup_on_save: default_true(),
        }
    }
}

impl Default for LongTermPolicy {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file {}", config_path.display()))?;
        Self::from_toml(&content)
    }

    /// Parse a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    /// Get the config file path.
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("MEMVAULT_CONFIG") {
            PathBuf::from(path)
        } else {
            default_data_dir().join("config.toml")
        }
    }

    /// Override the data directory when one was given
    pub fn with_data_dir(mut self, data_dir: Option<PathBuf>) -> Self {
        if let Some(data_dir) = data_dir {
            self.paths.data_dir = data_dir;
        }
        self
    }

    /// Vault configuration rooted at the data directory
    pub fn vault_config(&self) -> VaultConfig {
        let mut vault = VaultConfig::new(&self.paths.data_dir).with_memory(self.memory.clone());
        vault.storage.max_backups = self.storage.max_backups;
        vault.storage.key_rotation_interval = self.storage.key_rotation_days.saturating_mul(DAY_SECS);
        vault.storage.backup_on_save = self.storage.backup_on_save;
        vault.long_term.retention = self.long_term.retention_days.saturating_mul(DAY_SECS);
        vault
    }
}
