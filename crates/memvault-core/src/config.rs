//! Vault Configuration
//!
//! Defines configuration options for the tiered memory vault.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Vault configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Directory holding the long-term database, keys, snapshot and backups
    pub data_dir: PathBuf,

    /// In-memory tier and promotion policy
    pub memory: MemoryConfig,

    /// Snapshot storage, key rotation and backup retention
    pub storage: StorageConfig,

    /// Long-term encrypted store
    pub long_term: LongTermConfig,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self::new(".memvault")
    }
}

/// In-memory tier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Short-term ring buffer capacity (default: 1000)
    pub short_term_capacity: usize,

    /// Short-term TTL in seconds (default: 86400 = 24 hours)
    pub short_term_ttl: u64,

    /// Short-term utilization that triggers an unforced sweep (default: 0.7)
    pub short_term_compress_ratio: f64,

    /// Priority at which the short-term tier's own compress promotes (default: 0.7)
    pub short_term_promote_priority: f64,

    /// Mid-term pool capacity (default: 5000)
    pub mid_term_capacity: usize,

    /// Mid-term size above which it is compressed into long-term (default: 1000)
    pub mid_term_compress_threshold: usize,

    /// Priority at which an item is critical (default: 0.8)
    pub critical_priority: f64,

    /// A sweep moving more than this many items schedules a save (default: 10)
    pub save_after_moved: usize,

    /// Schedule background snapshot saves (default: true)
    pub auto_save: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            short_term_capacity: 1000,
            short_term_ttl: 86400, // 24 hours
            short_term_compress_ratio: 0.7,
            short_term_promote_priority: 0.7,
            mid_term_capacity: 5000,
            mid_term_compress_threshold: 1000,
            critical_priority: 0.8,
            save_after_moved: 10,
            auto_save: true,
        }
    }
}

/// Secure snapshot storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Encrypted snapshot file
    pub data_file: PathBuf,

    /// Raw key file for the snapshot key
    pub key_file: PathBuf,

    /// Raw key file for item content sealed into the snapshot and the
    /// long-term store
    pub content_key_file: PathBuf,

    /// Directory holding timestamped backups
    pub backup_dir: PathBuf,

    /// Maximum number of retained backups (default: 10)
    pub max_backups: usize,

    /// Key rotation interval in seconds (default: 2592000 = 30 days)
    pub key_rotation_interval: u64,

    /// Back up the previous blob before every save (default: true)
    pub backup_on_save: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::in_dir(".memvault")
    }
}

impl StorageConfig {
    /// Default storage layout rooted at `dir`
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            data_file: dir.join("snapshot.enc"),
            key_file: dir.join("storage.key"),
            content_key_file: dir.join("content.key"),
            backup_dir: dir.join("backups"),
            max_backups: 10,
            key_rotation_interval: 30 * 86400, // 30 days
            backup_on_save: true,
        }
    }
}

/// Long-term store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LongTermConfig {
    /// SQLite database file
    pub database_path: PathBuf,

    /// Age in seconds after which rows are archived (default: 2592000 = 30 days)
    pub retention: u64,
}

impl Default for LongTermConfig {
    fn default() -> Self {
        Self::in_dir(".memvault")
    }
}

impl LongTermConfig {
    /// Default long-term layout rooted at `dir`
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            database_path: dir.join("long_term.db"),
            retention: 30 * 86400, // 30 days
        }
    }
}

impl VaultConfig {
    /// Create a config with every file placed under `data_dir`
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            storage: StorageConfig::in_dir(&data_dir),
            long_term: LongTermConfig::in_dir(&data_dir),
            memory: MemoryConfig::default(),
            data_dir,
        }
    }

    /// Set memory configuration
    pub fn with_memory(mut self, memory: MemoryConfig) -> Self {
        self.memory = memory;
        self
    }

    /// Set storage configuration
    pub fn with_storage(mut self, storage: StorageConfig) -> Self {
        self.storage = storage;
        self
    }

    /// Set long-term configuration
    pub fn with_long_term(mut self, long_term: LongTermConfig) -> Self {
        self.long_term = long_term;
        self
    }

    /// Disable background snapshot saves
    pub fn without_auto_save(mut self) -> Self {
        self.memory.auto_save = false;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.memory.short_term_capacity == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "memory.short_term_capacity".into(),
                message: "must be greater than 0".into(),
            });
        }

        if self.memory.mid_term_capacity == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "memory.mid_term_capacity".into(),
                message: "must be greater than 0".into(),
            });
        }

        if self.memory.short_term_ttl == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "memory.short_term_ttl".into(),
                message: "must be greater than 0".into(),
            });
        }

        for (field, value) in [
            ("memory.short_term_compress_ratio", self.memory.short_term_compress_ratio),
            ("memory.short_term_promote_priority", self.memory.short_term_promote_priority),
            ("memory.critical_priority", self.memory.critical_priority),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigValidationError::InvalidValue {
                    field: field.into(),
                    message: "must be between 0 and 1".into(),
                });
            }
        }

        if self.storage.max_backups == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "storage.max_backups".into(),
                message: "must be greater than 0".into(),
            });
        }

        if self.storage.key_file == self.storage.content_key_file {
            return Err(ConfigValidationError::SharedKeyFile);
        }

        Ok(())
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("storage.key_file and storage.content_key_file must differ")]
    SharedKeyFile,

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
