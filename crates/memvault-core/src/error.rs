//! Error types for memvault-core.

use thiserror::Error;

/// Result type alias using the memvault Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for memvault operations
#[derive(Error, Debug)]
pub enum Error {
    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,

    // Crypto errors
    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Key rotation failed: {0}")]
    KeyRotation(String),

    // Backup errors
    #[error("Backup not found: {0}")]
    BackupNotFound(String),

    #[error("Invalid backup name: {0}")]
    InvalidBackupName(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigValidationError),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create an encryption error
    pub fn encryption(message: impl Into<String>) -> Self {
        Self::Encryption(message.into())
    }

    /// Create a decryption error
    pub fn decryption(message: impl Into<String>) -> Self {
        Self::Decryption(message.into())
    }

    /// Create a key rotation error
    pub fn key_rotation(message: impl Into<String>) -> Self {
        Self::KeyRotation(message.into())
    }

    /// Check if this error came from ciphertext that could not be opened
    pub fn is_decryption(&self) -> bool {
        matches!(self, Self::Decryption(_))
    }

    /// Check if this error is a missing backup
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::BackupNotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::decryption("bad tag");
        assert!(err.is_decryption());
        assert!(err.to_string().contains("bad tag"));

        let err = Error::BackupNotFound("20260101T000000000000Z_manual.bak".into());
        assert!(err.is_not_found());
        assert!(err.to_string().contains("manual"));

        let err = Error::key_rotation("disk full");
        assert!(!err.is_decryption());
        assert!(err.to_string().starts_with("Key rotation failed"));
    }
}
