//! Backup naming and discovery.
//!
//! Backups are plain copies of the encrypted snapshot named
//! `<timestamp>_<reason>.bak`. The timestamp is fixed-width UTC with
//! microseconds; backups are ordered by that timestamp, then by name.

use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.6fZ";
const EXTENSION: &str = ".bak";

/// Why a backup was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupReason {
    AutoSave,
    KeyRotation,
    Shutdown,
    PreRestore,
    Manual,
}

impl BackupReason {
    /// Convert from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "auto_save" => Some(Self::AutoSave),
            "key_rotation" => Some(Self::KeyRotation),
            "shutdown" => Some(Self::Shutdown),
            "pre_restore" => Some(Self::PreRestore),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }

    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoSave => "auto_save",
            Self::KeyRotation => "key_rotation",
            Self::Shutdown => "shutdown",
            Self::PreRestore => "pre_restore",
            Self::Manual => "manual",
        }
    }
}

impl std::fmt::Display for BackupReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A backup file on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupInfo {
    pub name: String,
    pub reason: BackupReason,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
}

/// File name for a backup taken at `at`
pub fn backup_name(at: DateTime<Utc>, reason: BackupReason) -> String {
    format!("{}_{}{}", at.format(TIMESTAMP_FORMAT), reason.as_str(), EXTENSION)
}

/// Split a backup file name into its timestamp and reason.
///
/// Returns `None` for anything this module did not write.
pub fn parse_backup_name(name: &str) -> Option<(DateTime<Utc>, BackupReason)> {
    let stem = name.strip_suffix(EXTENSION)?;
    let (timestamp, reason) = stem.split_once('_')?;
    let reason = BackupReason::from_str(reason)?;
    let at = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).ok()?;
    Some((at.and_utc(), reason))
}

/// Reject names that could escape the backup directory
pub fn validate_backup_name(name: &str) -> Result<()> {
    let escapes = name.contains('/')
        || name.contains('\\')
        || name.contains("..")
        || Path::new(name).is_absolute();

    if name.is_empty() || escapes || parse_backup_name(name).is_none() {
        return Err(Error::InvalidBackupName(name.to_string()));
    }
    Ok(())
}

/// Every backup in `dir`, oldest first
pub async fn scan(dir: &Path) -> Result<Vec<BackupInfo>> {
    if !tokio::fs::try_exists(dir).await? {
        return Ok(Vec::new());
    }

    let mut backups = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        let Some((created_at, reason)) = parse_backup_name(&name) else {
            continue;
        };
        let size_bytes = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
        backups.push(BackupInfo {
            name,
            reason,
            created_at,
            size_bytes,
        });
    }

    backups.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
    Ok(backups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_reason_conversion() {
        for reason in [
            BackupReason::AutoSave,
            BackupReason::KeyRotation,
            BackupReason::Shutdown,
            BackupReason::PreRestore,
            BackupReason::Manual,
        ] {
            assert_eq!(BackupReason::from_str(reason.as_str()), Some(reason));
        }
        assert_eq!(BackupReason::from_str("nightly"), None);
    }

    #[test]
    fn test_name_format() {
        let at = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        let name = backup_name(at, BackupReason::KeyRotation);
        assert_eq!(name, "20260304T050607.000000Z_key_rotation.bak");

        let (parsed_at, reason) = parse_backup_name(&name).unwrap();
        assert_eq!(parsed_at, at);
        assert_eq!(reason, BackupReason::KeyRotation);
    }

    #[test]
    fn test_names_sort_chronologically() {
        let early = Utc.with_ymd_and_hms(2026, 1, 9, 23, 59, 59).unwrap();
        let late = Utc.with_ymd_and_hms(2026, 1, 10, 0, 0, 0).unwrap();
        assert!(backup_name(early, BackupReason::Shutdown) < backup_name(late, BackupReason::AutoSave));
    }

    #[test]
    fn test_validate_backup_name() {
        assert!(validate_backup_name("20260304T050607.000000Z_manual.bak").is_ok());
        assert!(validate_backup_name("../snapshot.enc").is_err());
        assert!(validate_backup_name("sub/20260304T050607.000000Z_manual.bak").is_err());
        assert!(validate_backup_name("random.bak").is_err());
        assert!(validate_backup_name("").is_err());
    }

    #[tokio::test]
    async fn test_scan_ignores_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let at = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        tokio::fs::write(dir.path().join(backup_name(at, BackupReason::Manual)), b"abc")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("notes.txt"), b"ignored").await.unwrap();

        let backups = scan(dir.path()).await.unwrap();
        assert_eq!(backups.len(), 1);
        assert_eq!(backups[0].reason, BackupReason::Manual);
        assert_eq!(backups[0].size_bytes, 3);

        assert!(scan(&dir.path().join("missing")).await.unwrap().is_empty());
    }
}
