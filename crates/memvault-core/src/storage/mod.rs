//! Secure Snapshot Storage
//!
//! Persists one serializable value as an encrypted blob, with:
//! - Periodic key rotation (the blob is re-encrypted under the new key)
//! - Timestamped backups with count-based retention
//! - Restore from backup, verified against the active key first
//! - Health reporting with a cumulative error count
//!
//! Every file operation runs under an internal async mutex, so a background
//! save never interleaves with a foreground call. Only one `SecureStorage`
//! may manage a given set of paths at a time.
//!
//! The storage also loads the content key that seals individual items in
//! the snapshot and the long-term store. That key is handed out through
//! [`SecureStorage::content_cipher`] and is never rotated.

mod backup;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::config::{ConfigValidationError, StorageConfig};
use crate::crypto::{self, Cipher};
use crate::error::{Error, Result};

pub use backup::{BackupInfo, BackupReason};

const SELF_TEST_PAYLOAD: &[u8] = b"memvault-health-check";

/// Snapshot of the storage layer's health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Encrypt/decrypt self-test passed
    pub healthy: bool,
    pub key_created_at: DateTime<Utc>,
    pub key_age_secs: u64,
    pub rotation_due: bool,
    pub backup_count: usize,
    /// Failures observed since this instance was opened
    pub error_count: u64,
    pub data_file_exists: bool,
    pub data_size_bytes: u64,
}

struct KeyState {
    cipher: Cipher,
    created_at: DateTime<Utc>,
}

/// Encrypted single-blob store with key rotation and backups.
pub struct SecureStorage {
    config: StorageConfig,
    state: Mutex<KeyState>,
    content_cipher: Arc<Cipher>,
    error_count: AtomicU64,
}

impl std::fmt::Debug for SecureStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureStorage")
            .field("config", &self.config)
            .field("error_count", &self.error_count)
            .finish_non_exhaustive()
    }
}

impl SecureStorage {
    /// Open storage, loading both key files or generating them if absent
    pub async fn open(config: StorageConfig) -> Result<Self> {
        if config.key_file == config.content_key_file {
            return Err(ConfigValidationError::SharedKeyFile.into());
        }
        if let Some(parent) = config.data_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::create_dir_all(&config.backup_dir).await?;

        let loaded = crypto::load_or_create_key(&config.key_file)?;
        let content = crypto::load_or_create_key(&config.content_key_file)?;
        tracing::debug!(
            key_file = %config.key_file.display(),
            fingerprint = %loaded.cipher.fingerprint(),
            content_fingerprint = %content.cipher.fingerprint(),
            generated = loaded.generated,
            "Opened secure storage"
        );

        Ok(Self {
            config,
            state: Mutex::new(KeyState {
                cipher: loaded.cipher,
                created_at: loaded.created_at,
            }),
            content_cipher: Arc::new(content.cipher),
            error_count: AtomicU64::new(0),
        })
    }

    /// Cipher for item content. Shared with the long-term tier and used to
    /// seal items inside snapshots.
    pub fn content_cipher(&self) -> Arc<Cipher> {
        Arc::clone(&self.content_cipher)
    }

    /// Storage configuration
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Failures observed since open
    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Fingerprint of the active key
    pub async fn key_fingerprint(&self) -> String {
        self.state.lock().await.cipher.fingerprint()
    }

    /// Save `data`, backing up the previous blob as an auto-save backup
    pub async fn save<T: Serialize>(&self, data: &T) -> Result<()> {
        self.save_with_reason(data, BackupReason::AutoSave).await
    }

    /// Save `data`, labelling the backup of the previous blob with `reason`.
    ///
    /// Rotates the key first when it is due. A failed rotation or backup is
    /// logged and counted; the save itself still goes ahead.
    pub async fn save_with_reason<T: Serialize>(&self, data: &T, reason: BackupReason) -> Result<()> {
        let payload = self.track(serde_json::to_vec(data).map_err(Error::from))?;
        let mut state = self.state.lock().await;

        if self.rotation_due(&state) {
            if let Err(e) = self.rotate_locked(&mut state).await {
                self.record_error();
                tracing::warn!(error = %e, "Key rotation failed, saving under the current key");
            }
        }

        let sealed = self.track(state.cipher.encrypt(&payload))?;

        if self.config.backup_on_save {
            if let Err(e) = self.backup_locked(reason).await {
                self.record_error();
                tracing::warn!(error = %e, reason = %reason, "Backup before save failed");
            }
        }

        if let Err(e) = write_atomic(&self.config.data_file, &sealed).await {
            self.record_error();
            tracing::error!(path = %self.config.data_file.display(), error = %e, "Failed to write snapshot");
            return Err(e);
        }

        tracing::info!(bytes = sealed.len(), reason = %reason, "Saved encrypted snapshot");
        Ok(())
    }

    /// Load and decrypt the stored value; `None` when nothing was saved yet
    pub async fn load<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        let state = self.state.lock().await;

        if !tokio::fs::try_exists(&self.config.data_file).await? {
            return Ok(None);
        }

        let sealed = self.track(tokio::fs::read(&self.config.data_file).await.map_err(Error::from))?;
        let payload = self.track(state.cipher.decrypt(&sealed))?;
        let value = self.track(serde_json::from_slice(&payload).map_err(Error::from))?;
        Ok(Some(value))
    }

    /// Replace the key now, re-encrypting the stored blob under the new one.
    pub async fn rotate_key(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.track(self.rotate_locked(&mut state).await)
    }

    /// Copy the current blob into the backup directory.
    ///
    /// Returns `None` when there is no blob to back up.
    pub async fn create_backup(&self, reason: BackupReason) -> Result<Option<BackupInfo>> {
        let _state = self.state.lock().await;
        self.track(self.backup_locked(reason).await)
    }

    /// Backups, newest first
    pub async fn list_backups(&self) -> Result<Vec<BackupInfo>> {
        let mut backups = backup::scan(&self.config.backup_dir).await?;
        backups.reverse();
        Ok(backups)
    }

    /// Overwrite the data file with a backup.
    ///
    /// The backup must decrypt under the active key; otherwise nothing is
    /// touched. The current blob is backed up as `pre_restore` first.
    pub async fn restore_from_backup(&self, name: &str) -> Result<()> {
        let state = self.state.lock().await;
        backup::validate_backup_name(name)?;

        let path = self.config.backup_dir.join(name);
        if !tokio::fs::try_exists(&path).await? {
            return Err(Error::BackupNotFound(name.to_string()));
        }

        let bytes = self.track(tokio::fs::read(&path).await.map_err(Error::from))?;
        if let Err(e) = state.cipher.decrypt(&bytes) {
            self.record_error();
            tracing::warn!(backup = name, "Backup does not decrypt under the active key");
            return Err(e);
        }

        self.track(self.backup_locked(BackupReason::PreRestore).await)?;
        self.track(write_atomic(&self.config.data_file, &bytes).await)?;

        tracing::info!(backup = name, "Restored snapshot from backup");
        Ok(())
    }

    /// Self-test the active key and report on the files
    pub async fn get_health_status(&self) -> Result<HealthStatus> {
        let state = self.state.lock().await;

        let healthy = state
            .cipher
            .encrypt(SELF_TEST_PAYLOAD)
            .and_then(|sealed| state.cipher.decrypt(&sealed))
            .map(|plain| plain == SELF_TEST_PAYLOAD)
            .unwrap_or(false);
        if !healthy {
            self.record_error();
            tracing::error!("Encryption self-test failed");
        }

        let backups = backup::scan(&self.config.backup_dir).await?;
        let data_size = match tokio::fs::metadata(&self.config.data_file).await {
            Ok(meta) => Some(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        Ok(HealthStatus {
            healthy,
            key_created_at: state.created_at,
            key_age_secs: key_age(&state).num_seconds().max(0) as u64,
            rotation_due: self.rotation_due(&state),
            backup_count: backups.len(),
            error_count: self.error_count(),
            data_file_exists: data_size.is_some(),
            data_size_bytes: data_size.unwrap_or(0),
        })
    }

    /// Enforce backup retention and remove leftover temp files.
    ///
    /// Returns the number of files removed.
    pub async fn cleanup(&self) -> Result<usize> {
        let _state = self.state.lock().await;

        let mut removed = self.track(self.enforce_retention().await)?;
        for path in [tmp_path(&self.config.data_file), tmp_path(&self.config.key_file)] {
            if tokio::fs::try_exists(&path).await? {
                tokio::fs::remove_file(&path).await?;
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::debug!(removed, "Storage cleanup removed files");
        }
        Ok(removed)
    }

    fn rotation_due(&self, state: &KeyState) -> bool {
        let interval = Duration::seconds(self.config.key_rotation_interval.min(u32::MAX as u64) as i64);
        key_age(state) >= interval
    }

    /// Rotation with the state lock held. The new blob lands before the new
    /// key; if the key cannot be swapped in, the old blob is put back.
    async fn rotate_locked(&self, state: &mut KeyState) -> Result<()> {
        self.backup_locked(BackupReason::KeyRotation)
            .await
            .map_err(|e| Error::key_rotation(format!("backup failed: {}", e)))?;

        let next = Cipher::generate();
        let data_file = &self.config.data_file;
        let key_file = &self.config.key_file;

        let old_blob = if tokio::fs::try_exists(data_file).await? {
            Some(tokio::fs::read(data_file).await?)
        } else {
            None
        };

        let new_blob = match &old_blob {
            Some(sealed) => {
                let payload = state
                    .cipher
                    .decrypt(sealed)
                    .map_err(|e| Error::key_rotation(format!("current blob unreadable: {}", e)))?;
                Some(next.encrypt(&payload)?)
            }
            None => None,
        };

        let key_tmp = tmp_path(key_file);
        write_synced(&key_tmp, next.key_bytes()).await?;
        crypto::restrict_permissions(&key_tmp)?;

        if let Some(blob) = &new_blob {
            if let Err(e) = write_atomic(data_file, blob).await {
                let _ = tokio::fs::remove_file(&key_tmp).await;
                return Err(Error::key_rotation(format!("writing re-encrypted blob: {}", e)));
            }
        }

        if let Err(e) = tokio::fs::rename(&key_tmp, key_file).await {
            let _ = tokio::fs::remove_file(&key_tmp).await;
            if let Some(blob) = &old_blob {
                if let Err(restore_err) = write_atomic(data_file, blob).await {
                    tracing::error!(error = %restore_err, "Failed to restore blob after aborted rotation");
                }
            }
            return Err(Error::key_rotation(format!("swapping key file: {}", e)));
        }

        let previous = state.cipher.fingerprint();
        state.cipher = next;
        state.created_at = Utc::now();

        tracing::info!(
            previous = %previous,
            current = %state.cipher.fingerprint(),
            "Rotated storage key"
        );
        Ok(())
    }

    async fn backup_locked(&self, reason: BackupReason) -> Result<Option<BackupInfo>> {
        let source = &self.config.data_file;
        if !tokio::fs::try_exists(source).await? {
            return Ok(None);
        }

        tokio::fs::create_dir_all(&self.config.backup_dir).await?;

        // Names carry microseconds. Each backup must sort after every
        // existing one, whatever its reason.
        let mut at = Utc::now().trunc_subsecs(6);
        if let Some(latest) = backup::scan(&self.config.backup_dir).await?.last() {
            if at <= latest.created_at {
                at = latest.created_at + Duration::microseconds(1);
            }
        }
        let name = backup::backup_name(at, reason);

        let size_bytes = tokio::fs::copy(source, self.config.backup_dir.join(&name)).await?;
        tracing::debug!(backup = %name, size_bytes, "Created backup");

        self.enforce_retention().await?;

        Ok(Some(BackupInfo {
            name,
            reason,
            created_at: at,
            size_bytes,
        }))
    }

    /// Delete the oldest backups beyond `max_backups`
    async fn enforce_retention(&self) -> Result<usize> {
        let backups = backup::scan(&self.config.backup_dir).await?;
        if backups.len() <= self.config.max_backups {
            return Ok(0);
        }

        let excess = backups.len() - self.config.max_backups;
        for stale in backups.iter().take(excess) {
            tokio::fs::remove_file(self.config.backup_dir.join(&stale.name)).await?;
            tracing::debug!(backup = %stale.name, "Removed backup beyond retention");
        }
        Ok(excess)
    }

    fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    fn track<T>(&self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.record_error();
        }
        result
    }
}

fn key_age(state: &KeyState) -> Duration {
    Utc::now() - state.created_at
}

/// `<path>.tmp` beside the target
fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

async fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    Ok(())
}

/// Write through a temp file and rename over the target
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = tmp_path(path);
    write_synced(&tmp, bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}
