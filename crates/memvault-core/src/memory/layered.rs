//! Layered Memory Orchestrator
//!
//! Routes new items into the short-term tier, sweeps them down into the
//! mid-term and long-term tiers, fans searches out over all three and keeps
//! an encrypted snapshot of the in-memory tiers through [`SecureStorage`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::config::{MemoryConfig, VaultConfig};
use crate::crypto::Cipher;
use crate::error::Result;
use crate::storage::{BackupReason, HealthStatus, SecureStorage};
use super::long_term::LongTermTier;
use super::mid_term::MidTermTier;
use super::short_term::ShortTermTier;
use super::snapshot::Snapshot;
use super::types::{
    by_priority_then_recency, CompressionResult, MemoryItem, MemoryMatch, MemoryTier, Metadata,
    TierKind,
};

/// Combined view of storage health and tier occupancy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageStatus {
    pub health: HealthStatus,
    pub short_term_count: usize,
    pub short_term_capacity: usize,
    pub mid_term_count: usize,
    pub mid_term_capacity: usize,
    pub long_term_count: usize,
    pub long_term_index_tokens: usize,
}

/// Three-tier memory with encrypted persistence.
///
/// Mutating operations take `&mut self`; share an instance behind a mutex.
/// Item content is sealed with the storage's content cipher, both in the
/// long-term store and inside snapshots.
pub struct LayeredMemory {
    short_term: ShortTermTier,
    mid_term: MidTermTier,
    long_term: LongTermTier,
    storage: Arc<SecureStorage>,
    cipher: Arc<Cipher>,
    config: MemoryConfig,
    save_generation: Arc<AtomicU64>,
    pending_save: Option<JoinHandle<()>>,
    /// Tiers changed since the last load or foreground save
    dirty: bool,
}

impl LayeredMemory {
    /// Open every tier under `config.data_dir` and load the last snapshot
    pub async fn open(config: VaultConfig) -> Result<Self> {
        config.validate()?;
        tokio::fs::create_dir_all(&config.data_dir).await?;

        let storage = Arc::new(SecureStorage::open(config.storage.clone()).await?);
        let long_term = LongTermTier::open(
            &config.long_term.database_path,
            storage.content_cipher(),
            config.long_term.retention,
        )?;

        let mut memory = Self::with_parts(config.memory, long_term, storage);
        match memory.force_load().await {
            Ok(loaded) => {
                tracing::info!(loaded, data_dir = %config.data_dir.display(), "Opened layered memory");
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to load snapshot, starting with empty in-memory tiers");
            }
        }
        Ok(memory)
    }

    /// Assemble from existing parts. `long_term` must have been opened with
    /// `storage.content_cipher()`.
    pub fn with_parts(config: MemoryConfig, long_term: LongTermTier, storage: Arc<SecureStorage>) -> Self {
        let cipher = storage.content_cipher();
        Self {
            short_term: ShortTermTier::new(
                config.short_term_capacity,
                config.short_term_ttl,
                config.short_term_promote_priority,
            ),
            mid_term: MidTermTier::new(config.mid_term_capacity, config.critical_priority),
            long_term,
            storage,
            cipher,
            config,
            save_generation: Arc::new(AtomicU64::new(0)),
            pending_save: None,
            dirty: false,
        }
    }

    /// Remember something new.
    ///
    /// Critical items force a sweep, which carries them straight into the
    /// long-term tier.
    pub fn add_memory(
        &mut self,
        content: impl Into<String>,
        priority: f64,
        metadata: Option<Metadata>,
    ) -> Result<MemoryItem> {
        let mut item = MemoryItem::new(content, priority);
        if let Some(metadata) = metadata {
            item = item.with_metadata(metadata);
        }

        self.short_term.add(item.clone())?;
        self.dirty = true;
        tracing::debug!(id = %item.id, priority = item.priority, "Added memory");

        let critical = item.is_at_least(self.config.critical_priority);
        let result = self.auto_compress(critical);

        if critical || result.moved() > self.config.save_after_moved {
            self.schedule_save();
        }
        Ok(item)
    }

    /// Sweep items down the tiers.
    ///
    /// Runs when `force` is set or the short-term buffer is over its
    /// compress ratio. Items that fail to reach long-term land in mid-term.
    pub fn auto_compress(&mut self, force: bool) -> CompressionResult {
        let mut result = CompressionResult::default();

        if force || self.short_term.utilization() > self.config.short_term_compress_ratio {
            let threshold = self.config.critical_priority;
            let (critical, rest): (Vec<_>, Vec<_>) = self
                .short_term
                .drain()
                .into_iter()
                .partition(|item| item.is_at_least(threshold));

            result.short_to_mid = rest.len();
            self.requeue(rest);
            let stored = self.store_long_term(critical, &mut result);
            result.short_to_long = stored;
        }

        let mid_len = self.mid_term.len().unwrap_or(0);
        if force || mid_len > self.config.mid_term_compress_threshold {
            match self.mid_term.compress() {
                Ok(promoted) => {
                    let stored = self.store_long_term(promoted, &mut result);
                    result.mid_to_long = stored;
                }
                Err(e) => tracing::warn!(error = %e, "Mid-term compression failed"),
            }
        }

        if result.moved() > 0 || result.requeued > 0 {
            self.dirty = true;
            tracing::debug!(
                short_to_long = result.short_to_long,
                short_to_mid = result.short_to_mid,
                mid_to_long = result.mid_to_long,
                requeued = result.requeued,
                "Compressed memory tiers"
            );
        }
        result
    }

    /// Search every tier, optionally restricted to an inclusive creation-time
    /// window. Results are ordered by priority, highest first.
    pub fn search(
        &mut self,
        query: &str,
        time_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Vec<MemoryMatch> {
        let mut matches = Vec::new();
        matches.extend(Self::search_tier(&mut self.short_term, query));
        matches.extend(Self::search_tier(&mut self.mid_term, query));
        matches.extend(Self::search_tier(&mut self.long_term, query));

        if let Some((start, end)) = time_range {
            matches.retain(|m| m.item.created_at >= start && m.item.created_at <= end);
        }

        matches.sort_by(|a, b| by_priority_then_recency(&a.item, &b.item));
        matches
    }

    fn search_tier(tier: &mut dyn MemoryTier, query: &str) -> Vec<MemoryMatch> {
        let kind = tier.kind();
        match tier.search(query) {
            Ok(items) => items
                .into_iter()
                .map(|item| MemoryMatch { item, tier: kind })
                .collect(),
            Err(e) => {
                tracing::warn!(tier = %kind, error = %e, "Tier search failed");
                Vec::new()
            }
        }
    }

    /// Persist the in-memory tiers now, superseding any queued background save
    pub async fn force_save(&mut self) -> Result<()> {
        self.save_now(BackupReason::Manual).await
    }

    /// Whether the tiers hold changes that have not been saved in the
    /// foreground yet
    pub fn has_unsaved_changes(&self) -> bool {
        self.dirty
    }

    /// Replace the in-memory tiers with the last saved snapshot.
    ///
    /// Returns how many items were restored.
    pub async fn force_load(&mut self) -> Result<usize> {
        self.settle_pending_save().await;

        let Some(snapshot) = self.storage.load::<Snapshot>().await? else {
            return Ok(0);
        };

        let last_save = snapshot.last_save;
        let (short_term, mid_term, skipped) = snapshot.restore(&self.cipher);
        let loaded = short_term.len() + mid_term.len();

        self.short_term.drain();
        self.mid_term.clear();
        self.short_term.add_many(short_term)?;
        self.mid_term.add_many(mid_term)?;
        self.dirty = false;

        if skipped > 0 {
            tracing::warn!(skipped, "Some snapshot items could not be decrypted");
        }
        tracing::debug!(loaded, %last_save, "Loaded snapshot");
        Ok(loaded)
    }

    /// Storage health plus tier occupancy
    pub async fn get_storage_status(&self) -> Result<StorageStatus> {
        let health = self.storage.get_health_status().await?;
        let long_term = self.long_term.stats()?;

        Ok(StorageStatus {
            health,
            short_term_count: self.short_term.len()?,
            short_term_capacity: self.short_term.capacity(),
            mid_term_count: self.mid_term.len()?,
            mid_term_capacity: self.mid_term.capacity(),
            long_term_count: long_term.rows,
            long_term_index_tokens: long_term.index_tokens,
        })
    }

    /// Remove long-term rows past retention and hand them back, still sealed
    pub fn archive_stale(&mut self) -> Result<Vec<MemoryItem>> {
        self.long_term.compress()
    }

    /// Decrypt an archived item's content in place
    pub fn unseal(&self, item: &mut MemoryItem) -> Result<()> {
        item.unseal(&self.cipher)
    }

    /// Tier currently holding the item with `id`, if any
    pub fn tier_of(&self, id: &str) -> Result<Option<TierKind>> {
        if self.short_term.items().iter().any(|item| item.id == id) {
            return Ok(Some(TierKind::ShortTerm));
        }
        if self.mid_term.items().iter().any(|item| item.id == id) {
            return Ok(Some(TierKind::MidTerm));
        }
        if self.long_term.contains(id)? {
            return Ok(Some(TierKind::LongTerm));
        }
        Ok(None)
    }

    /// Number of items resident in a tier
    pub fn tier_len(&self, kind: TierKind) -> Result<usize> {
        match kind {
            TierKind::ShortTerm => self.short_term.len(),
            TierKind::MidTerm => self.mid_term.len(),
            TierKind::LongTerm => self.long_term.len(),
        }
    }

    /// Underlying snapshot storage
    pub fn storage(&self) -> &Arc<SecureStorage> {
        &self.storage
    }

    /// Flush a final snapshot when anything changed, then tidy up backups
    /// and temp files. A session that only read leaves the snapshot and its
    /// backups as they were.
    pub async fn shutdown(mut self) -> Result<()> {
        if self.dirty {
            self.save_now(BackupReason::Shutdown).await?;
        } else if let Some(handle) = self.pending_save.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Background save task failed");
            }
        }
        self.storage.cleanup().await?;
        tracing::info!("Layered memory shut down");
        Ok(())
    }

    fn snapshot(&self) -> Result<Snapshot> {
        Snapshot::capture(&self.short_term.items(), self.mid_term.items(), &self.cipher)
    }

    async fn save_now(&mut self, reason: BackupReason) -> Result<()> {
        self.settle_pending_save().await;
        let snapshot = self.snapshot()?;
        self.storage.save_with_reason(&snapshot, reason).await?;
        self.dirty = false;
        Ok(())
    }

    /// Invalidate queued background saves and wait for any in flight
    async fn settle_pending_save(&mut self) {
        self.save_generation.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = self.pending_save.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Background save task failed");
            }
        }
    }

    /// Queue a background save on the ambient runtime.
    ///
    /// Each save waits for the one before it, and a save that has been
    /// superseded by a newer one by the time it runs does nothing.
    fn schedule_save(&mut self) {
        if !self.config.auto_save {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("No async runtime available, skipping background save");
            return;
        };

        let snapshot = match self.snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(error = %e, "Could not capture snapshot for background save");
                return;
            }
        };

        let generation = self.save_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let latest = Arc::clone(&self.save_generation);
        let storage = Arc::clone(&self.storage);
        let previous = self.pending_save.take();

        self.pending_save = Some(runtime.spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            if latest.load(Ordering::SeqCst) != generation {
                tracing::debug!(generation, "Skipping superseded background save");
                return;
            }
            if let Err(e) = storage.save(&snapshot).await {
                tracing::error!(error = %e, "Background save failed");
            }
        }));
    }

    fn requeue(&mut self, items: Vec<MemoryItem>) {
        if let Err(e) = self.mid_term.add_many(items) {
            tracing::warn!(error = %e, "Failed to move items into mid-term memory");
        }
    }

    /// Write items to long-term, returning how many landed. On failure the
    /// items go back to mid-term.
    fn store_long_term(&mut self, items: Vec<MemoryItem>, result: &mut CompressionResult) -> usize {
        if items.is_empty() {
            return 0;
        }

        let count = items.len();
        match self.long_term.add_many(items.clone()) {
            Ok(()) => count,
            Err(e) => {
                tracing::error!(count, error = %e, "Long-term write failed, requeueing into mid-term");
                result.requeued += count;
                self.requeue(items);
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use tempfile::tempdir;

    async fn memory_in(dir: &std::path::Path, config: MemoryConfig) -> LayeredMemory {
        let storage = Arc::new(SecureStorage::open(StorageConfig::in_dir(dir)).await.unwrap());
        let long_term = LongTermTier::in_memory(storage.content_cipher(), 30 * 86400).unwrap();
        LayeredMemory::with_parts(config, long_term, storage)
    }

    fn quiet() -> MemoryConfig {
        MemoryConfig {
            auto_save: false,
            ..MemoryConfig::default()
        }
    }

    #[tokio::test]
    async fn test_critical_item_goes_to_long_term() {
        let dir = tempdir().unwrap();
        let mut memory = memory_in(dir.path(), quiet()).await;

        memory.add_memory("User prefers dark coffee", 0.6, None).unwrap();
        memory.add_memory("User is allergic to peanuts", 0.9, None).unwrap();

        assert_eq!(memory.tier_len(TierKind::LongTerm).unwrap(), 1);
        assert_eq!(memory.tier_len(TierKind::ShortTerm).unwrap(), 0);
        assert_eq!(memory.tier_len(TierKind::MidTerm).unwrap(), 1);

        let hits = memory.search("peanuts", None);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].tier, TierKind::LongTerm);
        assert_eq!(hits[0].item.content, "User is allergic to peanuts");

        let hits = memory.search("coffee", None);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].tier, TierKind::MidTerm);
    }

    #[tokio::test]
    async fn test_unforced_sweep_waits_for_utilization() {
        let dir = tempdir().unwrap();
        let config = MemoryConfig {
            short_term_capacity: 10,
            ..quiet()
        };
        let mut memory = memory_in(dir.path(), config).await;

        for i in 0..7 {
            memory.add_memory(format!("note {}", i), 0.5, None).unwrap();
        }
        assert_eq!(memory.tier_len(TierKind::ShortTerm).unwrap(), 7);

        // the eighth insert pushes utilization past 70%
        memory.add_memory("note 7", 0.5, None).unwrap();
        assert_eq!(memory.tier_len(TierKind::ShortTerm).unwrap(), 0);
        assert_eq!(memory.tier_len(TierKind::MidTerm).unwrap(), 8);
    }

    #[tokio::test]
    async fn test_latest_item_is_found_after_every_insert() {
        let dir = tempdir().unwrap();
        let config = MemoryConfig {
            short_term_capacity: 10,
            ..quiet()
        };
        let mut memory = memory_in(dir.path(), config).await;

        for i in 0..45 {
            // every fifth item is critical; the rest stay below 0.8
            let priority = if i % 5 == 4 { 0.9 } else { (i % 8) as f64 / 10.0 };
            let item = memory.add_memory(format!("entry {:03} marker", i), priority, None).unwrap();

            let hits = memory.search(&format!("entry {:03}", i), None);
            assert_eq!(hits.len(), 1, "entry {} not found", i);
            assert_eq!(hits[0].item.id, item.id);
            assert!(memory.tier_len(TierKind::ShortTerm).unwrap() <= 10);
        }

        let resident: usize = [TierKind::ShortTerm, TierKind::MidTerm, TierKind::LongTerm]
            .into_iter()
            .map(|kind| memory.tier_len(kind).unwrap())
            .sum();
        assert_eq!(resident, 45);
    }

    #[tokio::test]
    async fn test_tier_of_follows_the_sweep() {
        let dir = tempdir().unwrap();
        let config = MemoryConfig {
            short_term_capacity: 10,
            ..quiet()
        };
        let mut memory = memory_in(dir.path(), config).await;

        let first = memory.add_memory("first note", 0.5, None).unwrap();
        assert_eq!(memory.tier_of(&first.id).unwrap(), Some(TierKind::ShortTerm));

        for i in 0..7 {
            memory.add_memory(format!("filler {}", i), 0.5, None).unwrap();
        }
        assert_eq!(memory.tier_of(&first.id).unwrap(), Some(TierKind::MidTerm));

        let critical = memory.add_memory("gate code is 4411", 0.9, None).unwrap();
        assert_eq!(memory.tier_of(&critical.id).unwrap(), Some(TierKind::LongTerm));
        assert_eq!(memory.tier_of("unknown").unwrap(), None);
    }

    #[tokio::test]
    async fn test_clean_shutdown_leaves_snapshot_alone() {
        let dir = tempdir().unwrap();
        let mut memory = memory_in(dir.path(), quiet()).await;
        memory.add_memory("saved once", 0.5, None).unwrap();
        assert!(memory.has_unsaved_changes());
        memory.force_save().await.unwrap();
        assert!(!memory.has_unsaved_changes());

        let data_file = memory.storage().config().data_file.clone();
        let blob = std::fs::read(&data_file).unwrap();
        let backups = memory.storage().list_backups().await.unwrap();

        memory.search("saved", None);
        memory.get_storage_status().await.unwrap();
        memory.shutdown().await.unwrap();

        assert_eq!(std::fs::read(&data_file).unwrap(), blob);
        let storage = SecureStorage::open(StorageConfig::in_dir(dir.path())).await.unwrap();
        assert_eq!(storage.list_backups().await.unwrap(), backups);
    }

    #[tokio::test]
    async fn test_dirty_shutdown_saves() {
        let dir = tempdir().unwrap();
        let mut memory = memory_in(dir.path(), quiet()).await;
        memory.add_memory("written at shutdown", 0.5, None).unwrap();
        let storage = Arc::clone(memory.storage());
        memory.shutdown().await.unwrap();

        let snapshot: Snapshot = storage.load().await.unwrap().unwrap();
        assert_eq!(snapshot.counts.short_term, 1);
    }

    #[tokio::test]
    async fn test_search_time_range_is_inclusive() {
        let dir = tempdir().unwrap();
        let mut memory = memory_in(dir.path(), quiet()).await;

        let item = memory.add_memory("standup moved to 10am", 0.5, None).unwrap();
        let at = item.created_at;

        assert_eq!(memory.search("standup", Some((at, at))).len(), 1);
        let later = at + chrono::Duration::seconds(1);
        assert!(memory.search("standup", Some((later, later + chrono::Duration::hours(1)))).is_empty());
    }

    #[tokio::test]
    async fn test_search_orders_across_tiers() {
        let dir = tempdir().unwrap();
        let mut memory = memory_in(dir.path(), quiet()).await;

        memory.add_memory("coffee beans running low", 0.3, None).unwrap();
        memory.add_memory("coffee causes migraines", 0.95, None).unwrap();
        memory.add_memory("coffee order: flat white", 0.5, None).unwrap();

        let priorities: Vec<f64> = memory
            .search("coffee", None)
            .iter()
            .map(|m| m.item.priority)
            .collect();
        assert_eq!(priorities, vec![0.95, 0.5, 0.3]);
    }

    #[tokio::test]
    async fn test_metadata_is_kept() {
        let dir = tempdir().unwrap();
        let mut memory = memory_in(dir.path(), quiet()).await;

        let mut metadata = Metadata::new();
        metadata.insert("source".into(), serde_json::json!("chat"));
        memory.add_memory("birthday is in May", 0.9, Some(metadata)).unwrap();

        let hits = memory.search("birthday", None);
        assert_eq!(hits[0].item.metadata["source"], "chat");
    }

    #[tokio::test]
    async fn test_force_save_and_load() {
        let dir = tempdir().unwrap();
        let mut memory = memory_in(dir.path(), quiet()).await;
        memory.add_memory("short lived thought", 0.2, None).unwrap();
        memory.force_save().await.unwrap();

        memory.add_memory("unsaved thought", 0.2, None).unwrap();
        assert_eq!(memory.force_load().await.unwrap(), 1);
        assert!(memory.search("unsaved", None).is_empty());
        assert_eq!(memory.search("short lived", None).len(), 1);
    }

    #[tokio::test]
    async fn test_critical_insert_schedules_save() {
        let dir = tempdir().unwrap();
        let mut memory = memory_in(dir.path(), MemoryConfig::default()).await;

        memory.add_memory("low priority", 0.1, None).unwrap();
        assert!(memory.pending_save.is_none());

        memory.add_memory("passport expires in June", 0.9, None).unwrap();
        memory.pending_save.take().unwrap().await.unwrap();

        let snapshot: Snapshot = memory.storage().load().await.unwrap().unwrap();
        assert_eq!(snapshot.counts.mid_term, 1);
        assert_eq!(snapshot.counts.short_term, 0);
    }

    #[tokio::test]
    async fn test_superseded_save_is_skipped() {
        let dir = tempdir().unwrap();
        let mut memory = memory_in(dir.path(), MemoryConfig::default()).await;

        memory.add_memory("first critical", 0.9, None).unwrap();
        memory.add_memory("second critical", 0.9, None).unwrap();
        memory.pending_save.take().unwrap().await.unwrap();

        // only the newest queued snapshot reaches disk, so at most one
        // auto-save backup of an earlier blob can exist
        let backups = memory.storage().list_backups().await.unwrap();
        assert!(backups.len() <= 1);
        assert!(dir.path().join("snapshot.enc").exists());
    }

    #[test]
    fn test_schedule_without_runtime_is_skipped() {
        let dir = tempdir().unwrap();
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let mut memory = runtime.block_on(memory_in(dir.path(), MemoryConfig::default()));

        memory.add_memory("no runtime here", 0.9, None).unwrap();
        assert!(memory.pending_save.is_none());
        assert!(!dir.path().join("snapshot.enc").exists());
    }

    #[tokio::test]
    async fn test_archive_stale_and_unseal() {
        let dir = tempdir().unwrap();
        let storage = Arc::new(SecureStorage::open(StorageConfig::in_dir(dir.path())).await.unwrap());
        let mut long_term = LongTermTier::in_memory(storage.content_cipher(), 86400).unwrap();
        long_term
            .add(MemoryItem::new("old lease terms", 0.9).with_created_at(Utc::now() - chrono::Duration::days(3)))
            .unwrap();
        let mut memory = LayeredMemory::with_parts(quiet(), long_term, storage);

        let mut archived = memory.archive_stale().unwrap();
        assert_eq!(archived.len(), 1);
        assert!(archived[0].encrypted);

        memory.unseal(&mut archived[0]).unwrap();
        assert_eq!(archived[0].content, "old lease terms");
        assert_eq!(memory.tier_len(TierKind::LongTerm).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_storage_status() {
        let dir = tempdir().unwrap();
        let mut memory = memory_in(dir.path(), quiet()).await;
        memory.add_memory("alpha", 0.5, None).unwrap();
        memory.add_memory("bravo", 0.9, None).unwrap();

        let status = memory.get_storage_status().await.unwrap();
        assert!(status.health.healthy);
        assert_eq!(status.short_term_capacity, 1000);
        assert_eq!(status.mid_term_count, 1);
        assert_eq!(status.long_term_count, 1);
    }
}
