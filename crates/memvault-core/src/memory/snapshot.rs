//! Snapshot payload persisted through secure storage.
//!
//! Only the in-memory tiers are captured; the long-term tier persists itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::Cipher;
use crate::error::Result;
use super::types::MemoryItem;

/// Item counts recorded alongside a snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotCounts {
    pub short_term: usize,
    pub mid_term: usize,
}

/// Serialized state of the short-term and mid-term tiers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub short_term: Vec<MemoryItem>,
    pub mid_term: Vec<MemoryItem>,
    pub last_save: DateTime<Utc>,
    #[serde(default)]
    pub counts: SnapshotCounts,
}

impl Snapshot {
    /// Capture both tiers with every item's content sealed under `cipher`
    pub fn capture(short_term: &[MemoryItem], mid_term: &[MemoryItem], cipher: &Cipher) -> Result<Self> {
        let seal_all = |items: &[MemoryItem]| -> Result<Vec<MemoryItem>> {
            items.iter().map(|item| item.sealed(cipher)).collect()
        };

        Ok(Self {
            short_term: seal_all(short_term)?,
            mid_term: seal_all(mid_term)?,
            last_save: Utc::now(),
            counts: SnapshotCounts {
                short_term: short_term.len(),
                mid_term: mid_term.len(),
            },
        })
    }

    /// Open every item, dropping those that fail to decrypt.
    ///
    /// Returns the short-term items, the mid-term items and how many were
    /// skipped.
    pub fn restore(self, cipher: &Cipher) -> (Vec<MemoryItem>, Vec<MemoryItem>, usize) {
        let mut skipped = 0;
        let mut open_all = |items: Vec<MemoryItem>| -> Vec<MemoryItem> {
            items
                .into_iter()
                .filter_map(|mut item| match item.unseal(cipher) {
                    Ok(()) => Some(item),
                    Err(e) => {
                        tracing::warn!(id = %item.id, error = %e, "Skipping unreadable snapshot item");
                        skipped += 1;
                        None
                    }
                })
                .collect()
        };

        let short_term = open_all(self.short_term);
        let mid_term = open_all(self.mid_term);
        (short_term, mid_term, skipped)
    }
}
