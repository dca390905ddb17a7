//! Mid-term tier: a capacity-bounded pool with lowest-priority eviction.

use crate::error::Result;
use super::types::{by_priority_then_recency, MemoryItem, MemoryTier, TierKind};

/// Priority-evicted pool of items that outlived the short-term buffer.
#[derive(Debug)]
pub struct MidTermTier {
    items: Vec<MemoryItem>,
    capacity: usize,
    promote_priority: f64,
}

impl MidTermTier {
    /// Create a pool holding at most `capacity` items
    pub fn new(capacity: usize, promote_priority: f64) -> Self {
        Self {
            items: Vec::new(),
            capacity: capacity.max(1),
            promote_priority,
        }
    }

    /// Maximum number of resident items
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Resident items in insertion order
    pub fn items(&self) -> &[MemoryItem] {
        &self.items
    }

    /// Drop every resident item
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Evict the lowest-priority resident; among equals, the least recently
    /// accessed goes first.
    fn evict_lowest(&mut self) -> Option<MemoryItem> {
        let victim = self
            .items
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                a.priority
                    .partial_cmp(&b.priority)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.last_accessed_at.cmp(&b.last_accessed_at))
            })
            .map(|(index, _)| index)?;

        Some(self.items.remove(victim))
    }
}

impl MemoryTier for MidTermTier {
    fn kind(&self) -> TierKind {
        TierKind::MidTerm
    }

    fn add(&mut self, item: MemoryItem) -> Result<()> {
        if self.items.len() >= self.capacity {
            if let Some(evicted) = self.evict_lowest() {
                tracing::debug!(id = %evicted.id, priority = evicted.priority, "Evicted lowest-priority mid-term item");
            }
        }
        self.items.push(item);
        Ok(())
    }

    fn search(&mut self, query: &str) -> Result<Vec<MemoryItem>> {
        let needle = query.to_lowercase();
        let mut hits = Vec::new();

        for item in self.items.iter_mut() {
            if item.matches(&needle) {
                item.touch();
                hits.push(item.clone());
            }
        }

        hits.sort_by(by_priority_then_recency);
        Ok(hits)
    }

    /// Remove and return every critical item for promotion to long-term.
    fn compress(&mut self) -> Result<Vec<MemoryItem>> {
        let threshold = self.promote_priority;
        let (promoted, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.items)
            .into_iter()
            .partition(|item| item.is_at_least(threshold));
        self.items = kept;
        Ok(promoted)
    }

    fn len(&self) -> Result<usize> {
        Ok(self.items.len())
    }
}
