//! Short-term tier: a fixed-capacity ring buffer with TTL pruning.

use chrono::{Duration, Utc};

use crate::error::Result;
use super::types::{by_priority_then_recency, MemoryItem, MemoryTier, TierKind};

/// Fixed-size circular buffer of recent items.
///
/// Writes land at `head`, which only ever advances (mod capacity), so when
/// the buffer is full the slot being overwritten is always the oldest
/// insertion.
#[derive(Debug)]
pub struct ShortTermTier {
    slots: Vec<Option<MemoryItem>>,
    head: usize,
    ttl: Duration,
    promote_priority: f64,
}

impl ShortTermTier {
    /// Create a tier with `capacity` slots and a TTL in seconds
    pub fn new(capacity: usize, ttl_seconds: u64, promote_priority: f64) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: vec![None; capacity],
            head: 0,
            ttl: Duration::seconds(ttl_seconds.min(u32::MAX as u64) as i64),
            promote_priority,
        }
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Fraction of slots in use
    pub fn utilization(&self) -> f64 {
        self.live().count() as f64 / self.capacity() as f64
    }

    /// Drop every item older than the TTL, returning how many were pruned
    pub fn prune_expired(&mut self) -> usize {
        let cutoff = Utc::now() - self.ttl;
        let mut pruned = 0;
        for slot in self.slots.iter_mut() {
            if slot.as_ref().is_some_and(|item| item.created_at < cutoff) {
                *slot = None;
                pruned += 1;
            }
        }
        if pruned > 0 {
            tracing::debug!(pruned, "Pruned expired short-term items");
        }
        pruned
    }

    /// Take every resident item in insertion order, leaving the buffer empty
    pub fn drain(&mut self) -> Vec<MemoryItem> {
        let capacity = self.capacity();
        let items = (0..capacity)
            .filter_map(|offset| self.slots[(self.head + offset) % capacity].take())
            .collect();
        self.head = 0;
        items
    }

    /// Resident items in insertion order (oldest first)
    pub fn items(&self) -> Vec<MemoryItem> {
        let capacity = self.capacity();
        (0..capacity)
            .filter_map(|offset| self.slots[(self.head + offset) % capacity].clone())
            .collect()
    }

    fn live(&self) -> impl Iterator<Item = &MemoryItem> {
        self.slots.iter().flatten()
    }
}

impl MemoryTier for ShortTermTier {
    fn kind(&self) -> TierKind {
        TierKind::ShortTerm
    }

    fn add(&mut self, item: MemoryItem) -> Result<()> {
        self.prune_expired();

        if let Some(evicted) = self.slots[self.head].replace(item) {
            tracing::debug!(id = %evicted.id, "Overwrote oldest short-term item");
        }
        self.head = (self.head + 1) % self.capacity();
        Ok(())
    }

    fn search(&mut self, query: &str) -> Result<Vec<MemoryItem>> {
        let needle = query.to_lowercase();
        let mut hits = Vec::new();

        for item in self.slots.iter_mut().flatten() {
            if item.matches(&needle) {
                item.touch();
                hits.push(item.clone());
            }
        }

        hits.sort_by(by_priority_then_recency);
        Ok(hits)
    }

    /// Hand on items at or above the tier's promote priority; keep the rest.
    fn compress(&mut self) -> Result<Vec<MemoryItem>> {
        let capacity = self.capacity();
        let threshold = self.promote_priority;
        let mut promoted = Vec::new();

        for offset in 0..capacity {
            let slot = &mut self.slots[(self.head + offset) % capacity];
            if slot.as_ref().is_some_and(|item| item.is_at_least(threshold)) {
                promoted.extend(slot.take());
            }
        }

        Ok(promoted)
    }

    fn len(&self) -> Result<usize> {
        Ok(self.live().count())
    }
}
