//! Memory Type Definitions
//!
//! Defines the core types shared by the three memory tiers.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::Cipher;
use crate::error::Result;

/// Arbitrary string-keyed metadata attached to a memory
pub type Metadata = HashMap<String, serde_json::Value>;

/// Memory tier (short-term, mid-term, long-term)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierKind {
    ShortTerm,
    MidTerm,
    LongTerm,
}

impl TierKind {
    /// Convert from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "short_term" => Some(Self::ShortTerm),
            "mid_term" => Some(Self::MidTerm),
            "long_term" => Some(Self::LongTerm),
            _ => None,
        }
    }

    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ShortTerm => "short_term",
            Self::MidTerm => "mid_term",
            Self::LongTerm => "long_term",
        }
    }
}

impl std::fmt::Display for TierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single remembered fact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    pub id: String,
    /// Plaintext while resident in short/mid-term; ciphertext when `encrypted`
    pub content: String,
    /// Importance in [0, 1]
    pub priority: f64,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
    /// Reserved; carried and persisted but never searched
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub encrypted: bool,
}

impl MemoryItem {
    /// Create a new plaintext item stamped with the current time
    pub fn new(content: impl Into<String>, priority: f64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            priority: clamp_priority(priority),
            created_at: now,
            last_accessed_at: now,
            metadata: Metadata::new(),
            embedding: None,
            encrypted: false,
        }
    }

    /// Attach metadata
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Override the creation time (and access time) of the item
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self.last_accessed_at = created_at;
        self
    }

    /// Whether the item is at or above `threshold` priority
    pub fn is_at_least(&self, threshold: f64) -> bool {
        self.priority >= threshold
    }

    /// Case-insensitive substring match on plaintext content.
    ///
    /// `needle` must already be lowercase. Sealed items never match.
    pub fn matches(&self, needle: &str) -> bool {
        !self.encrypted && self.content.to_lowercase().contains(needle)
    }

    /// Record a successful read
    pub fn touch(&mut self) {
        self.last_accessed_at = Utc::now();
    }

    /// Encrypt content in place (no-op if already sealed)
    pub fn seal(&mut self, cipher: &Cipher) -> Result<()> {
        if !self.encrypted {
            self.content = cipher.encrypt_text(&self.content)?;
            self.encrypted = true;
        }
        Ok(())
    }

    /// Decrypt content in place (no-op if already plaintext)
    pub fn unseal(&mut self, cipher: &Cipher) -> Result<()> {
        if self.encrypted {
            self.content = cipher.decrypt_text(&self.content)?;
            self.encrypted = false;
        }
        Ok(())
    }

    /// Sealed copy of the item, leaving `self` untouched
    pub fn sealed(&self, cipher: &Cipher) -> Result<Self> {
        let mut copy = self.clone();
        copy.seal(cipher)?;
        Ok(copy)
    }
}

/// Clamp a caller-supplied priority into [0, 1]; NaN becomes 0.
pub fn clamp_priority(priority: f64) -> f64 {
    if priority.is_nan() {
        0.0
    } else {
        priority.clamp(0.0, 1.0)
    }
}

/// Order by priority descending, ties broken by most recent access.
pub fn by_priority_then_recency(a: &MemoryItem, b: &MemoryItem) -> std::cmp::Ordering {
    b.priority
        .partial_cmp(&a.priority)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then_with(|| b.last_accessed_at.cmp(&a.last_accessed_at))
}

/// Capability shared by the three tiers.
///
/// Each tier owns its storage exclusively; the orchestrator moves items
/// between tiers by taking them out of one and adding them to another.
pub trait MemoryTier {
    /// Which tier this is
    fn kind(&self) -> TierKind;

    /// Insert one item
    fn add(&mut self, item: MemoryItem) -> Result<()>;

    /// Insert many items
    fn add_many(&mut self, items: Vec<MemoryItem>) -> Result<()> {
        for item in items {
            self.add(item)?;
        }
        Ok(())
    }

    /// Case-insensitive substring search, priority-descending
    fn search(&mut self, query: &str) -> Result<Vec<MemoryItem>>;

    /// Remove and return the items this tier hands on
    fn compress(&mut self) -> Result<Vec<MemoryItem>>;

    /// Number of resident items
    fn len(&self) -> Result<usize>;

    /// Whether the tier holds nothing
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// A search hit and the tier it came from
#[derive(Debug, Clone)]
pub struct MemoryMatch {
    pub item: MemoryItem,
    pub tier: TierKind,
}

/// Result of one compression sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompressionResult {
    /// Short-term items sent straight to long-term
    pub short_to_long: usize,
    /// Short-term items sent to mid-term
    pub short_to_mid: usize,
    /// Mid-term items promoted to long-term
    pub mid_to_long: usize,
    /// Items that failed to reach long-term and were returned to mid-term
    pub requeued: usize,
}

impl CompressionResult {
    /// Total number of items that changed tier
    pub fn moved(&self) -> usize {
        self.short_to_long + self.short_to_mid + self.mid_to_long
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_conversion() {
        assert_eq!(TierKind::from_str("mid_term"), Some(TierKind::MidTerm));
        assert_eq!(TierKind::LongTerm.as_str(), "long_term");
        assert_eq!(TierKind::from_str("working"), None);
    }

    #[test]
    fn test_priority_is_clamped() {
        assert_eq!(MemoryItem::new("a", 1.7).priority, 1.0);
        assert_eq!(MemoryItem::new("a", -0.2).priority, 0.0);
        assert_eq!(MemoryItem::new("a", f64::NAN).priority, 0.0);
        assert_eq!(MemoryItem::new("a", 0.42).priority, 0.42);
    }

    #[test]
    fn test_seal_and_unseal() {
        let cipher = Cipher::generate();
        let mut item = MemoryItem::new("User prefers dark coffee", 0.6);

        item.seal(&cipher).unwrap();
        assert!(item.encrypted);
        assert!(!item.content.contains("coffee"));
        assert!(!item.matches("coffee"));

        // sealing twice must not double-encrypt
        let sealed_content = item.content.clone();
        item.seal(&cipher).unwrap();
        assert_eq!(item.content, sealed_content);

        item.unseal(&cipher).unwrap();
        assert!(!item.encrypted);
        assert_eq!(item.content, "User prefers dark coffee");
        assert!(item.matches("dark coffee"));
    }

    #[test]
    fn test_ordering() {
        let now = Utc::now();
        let mut low = MemoryItem::new("low", 0.2);
        let mut older = MemoryItem::new("older", 0.5);
        let mut newer = MemoryItem::new("newer", 0.5);
        low.last_accessed_at = now;
        older.last_accessed_at = now - chrono::Duration::seconds(10);
        newer.last_accessed_at = now;

        let mut items = vec![low, older, newer];
        items.sort_by(by_priority_then_recency);
        let order: Vec<&str> = items.iter().map(|i| i.content.as_str()).collect();
        assert_eq!(order, vec!["newer", "older", "low"]);
    }
}
