//! Layered Working Memory
//!
//! Implements a three-tier memory architecture:
//! - Short-term: fixed-capacity ring buffer with a TTL
//! - Mid-term: capacity-bounded pool evicting the lowest priority first
//! - Long-term: SQLite rows with encrypted content and a keyed search index
//!
//! # Architecture
//!
//! Memory flows downward through compression:
//! 1. New entries start in short-term memory
//! 2. A sweep drains short-term; critical entries go straight to long-term,
//!    the rest to mid-term
//! 3. Critical entries left in mid-term are promoted on the next forced sweep
//! 4. Long-term rows past retention are archived on request
//!
//! Retrieval searches all tiers and orders hits by priority.

mod types;
mod short_term;
mod mid_term;
mod long_term;
mod snapshot;
mod layered;

pub mod migrations;

// Re-export public types
pub use types::{
    clamp_priority, by_priority_then_recency, CompressionResult, MemoryItem, MemoryMatch,
    MemoryTier, Metadata, TierKind,
};

pub use short_term::ShortTermTier;
pub use mid_term::MidTermTier;
pub use long_term::{LongTermStats, LongTermTier};
pub use snapshot::{Snapshot, SnapshotCounts};
pub use layered::{LayeredMemory, StorageStatus};
