//! memvault core - tiered, encrypted working memory
//!
//! This crate provides the storage engine behind `mvault`:
//!
//! - **memory** - Short-term ring, mid-term pool, long-term encrypted store
//!   and the [`LayeredMemory`] orchestrator that moves items between them
//! - **storage** - [`SecureStorage`], an encrypted snapshot file with key
//!   rotation and timestamped backups
//! - **crypto** - ChaCha20-Poly1305 [`Cipher`] and key files
//! - **config** - [`VaultConfig`] and its sections
//!
//! # Example
//!
//! ```rust,no_run
//! use memvault_core::{LayeredMemory, VaultConfig};
//!
//! async fn example() -> memvault_core::Result<()> {
//!     let mut memory = LayeredMemory::open(VaultConfig::new("/tmp/vault")).await?;
//!
//!     memory.add_memory("User prefers dark coffee", 0.6, None)?;
//!     memory.add_memory("User is allergic to peanuts", 0.9, None)?;
//!
//!     for hit in memory.search("coffee", None) {
//!         println!("[{}] {}", hit.tier, hit.item.content);
//!     }
//!
//!     memory.shutdown().await
//! }
//! ```

pub mod config;
pub mod crypto;
pub mod error;
pub mod memory;
pub mod storage;
pub mod utils;

pub use config::{ConfigValidationError, LongTermConfig, MemoryConfig, StorageConfig, VaultConfig};
pub use crypto::Cipher;
pub use error::{Error, Result};
pub use memory::{
    CompressionResult, LayeredMemory, LongTermTier, MemoryItem, MemoryMatch, MemoryTier,
    Metadata, MidTermTier, ShortTermTier, StorageStatus, TierKind,
};
pub use storage::{BackupInfo, BackupReason, HealthStatus, SecureStorage};
