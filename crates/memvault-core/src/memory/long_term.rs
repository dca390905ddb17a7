//! Long-term tier: encrypted SQLite store with a derived search index.
//!
//! Rows hold ciphertext only. The index maps keyed hashes of the content's
//! lowercase character trigrams to row ids, so candidate selection never
//! needs plaintext; the final substring test runs on decrypted content.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, params_from_iter, Connection, Row};

use crate::crypto::Cipher;
use crate::error::{Error, Result};
use super::migrations::run_migrations;
use super::types::{by_priority_then_recency, MemoryItem, MemoryTier, TierKind};

const TRIGRAM: usize = 3;

/// Most index tokens bound into one candidate query. Any subset of a
/// query's tokens still selects every true match, so long queries filter on
/// the first `MAX_QUERY_TOKENS` and leave the rest to the substring test.
const MAX_QUERY_TOKENS: usize = 256;

const SELECT_COLUMNS: &str =
    "SELECT id, content, priority, created_at, last_accessed_at, metadata_json, embedding_json FROM long_term_memory";

/// Row and index counts of the long-term store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LongTermStats {
    pub rows: usize,
    pub index_tokens: usize,
}

/// Persistent, encrypted, searchable store.
pub struct LongTermTier {
    conn: Mutex<Connection>,
    cipher: Arc<Cipher>,
    retention: Duration,
}

impl LongTermTier {
    /// Open or create the store at `path`
    pub fn open(path: impl AsRef<Path>, cipher: Arc<Cipher>, retention_seconds: u64) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::with_connection(conn, cipher, retention_seconds)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory(cipher: Arc<Cipher>, retention_seconds: u64) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, cipher, retention_seconds)
    }

    fn with_connection(conn: Connection, cipher: Arc<Cipher>, retention_seconds: u64) -> Result<Self> {
        run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            cipher,
            retention: Duration::seconds(retention_seconds.min(u32::MAX as u64) as i64),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| Error::LockPoisoned)
    }

    /// Row and index counts
    pub fn stats(&self) -> Result<LongTermStats> {
        let conn = self.lock()?;
        let rows: i64 = conn.query_row("SELECT COUNT(*) FROM long_term_memory", [], |row| row.get(0))?;
        let index_tokens: i64 = conn.query_row("SELECT COUNT(*) FROM long_term_index", [], |row| row.get(0))?;
        Ok(LongTermStats {
            rows: rows as usize,
            index_tokens: index_tokens as usize,
        })
    }

    /// Whether a row with this id is stored
    pub fn contains(&self, id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let found: i64 = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM long_term_memory WHERE id = ?1)",
            params![id],
            |row| row.get(0),
        )?;
        Ok(found != 0)
    }

    /// Index tokens for a piece of plaintext
    fn tokens_for(&self, plaintext: &str) -> BTreeSet<String> {
        trigrams(plaintext)
            .iter()
            .map(|term| self.cipher.index_token(term))
            .collect()
    }

    /// Fetch candidate rows for `needle` (already lowercase)
    fn candidates(&self, conn: &Connection, needle: &str) -> Result<Vec<MemoryItem>> {
        let tokens: Vec<String> = self
            .tokens_for(needle)
            .into_iter()
            .take(MAX_QUERY_TOKENS)
            .collect();

        if tokens.is_empty() {
            let mut stmt = conn.prepare(SELECT_COLUMNS)?;
            let rows = stmt
                .query_map([], row_to_item)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            return Ok(rows);
        }

        let placeholders = vec!["?"; tokens.len()].join(",");
        let sql = format!(
            "{} WHERE id IN (
                SELECT memory_id FROM long_term_index
                WHERE token IN ({})
                GROUP BY memory_id
                HAVING COUNT(*) = {}
            )",
            SELECT_COLUMNS,
            placeholders,
            tokens.len()
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(tokens.iter()), row_to_item)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

impl MemoryTier for LongTermTier {
    fn kind(&self) -> TierKind {
        TierKind::LongTerm
    }

    fn add(&mut self, item: MemoryItem) -> Result<()> {
        self.add_many(vec![item])
    }

    /// Insert rows and their index entries in one transaction.
    fn add_many(&mut self, items: Vec<MemoryItem>) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }

        // Seal and tokenize before taking the lock so a bad item fails the
        // batch without touching the database.
        let mut prepared = Vec::with_capacity(items.len());
        for mut item in items {
            let plaintext = if item.encrypted {
                self.cipher.decrypt_text(&item.content)?
            } else {
                let plaintext = item.content.clone();
                item.seal(&self.cipher)?;
                plaintext
            };
            let tokens = self.tokens_for(&plaintext);
            prepared.push((item, tokens));
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for (item, tokens) in &prepared {
            tx.execute("DELETE FROM long_term_index WHERE memory_id = ?1", params![&item.id])?;
            tx.execute(
                "INSERT OR REPLACE INTO long_term_memory
                    (id, content, priority, created_at, last_accessed_at, metadata_json, embedding_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    &item.id,
                    &item.content,
                    item.priority,
                    item.created_at.timestamp_millis(),
                    item.last_accessed_at.timestamp_millis(),
                    serde_json::to_string(&item.metadata)?,
                    item.embedding.as_ref().map(serde_json::to_string).transpose()?,
                ],
            )?;

            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO long_term_index (token, memory_id) VALUES (?1, ?2)",
            )?;
            for token in tokens {
                stmt.execute(params![token, &item.id])?;
            }
        }
        tx.commit()?;

        tracing::debug!(count = prepared.len(), "Stored items in long-term memory");
        Ok(())
    }

    /// Decrypt candidates and match on plaintext. Rows that fail to decrypt
    /// are logged and left out of the result.
    fn search(&mut self, query: &str) -> Result<Vec<MemoryItem>> {
        let needle = query.to_lowercase();
        let mut conn = self.lock()?;
        let candidates = self.candidates(&conn, &needle)?;

        let now = Utc::now();
        let mut hits = Vec::new();
        for mut item in candidates {
            if let Err(e) = item.unseal(&self.cipher) {
                tracing::warn!(id = %item.id, error = %e, "Skipping unreadable long-term row");
                continue;
            }
            if item.matches(&needle) {
                item.last_accessed_at = now;
                hits.push(item);
            }
        }

        if !hits.is_empty() {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(
                    "UPDATE long_term_memory SET last_accessed_at = ?1 WHERE id = ?2",
                )?;
                for item in &hits {
                    stmt.execute(params![now.timestamp_millis(), &item.id])?;
                }
            }
            tx.commit()?;
        }

        hits.sort_by(by_priority_then_recency);
        Ok(hits)
    }

    /// Archive every row older than the retention window. The removed rows
    /// come back still sealed; nothing is written anywhere else.
    fn compress(&mut self) -> Result<Vec<MemoryItem>> {
        let cutoff = (Utc::now() - self.retention).timestamp_millis();
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let archived = {
            let mut stmt = tx.prepare(&format!("{} WHERE created_at < ?1", SELECT_COLUMNS))?;
            stmt.query_map(params![cutoff], row_to_item)?
                .collect::<std::result::Result<Vec<_>, _>>()?
        };

        if !archived.is_empty() {
            tx.execute(
                "DELETE FROM long_term_index WHERE memory_id IN (
                    SELECT id FROM long_term_memory WHERE created_at < ?1
                )",
                params![cutoff],
            )?;
            tx.execute("DELETE FROM long_term_memory WHERE created_at < ?1", params![cutoff])?;
        }
        tx.commit()?;

        if !archived.is_empty() {
            tracing::info!(count = archived.len(), "Archived stale long-term items");
        }
        Ok(archived)
    }

    fn len(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM long_term_memory", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

/// Distinct lowercase character trigrams of `text`
fn trigrams(text: &str) -> BTreeSet<String> {
    let chars: Vec<char> = text.to_lowercase().chars().collect();
    chars
        .windows(TRIGRAM)
        .map(|window| window.iter().collect())
        .collect()
}

fn row_to_item(row: &Row) -> rusqlite::Result<MemoryItem> {
    let metadata_json: String = row.get(5)?;
    let embedding_json: Option<String> = row.get(6)?;

    Ok(MemoryItem {
        id: row.get(0)?,
        content: row.get(1)?,
        priority: row.get(2)?,
        created_at: DateTime::from_timestamp_millis(row.get::<_, i64>(3)?).unwrap_or_default(),
        last_accessed_at: DateTime::from_timestamp_millis(row.get::<_, i64>(4)?).unwrap_or_default(),
        metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
        embedding: embedding_json.and_then(|json| serde_json::from_str(&json).ok()),
        encrypted: true,
    })
}
