//! Long-term store database migrations
//!
//! SQL migrations are embedded as strings and executed when the store opens.

use rusqlite::Connection;
use crate::Result;

/// Long-term tables SQL (001)
pub const LONG_TERM_TABLES_SQL: &str = include_str!("001_long_term.sql");

/// Run all long-term migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(LONG_TERM_TABLES_SQL)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name LIKE 'long_term_%'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 2);
    }
}
