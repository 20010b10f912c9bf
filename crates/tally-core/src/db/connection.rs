//! Database connection management

use std::path::Path;

use rusqlite::Connection;

use crate::error::Result;

use super::migrations;

/// Open (or create) the cache database at `path`, configured and migrated
pub fn open_file(path: impl AsRef<Path>) -> Result<Connection> {
    let mut conn = Connection::open(path)?;
    configure(&conn)?;
    migrations::run(&mut conn)?;
    Ok(conn)
}

/// Open a private in-memory database (primarily for testing)
pub fn open_in_memory() -> Result<Connection> {
    let mut conn = Connection::open_in_memory()?;
    configure(&conn)?;
    migrations::run(&mut conn)?;
    Ok(conn)
}

/// Configure `SQLite` for a single-writer desktop cache
fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;
         PRAGMA cache_size = 10000;",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory_migrates_schema() {
        let conn = open_in_memory().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='records'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn open_file_creates_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tally.db");
        {
            let _conn = open_file(&path).unwrap();
        }
        assert!(path.exists());
    }
}
