//! Local cache schema migrations

use rusqlite::Connection;

use crate::error::Result;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub fn run(conn: &mut Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Get the current schema version (0 when the database is new)
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get::<_, i32>(0).map(|flag| flag != 0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    Ok(version)
}

/// Migration to version 1: the records cache with its pending-sync flag
fn migrate_v1(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );
        CREATE TABLE IF NOT EXISTS records (
            kind TEXT NOT NULL,
            id TEXT NOT NULL,
            owner_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            pending_sync INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (kind, id)
        );
        CREATE INDEX IF NOT EXISTS idx_records_owner ON records(owner_id);
        CREATE INDEX IF NOT EXISTS idx_records_updated ON records(kind, updated_at DESC);
        CREATE INDEX IF NOT EXISTS idx_records_pending ON records(pending_sync);
        INSERT INTO schema_version (version) VALUES (1);",
    )?;
    tx.commit()?;

    tracing::info!("Migrated database to version 1");
    Ok(())
}

/// Migration to version 2: last-write-wins guard with conflict logging.
/// A stale update (older `updated_at` than the stored row) is dropped and
/// recorded in `sync_conflicts` instead.
fn migrate_v2(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS sync_conflicts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,
            record_id TEXT NOT NULL,
            local_updated_at INTEGER NOT NULL,
            incoming_updated_at INTEGER NOT NULL,
            resolved_at INTEGER NOT NULL,
            strategy TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_sync_conflicts_record ON sync_conflicts(kind, record_id);
        CREATE INDEX IF NOT EXISTS idx_sync_conflicts_resolved ON sync_conflicts(resolved_at DESC);
        CREATE TRIGGER IF NOT EXISTS records_lww_guard BEFORE UPDATE ON records
        FOR EACH ROW
        WHEN NEW.updated_at < OLD.updated_at
        BEGIN
            INSERT INTO sync_conflicts (
                kind,
                record_id,
                local_updated_at,
                incoming_updated_at,
                resolved_at,
                strategy
            ) VALUES (
                OLD.kind,
                OLD.id,
                OLD.updated_at,
                NEW.updated_at,
                CAST(strftime('%s', 'now') AS INTEGER) * 1000,
                'lww'
            );
            SELECT RAISE(IGNORE);
        END;
        INSERT INTO schema_version (version) VALUES (2);",
    )?;
    tx.commit()?;

    tracing::info!("Migrated database to version {CURRENT_VERSION}");
    Ok(())
}
