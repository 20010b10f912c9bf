//! Key-scoped local record store
//!
//! The offline-first source of truth. Access is synchronous behind a shared
//! handle; writes are arbitrated last-write-wins by `updated_at`, and a
//! losing write is logged to `sync_conflicts` by a schema trigger.

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rusqlite::{params, Connection};

use crate::error::Result;
use crate::models::{EntityKind, OwnerId, Payload, RecordId, SyncConflict, SyncableRecord};

use super::connection;

/// Shared handle to the local cache. Clones use the same connection.
#[derive(Clone)]
pub struct LocalStore {
    conn: Arc<Mutex<Connection>>,
}

impl LocalStore {
    /// Open (or create) the store at the given filesystem path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::wrap(connection::open_file(path)?))
    }

    /// Open an in-memory store (primarily for testing)
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::wrap(connection::open_in_memory()?))
    }

    fn wrap(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or update a record, keyed by `(kind, id)`.
    ///
    /// A write older than the stored row is suppressed by the
    /// last-write-wins guard and logged as a conflict; the call still
    /// succeeds. A successful write resets the pending-sync flag.
    pub fn upsert(&self, record: &SyncableRecord) -> Result<()> {
        let payload = serde_json::Value::Object(record.payload.to_map()?);
        self.lock().execute(
            "INSERT INTO records (kind, id, owner_id, payload, updated_at, pending_sync)
             VALUES (?, ?, ?, ?, ?, 0)
             ON CONFLICT (kind, id) DO UPDATE SET
                 owner_id = excluded.owner_id,
                 payload = excluded.payload,
                 updated_at = excluded.updated_at,
                 pending_sync = excluded.pending_sync",
            params![
                record.kind().as_str(),
                record.id.as_str(),
                record.owner_id.as_str(),
                payload,
                record.updated_at
            ],
        )?;
        Ok(())
    }

    /// Get a record by kind and id
    pub fn get(&self, kind: EntityKind, id: RecordId) -> Result<Option<SyncableRecord>> {
        let result = self.lock().query_row(
            "SELECT kind, id, owner_id, payload, updated_at FROM records
             WHERE kind = ? AND id = ?",
            params![kind.as_str(), id.as_str()],
            parse_record,
        );

        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    /// Remove a record. Returns whether a row existed.
    pub fn remove(&self, kind: EntityKind, id: RecordId) -> Result<bool> {
        let rows = self.lock().execute(
            "DELETE FROM records WHERE kind = ? AND id = ?",
            params![kind.as_str(), id.as_str()],
        )?;
        Ok(rows > 0)
    }

    /// All of an owner's records for a kind, newest first
    pub fn list(&self, kind: EntityKind, owner: &OwnerId) -> Result<Vec<SyncableRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT kind, id, owner_id, payload, updated_at FROM records
             WHERE kind = ? AND owner_id = ?
             ORDER BY updated_at DESC, id ASC",
        )?;
        let records = stmt
            .query_map(params![kind.as_str(), owner.as_str()], parse_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Ids of an owner's records for a kind
    pub fn list_ids(&self, kind: EntityKind, owner: &OwnerId) -> Result<Vec<RecordId>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id FROM records WHERE kind = ? AND owner_id = ? ORDER BY id ASC",
        )?;
        let ids = stmt
            .query_map(params![kind.as_str(), owner.as_str()], |row| {
                let raw: String = row.get(0)?;
                raw.parse::<RecordId>().map_err(|error| column_error(0, error))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    /// Flag a record for a later sync retry
    pub fn mark_pending(&self, kind: EntityKind, id: RecordId) -> Result<()> {
        self.lock().execute(
            "UPDATE records SET pending_sync = 1 WHERE kind = ? AND id = ?",
            params![kind.as_str(), id.as_str()],
        )?;
        Ok(())
    }

    /// Clear the pending-sync flag for a record
    pub fn clear_pending(&self, kind: EntityKind, id: RecordId) -> Result<()> {
        self.lock().execute(
            "UPDATE records SET pending_sync = 0 WHERE kind = ? AND id = ?",
            params![kind.as_str(), id.as_str()],
        )?;
        Ok(())
    }

    /// Clear every pending-sync flag an owner has for a kind
    pub fn clear_pending_for_kind(&self, kind: EntityKind, owner: &OwnerId) -> Result<()> {
        self.lock().execute(
            "UPDATE records SET pending_sync = 0
             WHERE kind = ? AND owner_id = ? AND pending_sync = 1",
            params![kind.as_str(), owner.as_str()],
        )?;
        Ok(())
    }

    /// Records flagged for a sync retry, oldest first
    pub fn list_pending(&self, kind: EntityKind, owner: &OwnerId) -> Result<Vec<SyncableRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT kind, id, owner_id, payload, updated_at FROM records
             WHERE kind = ? AND owner_id = ? AND pending_sync = 1
             ORDER BY updated_at ASC, id ASC",
        )?;
        let records = stmt
            .query_map(params![kind.as_str(), owner.as_str()], parse_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Delete all of an owner's rows for a kind. Returns the removed count.
    pub fn wipe_kind(&self, kind: EntityKind, owner: &OwnerId) -> Result<usize> {
        let rows = self.lock().execute(
            "DELETE FROM records WHERE kind = ? AND owner_id = ?",
            params![kind.as_str(), owner.as_str()],
        )?;
        Ok(rows)
    }

    /// Number of records an owner has for a kind
    pub fn record_count(&self, kind: EntityKind, owner: &OwnerId) -> Result<usize> {
        let count = self.lock().query_row(
            "SELECT COUNT(*) FROM records WHERE kind = ? AND owner_id = ?",
            params![kind.as_str(), owner.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Recently logged write conflicts, newest first
    pub fn conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, kind, record_id, local_updated_at, incoming_updated_at, resolved_at, strategy
             FROM sync_conflicts
             ORDER BY resolved_at DESC, id DESC
             LIMIT ?",
        )?;
        let conflicts = stmt
            .query_map(params![limit as i64], |row| {
                let kind_raw: String = row.get(1)?;
                Ok(SyncConflict {
                    id: row.get(0)?,
                    kind: kind_raw
                        .parse::<EntityKind>()
                        .map_err(|error| column_error(1, error))?,
                    record_id: row.get(2)?,
                    local_updated_at: row.get(3)?,
                    incoming_updated_at: row.get(4)?,
                    resolved_at: row.get(5)?,
                    strategy: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(conflicts)
    }
}

fn parse_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncableRecord> {
    let kind_raw: String = row.get(0)?;
    let kind = kind_raw
        .parse::<EntityKind>()
        .map_err(|error| column_error(0, error))?;
    let id_raw: String = row.get(1)?;
    let id = id_raw
        .parse::<RecordId>()
        .map_err(|error| column_error(1, error))?;
    let owner: String = row.get(2)?;
    let payload_value: serde_json::Value = row.get(3)?;
    let payload =
        Payload::from_value(kind, payload_value).map_err(|error| column_error(3, error))?;

    Ok(SyncableRecord {
        id,
        owner_id: OwnerId::new(owner),
        payload,
        updated_at: row.get(4)?,
        tombstoned: false,
    })
}

fn column_error(
    index: usize,
    error: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(error))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::models::{AssetPayload, FlowKind, TransactionPayload};

    use super::*;

    fn store() -> LocalStore {
        LocalStore::open_in_memory().unwrap()
    }

    fn owner() -> OwnerId {
        OwnerId::new("alice")
    }

    fn transaction(owner: &OwnerId, description: &str) -> SyncableRecord {
        SyncableRecord::new(
            owner.clone(),
            Payload::Transaction(TransactionPayload {
                amount: 10.0,
                flow: FlowKind::Expense,
                description: description.to_string(),
                category: None,
            }),
        )
    }

    fn asset(owner: &OwnerId, name: &str, value: f64) -> SyncableRecord {
        SyncableRecord::new(
            owner.clone(),
            Payload::Asset(AssetPayload {
                name: name.to_string(),
                value,
            }),
        )
    }

    #[test]
    fn upsert_and_get_roundtrip() {
        let store = store();
        let record = transaction(&owner(), "Coffee");
        store.upsert(&record).unwrap();

        let loaded = store.get(EntityKind::Transaction, record.id).unwrap().unwrap();
        assert_eq!(loaded, record);
    }

    #[test]
    fn get_missing_returns_none() {
        let store = store();
        assert!(store
            .get(EntityKind::Asset, RecordId::new())
            .unwrap()
            .is_none());
    }

    #[test]
    fn upsert_replaces_newer_content() {
        let store = store();
        let mut record = asset(&owner(), "Savings", 100.0);
        store.upsert(&record).unwrap();

        record.payload = Payload::Asset(AssetPayload {
            name: "Savings".to_string(),
            value: 250.0,
        });
        record.touch();
        store.upsert(&record).unwrap();

        let loaded = store.get(EntityKind::Asset, record.id).unwrap().unwrap();
        assert_eq!(loaded.payload, record.payload);
        assert_eq!(store.record_count(EntityKind::Asset, &owner()).unwrap(), 1);
    }

    #[test]
    fn stale_upsert_loses_and_is_logged() {
        let store = store();
        let mut record = asset(&owner(), "Savings", 100.0);
        record.updated_at = 2_000;
        store.upsert(&record).unwrap();

        let mut stale = record.clone();
        stale.payload = Payload::Asset(AssetPayload {
            name: "Savings".to_string(),
            value: 1.0,
        });
        stale.updated_at = 1_000;
        store.upsert(&stale).unwrap();

        let loaded = store.get(EntityKind::Asset, record.id).unwrap().unwrap();
        assert_eq!(loaded.updated_at, 2_000);
        assert_eq!(loaded.payload, record.payload);

        let conflicts = store.conflicts(10).unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].kind, EntityKind::Asset);
        assert_eq!(conflicts[0].record_id, record.id.as_str());
        assert_eq!(conflicts[0].local_updated_at, 2_000);
        assert_eq!(conflicts[0].incoming_updated_at, 1_000);
        assert_eq!(conflicts[0].strategy, "lww");
    }

    #[test]
    fn remove_reports_whether_row_existed() {
        let store = store();
        let record = transaction(&owner(), "Bus");
        store.upsert(&record).unwrap();

        assert!(store.remove(EntityKind::Transaction, record.id).unwrap());
        assert!(!store.remove(EntityKind::Transaction, record.id).unwrap());
    }

    #[test]
    fn list_is_owner_scoped_and_newest_first() {
        let store = store();
        let alice = owner();
        let bob = OwnerId::new("bob");

        let mut first = transaction(&alice, "First");
        first.updated_at = 1_000;
        let mut second = transaction(&alice, "Second");
        second.updated_at = 2_000;
        let mut other = transaction(&bob, "Other");
        other.updated_at = 3_000;

        for record in [&first, &second, &other] {
            store.upsert(record).unwrap();
        }

        let listed = store.list(EntityKind::Transaction, &alice).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second.id);
        assert_eq!(listed[1].id, first.id);
    }

    #[test]
    fn kinds_do_not_collide() {
        let store = store();
        let alice = owner();
        store.upsert(&transaction(&alice, "Bus")).unwrap();
        store.upsert(&asset(&alice, "Cash", 50.0)).unwrap();

        assert_eq!(store.record_count(EntityKind::Transaction, &alice).unwrap(), 1);
        assert_eq!(store.record_count(EntityKind::Asset, &alice).unwrap(), 1);
        assert_eq!(store.record_count(EntityKind::Liability, &alice).unwrap(), 0);
    }

    #[test]
    fn pending_flag_cycle() {
        let store = store();
        let alice = owner();
        let record = transaction(&alice, "Offline");
        store.upsert(&record).unwrap();

        assert!(store.list_pending(EntityKind::Transaction, &alice).unwrap().is_empty());

        store.mark_pending(EntityKind::Transaction, record.id).unwrap();
        let pending = store.list_pending(EntityKind::Transaction, &alice).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, record.id);

        store.clear_pending(EntityKind::Transaction, record.id).unwrap();
        assert!(store.list_pending(EntityKind::Transaction, &alice).unwrap().is_empty());
    }

    #[test]
    fn upsert_resets_pending_flag() {
        let store = store();
        let alice = owner();
        let mut record = transaction(&alice, "Retry me");
        store.upsert(&record).unwrap();
        store.mark_pending(EntityKind::Transaction, record.id).unwrap();

        record.touch();
        store.upsert(&record).unwrap();
        assert!(store.list_pending(EntityKind::Transaction, &alice).unwrap().is_empty());
    }

    #[test]
    fn clear_pending_for_kind_scopes_by_owner() {
        let store = store();
        let alice = owner();
        let bob = OwnerId::new("bob");
        let mine = transaction(&alice, "Mine");
        let theirs = transaction(&bob, "Theirs");
        store.upsert(&mine).unwrap();
        store.upsert(&theirs).unwrap();
        store.mark_pending(EntityKind::Transaction, mine.id).unwrap();
        store.mark_pending(EntityKind::Transaction, theirs.id).unwrap();

        store.clear_pending_for_kind(EntityKind::Transaction, &alice).unwrap();

        assert!(store.list_pending(EntityKind::Transaction, &alice).unwrap().is_empty());
        assert_eq!(store.list_pending(EntityKind::Transaction, &bob).unwrap().len(), 1);
    }

    #[test]
    fn wipe_kind_removes_only_that_owner_and_kind() {
        let store = store();
        let alice = owner();
        let bob = OwnerId::new("bob");

        store.upsert(&transaction(&alice, "A")).unwrap();
        store.upsert(&transaction(&alice, "B")).unwrap();
        store.upsert(&asset(&alice, "Cash", 10.0)).unwrap();
        store.upsert(&transaction(&bob, "C")).unwrap();

        let removed = store.wipe_kind(EntityKind::Transaction, &alice).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.record_count(EntityKind::Transaction, &alice).unwrap(), 0);
        assert_eq!(store.record_count(EntityKind::Asset, &alice).unwrap(), 1);
        assert_eq!(store.record_count(EntityKind::Transaction, &bob).unwrap(), 1);
    }

    #[test]
    fn list_ids_matches_list() {
        let store = store();
        let alice = owner();
        let first = transaction(&alice, "One");
        let second = transaction(&alice, "Two");
        store.upsert(&first).unwrap();
        store.upsert(&second).unwrap();

        let mut ids = store.list_ids(EntityKind::Transaction, &alice).unwrap();
        ids.sort();
        let mut expected = vec![first.id, second.id];
        expected.sort();
        assert_eq!(ids, expected);
    }
}
