//! In-process record store used by tests and backend-less development

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::models::{EntityKind, OwnerId, RecordId, SyncableRecord};

use super::{RecordStore, RemoteError, RemoteResult};

/// One observed remote call, recorded in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    Upsert { kind: EntityKind, count: usize },
    DeleteByIds { kind: EntityKind, ids: Vec<RecordId> },
    DeleteAll { kind: EntityKind },
    ListIds { kind: EntityKind },
}

impl RemoteCall {
    /// The table the call touched
    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::Upsert { kind, .. }
            | Self::DeleteByIds { kind, .. }
            | Self::DeleteAll { kind }
            | Self::ListIds { kind } => *kind,
        }
    }
}

#[derive(Default)]
struct Inner {
    tables: HashMap<EntityKind, BTreeMap<String, SyncableRecord>>,
    calls: Vec<RemoteCall>,
    offline: bool,
    forbidden: bool,
    fail_upserts: u32,
    ignore_deletes: bool,
    unreachable: HashSet<EntityKind>,
}

impl Inner {
    fn gate(&self, kind: EntityKind) -> RemoteResult<()> {
        if self.forbidden {
            return Err(RemoteError::Ownership(
                "row-level security rejected the request".to_string(),
            ));
        }
        if self.offline || self.unreachable.contains(&kind) {
            return Err(RemoteError::Transient("remote store unreachable".to_string()));
        }
        Ok(())
    }
}

/// Shared-handle in-memory [`RecordStore`] with fault-injection switches.
///
/// Clones share state, so a test can keep one handle for assertions while
/// the engine owns another.
#[derive(Clone, Default)]
pub struct MemoryRecordStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryRecordStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop the network: every call fails transiently until restored
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Reject every call with an ownership violation
    pub fn set_forbidden(&self, forbidden: bool) {
        self.lock().forbidden = forbidden;
    }

    /// Fail the next `count` upsert calls transiently, then recover
    pub fn fail_next_upserts(&self, count: u32) {
        self.lock().fail_upserts = count;
    }

    /// Accept delete calls without removing anything (replica-lag simulation)
    pub fn set_ignore_deletes(&self, ignore: bool) {
        self.lock().ignore_deletes = ignore;
    }

    /// Make one table permanently unreachable
    pub fn set_unreachable(&self, kind: EntityKind) {
        self.lock().unreachable.insert(kind);
    }

    /// Seed a row as if another device had pushed it
    pub fn seed(&self, record: SyncableRecord) {
        let mut inner = self.lock();
        inner
            .tables
            .entry(record.kind())
            .or_default()
            .insert(record.id.as_str(), record);
    }

    /// Rows currently stored for a table, every owner included
    #[must_use]
    pub fn rows(&self, kind: EntityKind) -> Vec<SyncableRecord> {
        self.lock()
            .tables
            .get(&kind)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn row_count(&self, kind: EntityKind) -> usize {
        self.lock().tables.get(&kind).map_or(0, BTreeMap::len)
    }

    /// Calls observed so far, in order
    #[must_use]
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.lock().calls.clone()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn upsert(&self, kind: EntityKind, records: &[SyncableRecord]) -> RemoteResult<()> {
        let mut inner = self.lock();
        inner.calls.push(RemoteCall::Upsert {
            kind,
            count: records.len(),
        });
        inner.gate(kind)?;
        if inner.fail_upserts > 0 {
            inner.fail_upserts -= 1;
            return Err(RemoteError::Transient("injected upsert failure".to_string()));
        }

        let table = inner.tables.entry(kind).or_default();
        for record in records {
            table.insert(record.id.as_str(), record.clone());
        }
        Ok(())
    }

    async fn delete_by_ids(
        &self,
        kind: EntityKind,
        owner: &OwnerId,
        ids: &[RecordId],
    ) -> RemoteResult<()> {
        let mut inner = self.lock();
        inner.calls.push(RemoteCall::DeleteByIds {
            kind,
            ids: ids.to_vec(),
        });
        inner.gate(kind)?;
        if inner.ignore_deletes {
            return Ok(());
        }

        if let Some(table) = inner.tables.get_mut(&kind) {
            for id in ids {
                let key = id.as_str();
                // Rows the owner does not hold are silently skipped, like
                // a row-level-security filter would.
                if table.get(&key).is_some_and(|row| row.owner_id == *owner) {
                    table.remove(&key);
                }
            }
        }
        Ok(())
    }

    async fn delete_all(&self, kind: EntityKind, owner: &OwnerId) -> RemoteResult<()> {
        let mut inner = self.lock();
        inner.calls.push(RemoteCall::DeleteAll { kind });
        inner.gate(kind)?;
        if inner.ignore_deletes {
            return Ok(());
        }

        if let Some(table) = inner.tables.get_mut(&kind) {
            table.retain(|_, row| row.owner_id != *owner);
        }
        Ok(())
    }

    async fn list_ids(&self, kind: EntityKind, owner: &OwnerId) -> RemoteResult<Vec<RecordId>> {
        let mut inner = self.lock();
        inner.calls.push(RemoteCall::ListIds { kind });
        inner.gate(kind)?;

        Ok(inner.tables.get(&kind).map_or_else(Vec::new, |table| {
            table
                .values()
                .filter(|row| row.owner_id == *owner)
                .map(|row| row.id)
                .collect()
        }))
    }
}
