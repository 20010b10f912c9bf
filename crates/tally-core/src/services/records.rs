//! Caller-facing facade over the local store, engine, and coordinator

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::config::SyncOptions;
use crate::db::LocalStore;
use crate::engine::{ReconcileEngine, UpsertOutcome, WipeReport};
use crate::error::{Error, Result};
use crate::ident;
use crate::models::{EntityKind, OwnerId, Payload, RecordId, SyncConflict, SyncableRecord};
use crate::remote::RecordStore;
use crate::sync::{PushReport, SyncCoordinator};

/// Result of retrying the pending-sync backlog for one kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub kind: EntityKind,
    pub synced: usize,
    pub still_pending: usize,
}

/// Thread-safe record service scoped to one owner.
///
/// Without a remote store the service runs local-only: mutations land in
/// the cache flagged `pending_sync`, and push, wipe, and flush report
/// [`Error::RemoteNotConfigured`].
#[derive(Clone)]
pub struct RecordService {
    store: LocalStore,
    owner: OwnerId,
    engine: Option<Arc<ReconcileEngine>>,
    coordinator: Option<SyncCoordinator>,
}

impl RecordService {
    /// Open the service over a database file, creating parent directories
    pub fn open_path(
        db_path: impl Into<PathBuf>,
        owner: OwnerId,
        remote: Option<Arc<dyn RecordStore>>,
        options: SyncOptions,
    ) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self::with_store(
            LocalStore::open(db_path)?,
            owner,
            remote,
            options,
        ))
    }

    /// Open the service over an in-memory store (primarily for tests)
    pub fn open_in_memory(
        owner: OwnerId,
        remote: Option<Arc<dyn RecordStore>>,
        options: SyncOptions,
    ) -> Result<Self> {
        Ok(Self::with_store(
            LocalStore::open_in_memory()?,
            owner,
            remote,
            options,
        ))
    }

    fn with_store(
        store: LocalStore,
        owner: OwnerId,
        remote: Option<Arc<dyn RecordStore>>,
        options: SyncOptions,
    ) -> Self {
        let engine = remote.map(|remote| {
            Arc::new(ReconcileEngine::new(
                store.clone(),
                remote,
                owner.clone(),
                options,
            ))
        });
        let coordinator = engine
            .as_ref()
            .map(|engine| SyncCoordinator::new(Arc::clone(engine)));
        if engine.is_none() {
            tracing::info!("Running in local-only mode (no remote store configured)");
        }

        Self {
            store,
            owner,
            engine,
            coordinator,
        }
    }

    /// Whether a remote store is wired in
    #[must_use]
    pub const fn is_sync_enabled(&self) -> bool {
        self.engine.is_some()
    }

    /// The owner every operation is scoped to
    #[must_use]
    pub const fn owner(&self) -> &OwnerId {
        &self.owner
    }

    /// Cancellation flag for bulk operations, when sync is enabled
    #[must_use]
    pub fn cancel_handle(&self) -> Option<Arc<AtomicBool>> {
        self.engine.as_ref().map(|engine| engine.cancel_handle())
    }

    /// Create a record with a freshly minted id
    pub async fn create(&self, payload: Payload) -> Result<(SyncableRecord, UpsertOutcome)> {
        self.save(SyncableRecord::new(self.owner.clone(), payload))
            .await
    }

    /// Create a record reusing `candidate` when it is a well-formed id.
    ///
    /// A malformed candidate is replaced with a fresh id (and the repair
    /// logged). This is the only entry point where an id can change; after
    /// the first write it is immutable.
    pub async fn create_with_id(
        &self,
        candidate: Option<&str>,
        payload: Payload,
    ) -> Result<(SyncableRecord, UpsertOutcome)> {
        let id = ident::ensure_valid(candidate);
        self.save(SyncableRecord::with_id(id, self.owner.clone(), payload))
            .await
    }

    /// Replace a record's payload in place; the id never changes
    pub async fn update(
        &self,
        kind: EntityKind,
        id: RecordId,
        payload: Payload,
    ) -> Result<(SyncableRecord, UpsertOutcome)> {
        if payload.kind() != kind {
            return Err(Error::InvalidInput(format!(
                "payload is a {}, record is a {kind}",
                payload.kind()
            )));
        }

        let mut record = self
            .store
            .get(kind, id)?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        if record.owner_id != self.owner {
            return Err(Error::OwnershipViolation(format!(
                "record {id} belongs to another account"
            )));
        }

        record.payload = payload;
        record.touch();
        self.save(record).await
    }

    async fn save(&self, record: SyncableRecord) -> Result<(SyncableRecord, UpsertOutcome)> {
        let kind = record.kind();
        let id = record.id;

        let outcome = match &self.engine {
            Some(engine) => engine.apply_upsert(&record).await?,
            None => {
                self.store.upsert(&record)?;
                self.store.mark_pending(kind, id)?;
                UpsertOutcome::Pending
            }
        };

        // return what the store kept, which may be a newer row than ours
        let stored = self
            .store
            .get(kind, id)?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        Ok((stored, outcome))
    }

    /// Delete a record everywhere. Returns the removed local copy.
    pub async fn delete(&self, kind: EntityKind, id: RecordId) -> Result<Option<SyncableRecord>> {
        match &self.engine {
            Some(engine) => engine.apply_delete(kind, id).await,
            None => {
                let mut removed = self.store.get(kind, id)?;
                if let Some(record) = removed.as_mut() {
                    if record.owner_id != self.owner {
                        return Err(Error::OwnershipViolation(format!(
                            "record {id} belongs to another account"
                        )));
                    }
                    record.tombstoned = true;
                }
                self.store.remove(kind, id)?;
                Ok(removed)
            }
        }
    }

    /// Wipe transactions, assets, and liabilities everywhere. Categories
    /// always survive.
    pub async fn wipe_all(&self) -> Result<WipeReport> {
        let engine = self.engine.as_ref().ok_or(Error::RemoteNotConfigured)?;
        engine.apply_bulk_wipe().await
    }

    /// Converge the remote table for one kind onto the local set
    pub async fn push_all(&self, kind: EntityKind) -> Result<PushReport> {
        let coordinator = self.coordinator.as_ref().ok_or(Error::RemoteNotConfigured)?;
        coordinator.push_all(kind).await
    }

    /// Push all four kinds in order
    pub async fn push_everything(&self) -> Result<Vec<PushReport>> {
        let coordinator = self.coordinator.as_ref().ok_or(Error::RemoteNotConfigured)?;
        coordinator.push_everything().await
    }

    /// Re-attempt every record flagged `pending_sync` for `kind`
    pub async fn flush_pending(&self, kind: EntityKind) -> Result<FlushReport> {
        let engine = self.engine.as_ref().ok_or(Error::RemoteNotConfigured)?;
        let backlog = self.store.list_pending(kind, &self.owner)?;

        let mut report = FlushReport {
            kind,
            synced: 0,
            still_pending: 0,
        };
        for record in backlog {
            match engine.apply_upsert(&record).await? {
                UpsertOutcome::Synced => report.synced += 1,
                UpsertOutcome::Pending => report.still_pending += 1,
            }
        }
        Ok(report)
    }

    /// Get a record by kind and id
    pub fn get(&self, kind: EntityKind, id: RecordId) -> Result<Option<SyncableRecord>> {
        self.store.get(kind, id)
    }

    /// All records of a kind, newest first
    pub fn list(&self, kind: EntityKind) -> Result<Vec<SyncableRecord>> {
        self.store.list(kind, &self.owner)
    }

    /// Ids of every record of a kind
    pub fn list_ids(&self, kind: EntityKind) -> Result<Vec<RecordId>> {
        self.store.list_ids(kind, &self.owner)
    }

    /// Records still waiting to sync, oldest first
    pub fn pending(&self, kind: EntityKind) -> Result<Vec<SyncableRecord>> {
        self.store.list_pending(kind, &self.owner)
    }

    /// Number of records of a kind
    pub fn record_count(&self, kind: EntityKind) -> Result<usize> {
        self.store.record_count(kind, &self.owner)
    }

    /// Recently logged write conflicts, newest first
    pub fn conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        self.store.conflicts(limit)
    }
}
