//! Reconciliation engine: single-record mutations across both stores
//!
//! Every operation writes the local store first, then converges the remote
//! store through the [`RecordStore`] seam with bounded retries. A remote
//! failure never rolls back local state; the worst outcome for an upsert is
//! a record flagged `pending_sync`.

mod locks;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::config::SyncOptions;
use crate::db::LocalStore;
use crate::error::{Error, Result};
use crate::models::{EntityKind, OwnerId, RecordId, SyncableRecord};
use crate::remote::{RecordStore, RemoteError, RemoteResult};
use crate::retry::retry_with_backoff;

use locks::IdLocks;

/// How an upsert settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The record reached the remote store
    Synced,
    /// Saved locally; the remote push exhausted its retries and the record
    /// is flagged for a later attempt
    Pending,
}

/// Per-table outcome of a bulk account wipe
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WipeReport {
    /// Tables verified empty on the remote store
    pub clean: Vec<EntityKind>,
    /// Tables not attempted because the wipe was cancelled
    pub skipped: Vec<EntityKind>,
}

impl WipeReport {
    /// True when every wipe table was attempted
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// Applies single-record operations to the local store and the remote store,
/// scoped to one owner.
pub struct ReconcileEngine {
    store: LocalStore,
    remote: Arc<dyn RecordStore>,
    owner: OwnerId,
    options: SyncOptions,
    locks: IdLocks,
    limiter: Arc<Semaphore>,
    cancel: Arc<AtomicBool>,
}

impl ReconcileEngine {
    #[must_use]
    pub fn new(
        store: LocalStore,
        remote: Arc<dyn RecordStore>,
        owner: OwnerId,
        options: SyncOptions,
    ) -> Self {
        Self {
            store,
            remote,
            owner,
            options,
            locks: IdLocks::new(),
            // a zero limit would deadlock every remote call
            limiter: Arc::new(Semaphore::new(options.concurrency_limit.max(1))),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cancellation flag checked between bulk steps; in-flight calls still
    /// complete, and partial progress is kept.
    #[must_use]
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    pub(crate) const fn store(&self) -> &LocalStore {
        &self.store
    }

    pub(crate) const fn owner(&self) -> &OwnerId {
        &self.owner
    }

    pub(crate) const fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub(crate) fn remote(&self) -> Arc<dyn RecordStore> {
        Arc::clone(&self.remote)
    }

    pub(crate) fn limiter(&self) -> Arc<Semaphore> {
        Arc::clone(&self.limiter)
    }

    /// Upsert one record: local write first, then a retried remote push.
    ///
    /// When the push exhausts its retries the record stays local, flagged
    /// `pending_sync`, and the call still succeeds with
    /// [`UpsertOutcome::Pending`]. Resending the same record is safe; the id
    /// is the idempotency token.
    pub async fn apply_upsert(&self, record: &SyncableRecord) -> Result<UpsertOutcome> {
        if record.owner_id != self.owner {
            return Err(Error::OwnershipViolation(format!(
                "record {} belongs to {}, engine is scoped to {}",
                record.id, record.owner_id, self.owner
            )));
        }

        let kind = record.kind();
        let _guard = self.locks.acquire(record.id).await;

        self.store.upsert(record)?;
        // The store arbitrates concurrent writers by timestamp, so push
        // whatever it kept rather than the argument.
        let stored = self
            .store
            .get(kind, record.id)?
            .ok_or_else(|| Error::NotFound(record.id.to_string()))?;

        match self.push_records(kind, vec![stored]).await {
            Ok(()) => {
                self.store.clear_pending(kind, record.id)?;
                Ok(UpsertOutcome::Synced)
            }
            Err(error) if error.is_transient() => {
                self.store.mark_pending(kind, record.id)?;
                tracing::warn!(
                    "{kind} {} saved locally, sync pending: {error}",
                    record.id
                );
                Ok(UpsertOutcome::Pending)
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Delete one record from both stores, verifying the remote really
    /// dropped it before reporting success.
    ///
    /// A record that only exists remotely is still deleted there. Returns
    /// the removed local copy (tombstoned) when one existed.
    pub async fn apply_delete(
        &self,
        kind: EntityKind,
        id: RecordId,
    ) -> Result<Option<SyncableRecord>> {
        let _guard = self.locks.acquire(id).await;

        let mut removed = self.store.get(kind, id)?;
        if let Some(record) = removed.as_mut() {
            if record.owner_id != self.owner {
                return Err(Error::OwnershipViolation(format!(
                    "record {id} belongs to {}, engine is scoped to {}",
                    record.owner_id, self.owner
                )));
            }
            record.tombstoned = true;
        }

        self.store.remove(kind, id)?;

        let ids = [id];
        self.delete_remote_ids(kind, &ids).await.map_err(Error::from)?;

        if self.remote_has(kind, id).await? {
            tracing::warn!("{kind} {id} still listed after delete; retrying once");
            self.delete_remote_ids(kind, &ids).await.map_err(Error::from)?;
            if self.remote_has(kind, id).await? {
                return Err(Error::DeleteNotConfirmed { kind, id });
            }
        }

        Ok(removed)
    }

    /// Wipe the owner's transactions, assets, and liabilities everywhere,
    /// verifying each remote table empties. Categories are never touched.
    ///
    /// Tables are processed in a fixed order; a cancel between tables keeps
    /// the progress made so far and reports the remainder as skipped.
    pub async fn apply_bulk_wipe(&self) -> Result<WipeReport> {
        let mut report = WipeReport::default();
        let mut failed = Vec::new();

        for (index, kind) in EntityKind::WIPE_ORDER.iter().copied().enumerate() {
            if self.is_cancelled() {
                report.skipped = EntityKind::WIPE_ORDER[index..].to_vec();
                tracing::info!("wipe cancelled before {kind}");
                break;
            }

            let removed = self.store.wipe_kind(kind, &self.owner)?;
            tracing::debug!("cleared {removed} local {kind} rows");

            if self.wipe_remote_table(kind).await? {
                report.clean.push(kind);
            } else {
                failed.push(kind);
            }
        }

        if failed.is_empty() {
            Ok(report)
        } else {
            Err(Error::PartialWipe {
                clean: report.clean,
                failed,
            })
        }
    }

    /// Returns whether the remote table verified empty. Ownership failures
    /// abort the whole wipe; anything else marks the table dirty so the
    /// remaining tables still get their chance.
    async fn wipe_remote_table(&self, kind: EntityKind) -> Result<bool> {
        for round in 1..=2 {
            match self.delete_all_remote(kind).await {
                Ok(()) => match self.fetch_remote_ids(kind).await {
                    Ok(ids) if ids.is_empty() => return Ok(true),
                    Ok(ids) => {
                        tracing::warn!(
                            "{kind} still lists {} rows after wipe round {round}",
                            ids.len()
                        );
                    }
                    Err(RemoteError::Ownership(message)) => {
                        return Err(Error::OwnershipViolation(message));
                    }
                    Err(error) => {
                        tracing::warn!("could not verify {kind} wipe (round {round}): {error}");
                    }
                },
                Err(RemoteError::Ownership(message)) => {
                    return Err(Error::OwnershipViolation(message));
                }
                Err(error) => {
                    tracing::warn!("wipe of {kind} failed (round {round}): {error}");
                }
            }
        }
        Ok(false)
    }

    /// One retried, permit-bounded remote upsert call
    async fn push_records(&self, kind: EntityKind, records: Vec<SyncableRecord>) -> RemoteResult<()> {
        let _permit = self.acquire_permit().await?;
        let remote = Arc::clone(&self.remote);
        let records = Arc::new(records);

        retry_with_backoff(&self.options.retry, "remote upsert", move || {
            let remote = Arc::clone(&remote);
            let records = Arc::clone(&records);
            async move { remote.upsert(kind, &records).await }
        })
        .await
    }

    /// One retried, permit-bounded remote delete call
    pub(crate) async fn delete_remote_ids(
        &self,
        kind: EntityKind,
        ids: &[RecordId],
    ) -> RemoteResult<()> {
        let _permit = self.acquire_permit().await?;
        let remote = Arc::clone(&self.remote);
        let owner = self.owner.clone();
        let ids = Arc::new(ids.to_vec());

        retry_with_backoff(&self.options.retry, "remote delete", move || {
            let remote = Arc::clone(&remote);
            let owner = owner.clone();
            let ids = Arc::clone(&ids);
            async move { remote.delete_by_ids(kind, &owner, &ids).await }
        })
        .await
    }

    /// One retried, permit-bounded remote wipe call
    async fn delete_all_remote(&self, kind: EntityKind) -> RemoteResult<()> {
        let _permit = self.acquire_permit().await?;
        let remote = Arc::clone(&self.remote);
        let owner = self.owner.clone();

        retry_with_backoff(&self.options.retry, "remote wipe", move || {
            let remote = Arc::clone(&remote);
            let owner = owner.clone();
            async move { remote.delete_all(kind, &owner).await }
        })
        .await
    }

    /// One retried, permit-bounded remote listing
    pub(crate) async fn fetch_remote_ids(&self, kind: EntityKind) -> RemoteResult<Vec<RecordId>> {
        let _permit = self.acquire_permit().await?;
        let remote = Arc::clone(&self.remote);
        let owner = self.owner.clone();

        retry_with_backoff(&self.options.retry, "remote list", move || {
            let remote = Arc::clone(&remote);
            let owner = owner.clone();
            async move { remote.list_ids(kind, &owner).await }
        })
        .await
    }

    async fn remote_has(&self, kind: EntityKind, id: RecordId) -> Result<bool> {
        let ids = self.fetch_remote_ids(kind).await.map_err(Error::from)?;
        Ok(ids.contains(&id))
    }

    async fn acquire_permit(&self) -> RemoteResult<tokio::sync::SemaphorePermit<'_>> {
        self.limiter
            .acquire()
            .await
            .map_err(|_| RemoteError::Transient("concurrency limiter closed".to_string()))
    }
}
