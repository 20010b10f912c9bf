//! Bulk sync coordinator: converge a remote table onto the local set
//!
//! `push_all` makes the remote table mirror the local one exactly. The full
//! local content is pushed in bounded chunks, stale remote rows (present
//! remotely, absent locally) are deleted, and the result is verified by
//! re-listing. Upserts always finish before the first delete is issued, so
//! an interrupted run can only leave extra rows behind, never lose data.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::task::JoinSet;

use crate::engine::ReconcileEngine;
use crate::error::{Error, Result};
use crate::models::{EntityKind, RecordId};
use crate::remote::{RemoteError, RemoteResult};
use crate::retry::retry_with_backoff;

/// Outcome of one `push_all` run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushReport {
    pub kind: EntityKind,
    /// Records upserted remotely
    pub pushed: usize,
    /// Stale remote rows removed
    pub deleted: usize,
    /// Records flagged pending after a chunk exhausted its retries
    pub flagged_pending: usize,
    /// True when a cancel stopped the run between chunks
    pub cancelled: bool,
}

/// Drives whole-table convergence on top of the engine
#[derive(Clone)]
pub struct SyncCoordinator {
    engine: Arc<ReconcileEngine>,
}

impl SyncCoordinator {
    #[must_use]
    pub fn new(engine: Arc<ReconcileEngine>) -> Self {
        Self { engine }
    }

    /// Push the owner's full local set for `kind` and delete stale remote
    /// rows, then verify the remote id set matches the local one.
    ///
    /// Chunks that exhaust their retries flag their records `pending_sync`
    /// and the divergence surfaces in the final verification. Committed
    /// chunks stay committed even when the run is cancelled midway.
    pub async fn push_all(&self, kind: EntityKind) -> Result<PushReport> {
        let engine = &self.engine;
        let records = engine.store().list(kind, engine.owner())?;
        let local_ids: HashSet<RecordId> = records.iter().map(|record| record.id).collect();

        let remote_ids = engine.fetch_remote_ids(kind).await.map_err(Error::from)?;
        let to_delete: Vec<RecordId> = remote_ids
            .into_iter()
            .filter(|id| !local_ids.contains(id))
            .collect();

        tracing::info!(
            "pushing {} local {kind} records, {} stale remote rows to delete",
            records.len(),
            to_delete.len()
        );

        let mut report = PushReport {
            kind,
            pushed: 0,
            deleted: 0,
            flagged_pending: 0,
            cancelled: false,
        };

        let chunk_size = engine.options().chunk_size.max(1);
        let retry = engine.options().retry;

        let mut tasks: JoinSet<(Vec<RecordId>, RemoteResult<()>)> = JoinSet::new();
        for chunk in records.chunks(chunk_size) {
            if engine.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let remote = engine.remote();
            let limiter = engine.limiter();
            let ids: Vec<RecordId> = chunk.iter().map(|record| record.id).collect();
            let rows = Arc::new(chunk.to_vec());

            tasks.spawn(async move {
                let Ok(_permit) = limiter.acquire_owned().await else {
                    return (
                        ids,
                        Err(RemoteError::Transient("concurrency limiter closed".to_string())),
                    );
                };
                let result = retry_with_backoff(&retry, "remote upsert", move || {
                    let remote = Arc::clone(&remote);
                    let rows = Arc::clone(&rows);
                    async move { remote.upsert(kind, &rows).await }
                })
                .await;
                (ids, result)
            });
        }

        // Drain every spawned chunk before deciding anything; a chunk that
        // reached the remote is committed regardless of what happens next.
        let mut fatal: Option<Error> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((ids, Ok(()))) => report.pushed += ids.len(),
                Ok((ids, Err(error))) if error.is_transient() => {
                    tracing::warn!(
                        "chunk of {} {kind} records failed after retries: {error}",
                        ids.len()
                    );
                    for id in &ids {
                        engine.store().mark_pending(kind, *id)?;
                    }
                    report.flagged_pending += ids.len();
                }
                Ok((_, Err(error))) => {
                    if fatal.is_none() {
                        fatal = Some(Error::from(error));
                    }
                }
                Err(error) => {
                    if fatal.is_none() {
                        fatal = Some(Error::Worker(error.to_string()));
                    }
                }
            }
        }
        if let Some(error) = fatal {
            return Err(error);
        }
        if report.cancelled {
            tracing::info!("push of {kind} cancelled; {} records pushed", report.pushed);
            return Ok(report);
        }

        // Deletes strictly after every upsert has settled
        for chunk in to_delete.chunks(chunk_size) {
            if engine.is_cancelled() {
                report.cancelled = true;
                return Ok(report);
            }
            match engine.delete_remote_ids(kind, chunk).await {
                Ok(()) => report.deleted += chunk.len(),
                Err(RemoteError::Transient(message)) => {
                    // the extra rows will show up in the verification below
                    tracing::warn!(
                        "stale-row delete of {} {kind} ids failed: {message}",
                        chunk.len()
                    );
                }
                Err(error) => return Err(Error::from(error)),
            }
        }

        // Postcondition: the remote id set mirrors the local one
        let after: HashSet<RecordId> = engine
            .fetch_remote_ids(kind)
            .await
            .map_err(Error::from)?
            .into_iter()
            .collect();
        let missing = local_ids.difference(&after).count();
        let extra = after.difference(&local_ids).count();

        if missing == 0 && extra == 0 {
            engine.store().clear_pending_for_kind(kind, engine.owner())?;
            tracing::info!(
                "{kind} converged: {} records pushed, {} stale rows removed",
                report.pushed,
                report.deleted
            );
            Ok(report)
        } else {
            tracing::warn!("{kind} diverged after push: {missing} missing, {extra} extra");
            Err(Error::SyncDiverged {
                kind,
                missing,
                extra,
            })
        }
    }

    /// Push every entity kind in a fixed order, stopping at the first
    /// failure or cancel. Returns the reports of the runs that completed.
    pub async fn push_everything(&self) -> Result<Vec<PushReport>> {
        let mut reports = Vec::with_capacity(EntityKind::ALL.len());
        for kind in EntityKind::ALL {
            if self.engine.is_cancelled() {
                break;
            }
            let report = self.push_all(kind).await?;
            let cancelled = report.cancelled;
            reports.push(report);
            if cancelled {
                break;
            }
        }
        Ok(reports)
    }
}
