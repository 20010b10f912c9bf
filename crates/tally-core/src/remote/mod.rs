//! Remote record store seam
//!
//! The engine and coordinator reach the cloud only through [`RecordStore`]:
//! four owner-scoped operations, nothing else. Failures are classified at
//! this boundary so retry decisions stay uniform upstream.

mod http;
mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{EntityKind, OwnerId, RecordId, SyncableRecord};

pub use http::HttpRecordStore;
pub use memory::{MemoryRecordStore, RemoteCall};

/// Remote failure classes. Only `Transient` is ever retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// Network blips, timeouts, and server-side hiccups; safe to retry
    #[error("Transient remote failure: {0}")]
    Transient(String),

    /// Row-level security rejected the owner scope; retrying cannot help
    #[error("Ownership violation: {0}")]
    Ownership(String),

    /// The remote rejected the request shape
    #[error("Remote rejected request: {0}")]
    Schema(String),
}

impl RemoteError {
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// A cloud table store with primary-key upsert and delete-by-filter.
///
/// Every operation is scoped to one owner's rows; the id doubles as the
/// idempotency token, so resending an upsert is always safe.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert or replace records keyed by primary id
    async fn upsert(&self, kind: EntityKind, records: &[SyncableRecord]) -> RemoteResult<()>;

    /// Delete the given ids within the owner's scope
    async fn delete_by_ids(
        &self,
        kind: EntityKind,
        owner: &OwnerId,
        ids: &[RecordId],
    ) -> RemoteResult<()>;

    /// Delete every row the owner has in the table
    async fn delete_all(&self, kind: EntityKind, owner: &OwnerId) -> RemoteResult<()>;

    /// List the ids the owner currently has in the table
    async fn list_ids(&self, kind: EntityKind, owner: &OwnerId) -> RemoteResult<Vec<RecordId>>;
}
