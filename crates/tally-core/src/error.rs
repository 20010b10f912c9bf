//! Error types for tally-core

use thiserror::Error;

use crate::models::{EntityKind, RecordId};
use crate::remote::RemoteError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Local cache database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The caller's owner scope does not match the record. Never retried.
    #[error("Ownership violation: {0}")]
    OwnershipViolation(String),

    /// The remote accepted a delete but the row is still listed.
    #[error("Delete not confirmed: {kind} {id} is still listed remotely")]
    DeleteNotConfirmed { kind: EntityKind, id: RecordId },

    /// An account wipe left rows behind in some tables.
    #[error("Partial wipe: cleaned {clean:?}, still dirty {failed:?}")]
    PartialWipe {
        clean: Vec<EntityKind>,
        failed: Vec<EntityKind>,
    },

    /// Push postcondition failed: the remote id set differs from the local one.
    #[error("Sync diverged for {kind}: {missing} missing, {extra} extra after push")]
    SyncDiverged {
        kind: EntityKind,
        missing: usize,
        extra: usize,
    },

    /// Remote store failure that is not an ownership problem
    #[error("Remote store error: {0}")]
    Remote(RemoteError),

    /// A sync operation was requested but no remote store is configured
    #[error("No remote store configured")]
    RemoteNotConfigured,

    /// A bulk operation was cancelled between steps
    #[error("Operation cancelled")]
    Cancelled,

    /// A sync worker task failed to complete
    #[error("Sync worker failed: {0}")]
    Worker(String),
}

impl From<RemoteError> for Error {
    fn from(error: RemoteError) -> Self {
        match error {
            RemoteError::Ownership(message) => Self::OwnershipViolation(message),
            other => Self::Remote(other),
        }
    }
}
