//! Sync conflict model

use serde::{Deserialize, Serialize};

use super::record::EntityKind;

/// A write conflict resolved by strategy (currently always last-write-wins)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Conflict log row id
    pub id: i64,
    /// Entity kind of the record involved
    pub kind: EntityKind,
    /// Record involved in the conflict
    pub record_id: String,
    /// Timestamp of the stored row that won
    pub local_updated_at: i64,
    /// Timestamp of the incoming row that lost
    pub incoming_updated_at: i64,
    /// When the conflict was resolved (Unix milliseconds)
    pub resolved_at: i64,
    /// Resolution strategy name
    pub strategy: String,
}
