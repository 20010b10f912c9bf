//! Data models for Tally

mod payload;
mod record;
mod sync_conflict;

pub use payload::{
    AssetPayload, CategoryPayload, FlowKind, LiabilityPayload, Payload, TransactionPayload,
};
pub use record::{EntityKind, OwnerId, RecordId, SyncableRecord};
pub use sync_conflict::SyncConflict;
