//! tally-core - Core library for Tally
//!
//! Local-first record keeping with cloud reconciliation. The local store is
//! the synchronous source of truth; the engine and coordinator converge a
//! remote record store onto it with bounded retries, and a record is never
//! lost to a network failure.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod ident;
pub mod models;
pub mod remote;
pub mod retry;
pub mod services;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{EntityKind, OwnerId, Payload, RecordId, SyncableRecord};
pub use services::RecordService;
