//! Core record model shared by the local cache and the remote store

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::Error;
use crate::util::unix_timestamp_ms;

use super::payload::Payload;

/// A unique identifier for a syncable record (client-minted UUID v4)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Mint a new random record id
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the id as a string
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// The account a record belongs to. Every remote operation is scoped by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(String);

impl OwnerId {
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into().trim().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The four syncable entity kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Transaction,
    Asset,
    Liability,
    Category,
}

impl EntityKind {
    /// Every syncable kind, in push order
    pub const ALL: [Self; 4] = [
        Self::Transaction,
        Self::Asset,
        Self::Liability,
        Self::Category,
    ];

    /// Tables covered by a bulk account wipe. Categories are shared
    /// vocabulary and are never wiped.
    pub const WIPE_ORDER: [Self; 3] = [Self::Transaction, Self::Asset, Self::Liability];

    /// Canonical singular name (the `kind` column value)
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transaction => "transaction",
            Self::Asset => "asset",
            Self::Liability => "liability",
            Self::Category => "category",
        }
    }

    /// Remote table name
    #[must_use]
    pub const fn table(self) -> &'static str {
        match self {
            Self::Transaction => "transactions",
            Self::Asset => "assets",
            Self::Liability => "liabilities",
            Self::Category => "categories",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "transaction" | "transactions" | "tx" => Ok(Self::Transaction),
            "asset" | "assets" => Ok(Self::Asset),
            "liability" | "liabilities" => Ok(Self::Liability),
            "category" | "categories" => Ok(Self::Category),
            other => Err(Error::InvalidInput(format!("unknown entity kind '{other}'"))),
        }
    }
}

/// A record that lives in both the local cache and the remote store
#[derive(Debug, Clone, PartialEq)]
pub struct SyncableRecord {
    /// Unique identifier, immutable once assigned
    pub id: RecordId,
    /// Owning account
    pub owner_id: OwnerId,
    /// Entity-specific fields
    pub payload: Payload,
    /// Writer timestamp in Unix milliseconds, never moves backwards
    pub updated_at: i64,
    /// True only while a delete is in flight; never persisted
    pub tombstoned: bool,
}

impl SyncableRecord {
    /// Create a record with a freshly minted id
    #[must_use]
    pub fn new(owner_id: OwnerId, payload: Payload) -> Self {
        Self::with_id(RecordId::new(), owner_id, payload)
    }

    /// Create a record with a pre-validated id
    #[must_use]
    pub fn with_id(id: RecordId, owner_id: OwnerId, payload: Payload) -> Self {
        Self {
            id,
            owner_id,
            payload,
            updated_at: unix_timestamp_ms(),
            tombstoned: false,
        }
    }

    /// The entity kind, read off the payload
    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        self.payload.kind()
    }

    /// Bump `updated_at` to now without ever moving it backwards
    pub fn touch(&mut self) {
        self.updated_at = unix_timestamp_ms().max(self.updated_at);
    }

    /// Flat JSON row for the remote store: the payload fields plus `id`,
    /// `owner_id`, and `updated_at`. The tombstone flag is never included.
    pub fn to_row(&self) -> serde_json::Result<Value> {
        let mut row = self.payload.to_map()?;
        row.insert("id".to_string(), Value::String(self.id.as_str()));
        row.insert(
            "owner_id".to_string(),
            Value::String(self.owner_id.as_str().to_string()),
        );
        row.insert("updated_at".to_string(), Value::Number(self.updated_at.into()));
        Ok(Value::Object(row))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::models::payload::{AssetPayload, FlowKind, TransactionPayload};

    use super::*;

    fn sample_payload() -> Payload {
        Payload::Transaction(TransactionPayload {
            amount: 42.5,
            flow: FlowKind::Expense,
            description: "Groceries".to_string(),
            category: Some("food".to_string()),
        })
    }

    #[test]
    fn record_id_roundtrips_through_string() {
        let id = RecordId::new();
        let parsed: RecordId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn record_id_rejects_garbage() {
        assert!("not-a-uuid".parse::<RecordId>().is_err());
    }

    #[test]
    fn owner_id_trims_input() {
        assert_eq!(OwnerId::new("  alice  ").as_str(), "alice");
        assert!(OwnerId::new("   ").is_empty());
    }

    #[test]
    fn entity_kind_parses_aliases() {
        assert_eq!("tx".parse::<EntityKind>().unwrap(), EntityKind::Transaction);
        assert_eq!(
            "Liabilities".parse::<EntityKind>().unwrap(),
            EntityKind::Liability
        );
        assert_eq!(
            "category".parse::<EntityKind>().unwrap(),
            EntityKind::Category
        );
        assert!("budget".parse::<EntityKind>().is_err());
    }

    #[test]
    fn entity_kind_tables_are_plural() {
        assert_eq!(EntityKind::Transaction.table(), "transactions");
        assert_eq!(EntityKind::Liability.table(), "liabilities");
    }

    #[test]
    fn wipe_order_excludes_categories() {
        assert!(!EntityKind::WIPE_ORDER.contains(&EntityKind::Category));
        assert_eq!(EntityKind::WIPE_ORDER.len(), 3);
    }

    #[test]
    fn new_record_carries_fresh_timestamp() {
        let record = SyncableRecord::new(OwnerId::new("alice"), sample_payload());
        assert!(record.updated_at > 0);
        assert!(!record.tombstoned);
        assert_eq!(record.kind(), EntityKind::Transaction);
    }

    #[test]
    fn touch_never_moves_backwards() {
        let mut record = SyncableRecord::new(OwnerId::new("alice"), sample_payload());
        record.updated_at = i64::MAX - 1;
        record.touch();
        assert_eq!(record.updated_at, i64::MAX - 1);
    }

    #[test]
    fn to_row_flattens_payload_and_omits_tombstone() {
        let mut record = SyncableRecord::new(OwnerId::new("alice"), sample_payload());
        record.tombstoned = true;
        let row = record.to_row().unwrap();
        let object = row.as_object().unwrap();
        assert_eq!(object["id"], Value::String(record.id.as_str()));
        assert_eq!(object["owner_id"], Value::String("alice".to_string()));
        assert_eq!(object["type"], Value::String("expense".to_string()));
        assert_eq!(object["description"], Value::String("Groceries".to_string()));
        assert!(!object.contains_key("tombstoned"));
        assert!(!object.contains_key("payload"));
    }

    #[test]
    fn to_row_includes_asset_fields() {
        let record = SyncableRecord::new(
            OwnerId::new("alice"),
            Payload::Asset(AssetPayload {
                name: "Savings".to_string(),
                value: 1200.0,
            }),
        );
        let row = record.to_row().unwrap();
        assert_eq!(row["name"], Value::String("Savings".to_string()));
    }
}
