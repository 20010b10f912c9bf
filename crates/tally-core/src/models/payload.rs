//! Entity payloads for the four record kinds

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::record::EntityKind;

/// Direction of money movement, shared by transactions and categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowKind {
    Income,
    Expense,
}

impl FlowKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Income => "income",
            Self::Expense => "expense",
        }
    }
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single money movement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionPayload {
    pub amount: f64,
    #[serde(rename = "type")]
    pub flow: FlowKind,
    pub description: String,
    /// Category referenced by name; never a foreign key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

/// Something owned, with a current value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetPayload {
    pub name: String,
    pub value: f64,
}

/// Something owed, with an outstanding balance and interest rate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiabilityPayload {
    pub name: String,
    pub balance: f64,
    pub rate: f64,
}

/// User-defined label for classifying transactions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryPayload {
    pub name: String,
    pub color: String,
    #[serde(rename = "kind")]
    pub flow: FlowKind,
}

/// Kind-discriminated record payload
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Transaction(TransactionPayload),
    Asset(AssetPayload),
    Liability(LiabilityPayload),
    Category(CategoryPayload),
}

impl Payload {
    /// The entity kind this payload belongs to
    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::Transaction(_) => EntityKind::Transaction,
            Self::Asset(_) => EntityKind::Asset,
            Self::Liability(_) => EntityKind::Liability,
            Self::Category(_) => EntityKind::Category,
        }
    }

    /// Serialize to a flat JSON object (the storage and wire shape)
    pub fn to_map(&self) -> serde_json::Result<Map<String, Value>> {
        let value = match self {
            Self::Transaction(payload) => serde_json::to_value(payload)?,
            Self::Asset(payload) => serde_json::to_value(payload)?,
            Self::Liability(payload) => serde_json::to_value(payload)?,
            Self::Category(payload) => serde_json::to_value(payload)?,
        };
        serde_json::from_value(value)
    }

    /// Deserialize the payload fields for a known kind
    pub fn from_value(kind: EntityKind, value: Value) -> serde_json::Result<Self> {
        Ok(match kind {
            EntityKind::Transaction => Self::Transaction(serde_json::from_value(value)?),
            EntityKind::Asset => Self::Asset(serde_json::from_value(value)?),
            EntityKind::Liability => Self::Liability(serde_json::from_value(value)?),
            EntityKind::Category => Self::Category(serde_json::from_value(value)?),
        })
    }

    /// Deserialize from raw JSON text for a known kind
    pub fn from_json(kind: EntityKind, raw: &str) -> serde_json::Result<Self> {
        Self::from_value(kind, serde_json::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn transaction_serializes_flow_as_type() {
        let payload = Payload::Transaction(TransactionPayload {
            amount: 9.99,
            flow: FlowKind::Income,
            description: "Refund".to_string(),
            category: None,
        });
        let map = payload.to_map().unwrap();
        assert_eq!(map["type"], json!("income"));
        assert!(!map.contains_key("category"));
    }

    #[test]
    fn category_serializes_flow_as_kind() {
        let payload = Payload::Category(CategoryPayload {
            name: "Rent".to_string(),
            color: "#aa3355".to_string(),
            flow: FlowKind::Expense,
        });
        let map = payload.to_map().unwrap();
        assert_eq!(map["kind"], json!("expense"));
        assert_eq!(map["color"], json!("#aa3355"));
    }

    #[test]
    fn from_json_roundtrips_each_kind() {
        let cases = [
            (
                EntityKind::Transaction,
                json!({"amount": 12.5, "type": "expense", "description": "Bus", "category": "travel"}),
            ),
            (EntityKind::Asset, json!({"name": "Car", "value": 8000.0})),
            (
                EntityKind::Liability,
                json!({"name": "Mortgage", "balance": 150_000.0, "rate": 3.2}),
            ),
            (
                EntityKind::Category,
                json!({"name": "Travel", "color": "#00ff00", "kind": "expense"}),
            ),
        ];

        for (kind, value) in cases {
            let payload = Payload::from_value(kind, value.clone()).unwrap();
            assert_eq!(payload.kind(), kind);
            let map = payload.to_map().unwrap();
            assert_eq!(Value::Object(map), value);
        }
    }

    #[test]
    fn from_json_rejects_mismatched_shape() {
        let raw = r#"{"amount": 1.0, "type": "expense", "description": "Bus"}"#;
        assert!(Payload::from_json(EntityKind::Asset, raw).is_err());
    }

    #[test]
    fn from_json_ignores_row_envelope_fields() {
        let raw = r#"{"name": "Cash", "value": 50.0, "id": "x", "owner_id": "y", "updated_at": 3}"#;
        let payload = Payload::from_json(EntityKind::Asset, raw).unwrap();
        assert_eq!(payload.kind(), EntityKind::Asset);
    }
}
