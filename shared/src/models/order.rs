//! Order aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation failure for an incoming order payload
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("order_uid is required")]
    MissingOrderUid,
}

/// Order aggregate root, keyed by `order_uid`
///
/// Ingest decoding is tolerant: absent fields fall back to their defaults and
/// unknown fields are ignored, matching what upstream producers actually send.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Order {
    pub order_uid: String,
    pub track_number: String,
    pub entry: String,
    pub delivery: Delivery,
    pub payment: Payment,
    pub items: Vec<Item>,
    pub locale: String,
    pub internal_signature: String,
    pub customer_id: String,
    pub delivery_service: String,
    #[serde(rename = "shardkey")]
    pub shard_key: String,
    pub sm_id: i32,
    pub date_created: Option<DateTime<Utc>>,
    pub oof_shard: String,
}

impl Order {
    /// Check the invariants a payload must satisfy before it is accepted
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.order_uid.is_empty() {
            return Err(ValidationError::MissingOrderUid);
        }
        Ok(())
    }
}

/// Delivery details, 1:1 with the order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Delivery {
    pub name: String,
    pub phone: String,
    pub zip: String,
    pub city: String,
    pub address: String,
    pub region: String,
    pub email: String,
}

/// Payment details, 1:1 with the order; `transaction` is globally unique
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Payment {
    pub transaction: String,
    pub request_id: String,
    pub currency: String,
    pub provider: String,
    pub amount: i64,
    pub payment_dt: i64,
    pub bank: String,
    pub delivery_cost: i64,
    pub goods_total: i64,
    pub custom_fee: i64,
}

/// A single order line, 1:N with the order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Item {
    pub chrt_id: i64,
    pub track_number: String,
    pub price: i64,
    pub rid: String,
    pub name: String,
    pub sale: i64,
    pub size: String,
    pub total_price: i64,
    pub nm_id: i64,
    pub brand: String,
    pub status: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_tolerates_unknown_and_missing_fields() {
        let json = r#"{
            "order_uid": "b563feb7b2b84b6test",
            "track_number": "WBILMTESTTRACK",
            "shardkey": "9",
            "something_new": {"nested": true}
        }"#;
        let order: Order = serde_json::from_str(json).expect("tolerant decode");
        assert_eq!(order.order_uid, "b563feb7b2b84b6test");
        assert_eq!(order.shard_key, "9");
        assert!(order.items.is_empty());
        assert_eq!(order.payment, Payment::default());
    }

    #[test]
    fn validate_rejects_empty_order_uid() {
        let order = Order::default();
        assert_eq!(order.validate(), Err(ValidationError::MissingOrderUid));

        let order = Order {
            order_uid: "a".into(),
            ..Order::default()
        };
        assert!(order.validate().is_ok());
    }

    #[test]
    fn shardkey_round_trips_under_its_wire_name() {
        let order = Order {
            order_uid: "x".into(),
            shard_key: "7".into(),
            ..Order::default()
        };
        let json = serde_json::to_string(&order).unwrap();
        assert!(json.contains("\"shardkey\":\"7\""));
        assert!(!json.contains("shard_key"));
    }
}
