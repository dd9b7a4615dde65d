//! Row shapes returned by the platform's listing endpoints.
//!
//! Field names are the platform's own and undocumented. Every field is
//! optional on the wire and values flip between JSON strings and numbers
//! across endpoints, so all of them go through the lenient helpers below.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::str::FromStr;

use crate::{
    models::{BalanceSnapshot, LedgerEntry, OrderKind, PaymentRecord, TurnoverLine},
    utils::parse_platform_timestamp,
};

fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.trim().to_string(),
        Some(other) => other.to_string(),
    })
}

fn lenient_decimal<'de, D>(deserializer: D) -> std::result::Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Value>::deserialize(deserializer)?.and_then(|v| value_to_decimal(&v)))
}

fn lenient_count<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

/// Decimal from a JSON string or number. Blank strings and unparseable
/// values yield `None`; numbers go through their textual form so `87.5`
/// stays exactly `87.5`.
pub fn value_to_decimal(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    if text.is_empty() {
        return None;
    }
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CardRow {
    #[serde(rename = "ID", default, deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(rename = "vid", default, deserialize_with = "lenient_string")]
    pub member_id: String,
    #[serde(rename = "MembersID", default, deserialize_with = "lenient_string")]
    pub alt_member_id: String,
    #[serde(rename = "Name", default, deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(rename = "Phone", default, deserialize_with = "lenient_string")]
    pub phone: String,
    #[serde(rename = "CardName", default, deserialize_with = "lenient_string")]
    pub card_name: String,
    #[serde(rename = "CardType", default, deserialize_with = "lenient_string")]
    pub card_type: String,
    #[serde(rename = "Amount", default, deserialize_with = "lenient_decimal")]
    pub amount: Option<Decimal>,
    #[serde(rename = "PurchaseAmount", default, deserialize_with = "lenient_decimal")]
    pub purchase_amount: Option<Decimal>,
}

impl CardRow {
    /// Whether the card belongs to `entity_id` under either id column.
    pub fn belongs_to(&self, entity_id: &str) -> bool {
        self.member_id == entity_id || self.alt_member_id == entity_id
    }

    /// Cards without an owning member id cannot be attributed and are dropped.
    pub fn into_snapshot(self) -> Option<BalanceSnapshot> {
        let entity_id = if !self.member_id.is_empty() {
            self.member_id
        } else if !self.alt_member_id.is_empty() {
            self.alt_member_id
        } else {
            return None;
        };
        Some(BalanceSnapshot {
            card_id: self.id,
            entity_id,
            card_kind: self.card_type,
            card_name: self.card_name,
            value: self.amount.unwrap_or_default(),
            reported_purchase_total: self.purchase_amount.unwrap_or_default(),
            holder_name: self.name,
            holder_contact: self.phone,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentRow {
    #[serde(rename = "ID", default, deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(rename = "Amount", default, deserialize_with = "lenient_decimal")]
    pub amount: Option<Decimal>,
    #[serde(rename = "OrderType", default, deserialize_with = "lenient_string")]
    pub order_type: String,
    #[serde(rename = "OrderCode", default, deserialize_with = "lenient_string")]
    pub order_code: String,
    #[serde(rename = "CreateTime", default, deserialize_with = "lenient_string")]
    pub create_time: String,
    #[serde(rename = "GMtime", default, deserialize_with = "lenient_string")]
    pub purchase_time: String,
    #[serde(rename = "Note", default, deserialize_with = "lenient_string")]
    pub note: String,
    #[serde(rename = "MembersvipID", default, deserialize_with = "lenient_string")]
    pub member_id: String,
    #[serde(rename = "CardName", default, deserialize_with = "lenient_string")]
    pub card_name: String,
}

impl PaymentRow {
    pub fn into_record(self, entity_id: &str) -> PaymentRecord {
        let raw_timestamp = if self.create_time.is_empty() {
            self.purchase_time
        } else {
            self.create_time
        };
        PaymentRecord {
            id: self.id,
            entity_id: if self.member_id.is_empty() {
                entity_id.to_string()
            } else {
                self.member_id
            },
            amount: self.amount.unwrap_or_default(),
            timestamp: parse_platform_timestamp(&raw_timestamp),
            raw_timestamp,
            order_ref: self.order_code,
            order_kind: OrderKind::from(self.order_type.as_str()),
            card_name: self.card_name,
            note: self.note,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerRow {
    #[serde(rename = "HypeID", default, deserialize_with = "lenient_string")]
    pub hype_id: String,
    #[serde(rename = "ID", default, deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(rename = "Hypetype", default, deserialize_with = "lenient_string")]
    pub kind_code: String,
    #[serde(rename = "Hypeinfo", default, deserialize_with = "lenient_string")]
    pub info: String,
    #[serde(rename = "PayAmount", default, deserialize_with = "lenient_decimal")]
    pub pay_amount: Option<Decimal>,
    #[serde(rename = "addTime", default, deserialize_with = "lenient_string")]
    pub add_time: String,
    #[serde(rename = "MembersID", default, deserialize_with = "lenient_string")]
    pub card_id: String,
    #[serde(rename = "MembersvipID", default, deserialize_with = "lenient_string")]
    pub member_id: String,
    #[serde(rename = "HypeName", default, deserialize_with = "lenient_string")]
    pub operator: String,
}

impl LedgerRow {
    pub fn into_entry(self, entity_id: &str, card_id: &str) -> LedgerEntry {
        let id = if self.hype_id.is_empty() { self.id } else { self.hype_id };
        LedgerEntry {
            id,
            entity_id: if self.member_id.is_empty() {
                entity_id.to_string()
            } else {
                self.member_id
            },
            card_id: if self.card_id.is_empty() {
                card_id.to_string()
            } else {
                self.card_id
            },
            kind_code: self.kind_code,
            narrative: self.info,
            declared_amount: self.pay_amount,
            timestamp: parse_platform_timestamp(&self.add_time),
            raw_timestamp: self.add_time,
            operator: self.operator,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TurnoverRow {
    #[serde(rename = "CradID", default, deserialize_with = "lenient_string")]
    pub card_id: String,
    #[serde(rename = "CradName", default, deserialize_with = "lenient_string")]
    pub card_name: String,
    #[serde(rename = "allCountsk", default, deserialize_with = "lenient_count")]
    pub sales_count: u64,
    #[serde(rename = "allAmountsk", default, deserialize_with = "lenient_decimal")]
    pub sales_amount: Option<Decimal>,
    #[serde(rename = "allCountxf", default, deserialize_with = "lenient_count")]
    pub renewal_count: u64,
    #[serde(rename = "allAmountxf", default, deserialize_with = "lenient_decimal")]
    pub renewal_amount: Option<Decimal>,
}

impl From<TurnoverRow> for TurnoverLine {
    fn from(row: TurnoverRow) -> Self {
        TurnoverLine {
            card_id: row.card_id,
            card_name: row.card_name,
            sales_count: row.sales_count,
            sales_amount: row.sales_amount.unwrap_or_default(),
            renewal_count: row.renewal_count,
            renewal_amount: row.renewal_amount.unwrap_or_default(),
        }
    }
}
