use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A member of the venue. Name and contact are denormalised copies taken
/// from whichever listing produced the entity and are never compared across
/// sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub name: String,
    pub contact: String,
}

/// One membership-card balance at fetch time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub card_id: String,
    pub entity_id: String,
    pub card_kind: String,
    pub card_name: String,
    pub value: Decimal,
    /// Lifetime purchase total as reported by the balance listing. Known to be
    /// unreliable; kept for display only and never used in the equations.
    pub reported_purchase_total: Decimal,
    pub holder_name: String,
    pub holder_contact: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    FirstPurchase,
    Renewal,
    Other,
}

impl From<&str> for OrderKind {
    fn from(code: &str) -> Self {
        match code.trim() {
            "1" => OrderKind::FirstPurchase,
            "2" => OrderKind::Renewal,
            _ => OrderKind::Other,
        }
    }
}

/// One top-up or renewal event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: String,
    pub entity_id: String,
    pub amount: Decimal,
    pub timestamp: Option<NaiveDateTime>,
    pub raw_timestamp: String,
    pub order_ref: String,
    pub order_kind: OrderKind,
    pub card_name: String,
    pub note: String,
}

/// One raw operational log row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub entity_id: String,
    pub card_id: String,
    pub kind_code: String,
    pub narrative: String,
    pub declared_amount: Option<Decimal>,
    pub timestamp: Option<NaiveDateTime>,
    pub raw_timestamp: String,
    pub operator: String,
}

/// One card product line of the store-wide turnover summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnoverLine {
    pub card_id: String,
    pub card_name: String,
    pub sales_count: u64,
    pub sales_amount: Decimal,
    pub renewal_count: u64,
    pub renewal_amount: Decimal,
}

impl TurnoverLine {
    pub fn total(&self) -> Decimal {
        self.sales_amount + self.renewal_amount
    }
}
