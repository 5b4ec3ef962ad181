use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A macro sale phase with its own price and supply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Round {
    pub round: u32,
    pub name: String,
    pub price: Decimal,
    pub total_tokens: Decimal,
    pub sub_round_count: u32,
    /// Display label, e.g. "100%".
    pub price_gap: String,
    /// Stamped once, when the last sub-round of the round closes.
    pub ended_at: Option<DateTime<Utc>>,
}

/// The smallest sellable capacity unit.
///
/// `bought <= total` always holds and `closed` only ever goes from `false`
/// to `true`. The sale sells the first open sub-round ordered by
/// `(round, sub_round)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubRound {
    pub id: Uuid,
    pub round: u32,
    pub sub_round: u32,
    pub price: Decimal,
    pub total: Decimal,
    pub bought: Decimal,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub closed: bool,
}

impl SubRound {
    pub fn new(round: u32, sub_round: u32, price: Decimal, total: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            round,
            sub_round,
            price,
            total,
            bought: Decimal::ZERO,
            start_at: None,
            end_at: None,
            closed: false,
        }
    }

    pub fn remaining(&self) -> Decimal {
        (self.total - self.bought).max(Decimal::ZERO)
    }

    pub fn position(&self) -> (u32, u32) {
        (self.round, self.sub_round)
    }

    /// True once the scheduled window is over. A sub-round without a window
    /// never expires on its own.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.end_at.is_some_and(|end| end <= now)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PurchaseCategory {
    Ico,
    Subscription,
    Other(String),
}

impl PurchaseCategory {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "" | "SUBSCRIPTION" => PurchaseCategory::Subscription,
            "ICO" => PurchaseCategory::Ico,
            other => PurchaseCategory::Other(other.to_string()),
        }
    }
}

impl fmt::Display for PurchaseCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PurchaseCategory::Ico => f.write_str("ICO"),
            PurchaseCategory::Subscription => f.write_str("SUBSCRIPTION"),
            PurchaseCategory::Other(s) => f.write_str(s),
        }
    }
}

/// One allocation slice of a purchase. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseHistory {
    pub round: u32,
    pub sub_round: u32,
    pub buyer: String,
    pub price: Decimal,
    pub tokens: Decimal,
    pub category: PurchaseCategory,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuyerRank {
    pub rank: usize,
    pub buyer: String,
    pub tokens: Decimal,
}
