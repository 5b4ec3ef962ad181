use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Name stamped on entries produced by this service.
pub const SOURCE_SERVICE: &str = "wallet-service";

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Subscription,
    ChargeFee,
    ReferralReward,
    MarketingReward,
    Ico,
    IcoCommission,
    IcoCashback,
    Deposit,
    ReserveSweep,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionType::Subscription => "SUBSCRIPTION",
            TransactionType::ChargeFee => "CHARGE_FEE",
            TransactionType::ReferralReward => "REFERRAL_REWARD",
            TransactionType::MarketingReward => "MARKETING_REWARD",
            TransactionType::Ico => "ICO",
            TransactionType::IcoCommission => "ICO_COMMISSION",
            TransactionType::IcoCashback => "ICO_CASHBACK",
            TransactionType::Deposit => "DEPOSIT",
            TransactionType::ReserveSweep => "RESERVE_SWEEP",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionStatus {
    #[default]
    Completed,
}

/// One side of a ledger entry.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Leg {
    pub owner: String,
    pub symbol: String,
    pub amount: Decimal,
}

impl Leg {
    pub fn new(owner: impl Into<String>, symbol: impl Into<String>, amount: Decimal) -> Self {
        Self {
            owner: owner.into(),
            symbol: symbol.into(),
            amount,
        }
    }
}

/// Immutable double-sided record of a balance movement.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub r#type: TransactionType,
    pub source: Leg,
    pub destination: Leg,
    pub rate: Option<Decimal>,
    pub source_service: String,
    pub source_id: String,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn new(r#type: TransactionType, source: Leg, destination: Leg) -> Self {
        Self {
            id: Uuid::new_v4(),
            r#type,
            source,
            destination,
            rate: None,
            source_service: SOURCE_SERVICE.to_string(),
            source_id: String::new(),
            status: TransactionStatus::Completed,
            created_at: Utc::now(),
        }
    }

    /// Same owner, symbol and amount on both sides.
    pub fn transfer(
        r#type: TransactionType,
        from: impl Into<String>,
        to: impl Into<String>,
        symbol: &str,
        amount: Decimal,
    ) -> Self {
        Self::new(
            r#type,
            Leg::new(from, symbol, amount),
            Leg::new(to, symbol, amount),
        )
    }

    pub fn with_rate(mut self, rate: Decimal) -> Self {
        self.rate = Some(rate);
        self
    }

    pub fn with_source_id(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = source_id.into();
        self
    }

    pub fn involves(&self, owner: &str) -> bool {
        self.source.owner == owner || self.destination.owner == owner
    }
}

/// Outbound notification of a committed ledger entry.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct TransactionEvent {
    pub id: Uuid,
    pub user_id: String,
    pub amount: Decimal,
    pub symbol: String,
    #[serde(rename = "type")]
    pub r#type: TransactionType,
}
