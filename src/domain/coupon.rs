use super::money::checked_mul;
use crate::error::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A referral code. `reward` goes to the owner, `cashback` to the buyer, both
/// as fractions of the purchased amount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coupon {
    pub code: String,
    pub owner: String,
    pub reward: Decimal,
    pub cashback: Decimal,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Coupon {
    pub fn new(
        code: &str,
        owner: impl Into<String>,
        reward: Decimal,
        cashback: Decimal,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            code: normalize_code(code),
            owner: owner.into(),
            reward,
            cashback,
            created_at: now,
            deleted_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn reward_for(&self, purchased: Decimal) -> Result<Decimal> {
        checked_mul(purchased, self.reward)
    }

    pub fn cashback_for(&self, purchased: Decimal) -> Result<Decimal> {
        checked_mul(purchased, self.cashback)
    }
}

/// Codes are stored and compared upper-cased.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_coupon_payouts() {
        let coupon = Coupon::new("spring24", "owner", dec!(0.08), dec!(0.02), Utc::now());
        assert_eq!(coupon.code, "SPRING24");
        assert_eq!(coupon.reward_for(dec!(1000)).unwrap(), dec!(80));
        assert_eq!(coupon.cashback_for(dec!(1000)).unwrap(), dec!(20));
        assert!(coupon.reward_for(Decimal::MAX).is_err());
    }
}
