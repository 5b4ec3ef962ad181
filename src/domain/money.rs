use crate::error::SaleError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};
use std::str::FromStr;

/// A wallet balance. Never negative once persisted; the stores enforce this
/// with conditional decrements.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct Balance(pub Decimal);

/// A strictly positive amount moved by an operation.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, SaleError> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(SaleError::ValidationError(
                "Amount must be positive".to_string(),
            ))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl FromStr for Amount {
    type Err = SaleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = Decimal::from_str(s.trim())
            .map_err(|e| SaleError::ValidationError(format!("invalid amount {s:?}: {e}")))?;
        Self::new(value)
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = SaleError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl From<Amount> for Balance {
    fn from(amount: Amount) -> Self {
        Self(amount.0)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

/// `lhs * rhs`, refused instead of overflowing.
pub fn checked_mul(lhs: Decimal, rhs: Decimal) -> Result<Decimal, SaleError> {
    lhs.checked_mul(rhs).ok_or_else(|| out_of_range(lhs, "*", rhs))
}

/// `lhs / rhs`, refused instead of overflowing or dividing by zero.
pub fn checked_div(lhs: Decimal, rhs: Decimal) -> Result<Decimal, SaleError> {
    lhs.checked_div(rhs).ok_or_else(|| out_of_range(lhs, "/", rhs))
}

fn out_of_range(lhs: Decimal, op: &str, rhs: Decimal) -> SaleError {
    SaleError::ValidationError(format!("amount out of range: {lhs} {op} {rhs}"))
}

impl Balance {
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// `None` when the sum does not fit.
    pub fn checked_add(&self, amount: Amount) -> Option<Self> {
        self.0.checked_add(amount.value()).map(Self)
    }

    pub fn new(amount: Decimal) -> Self {
        Self(amount)
    }

    pub fn covers(&self, amount: Amount) -> bool {
        self.0 >= amount.value()
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

impl Add for Balance {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Balance {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl AddAssign for Balance {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Balance {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_balance_arithmetic() {
        let b1 = Balance::new(dec!(10.0));
        let b2 = Balance::new(dec!(5.0));
        assert_eq!(b1 + b2, Balance::new(dec!(15.0)));
        assert_eq!(b1 - b2, Balance::new(dec!(5.0)));
    }

    #[test]
    fn test_amount_validation() {
        assert!(Amount::new(dec!(1.0)).is_ok());
        assert!(matches!(
            Amount::new(dec!(0.0)),
            Err(SaleError::ValidationError(_))
        ));
        assert!(matches!(
            Amount::new(dec!(-1.0)),
            Err(SaleError::ValidationError(_))
        ));
    }

    #[test]
    fn test_amount_parse() {
        let amount: Amount = " 12.50 ".parse().unwrap();
        assert_eq!(amount.value(), dec!(12.5));
        assert_eq!(amount.to_string(), "12.5");
        assert!("abc".parse::<Amount>().is_err());
        assert!("0".parse::<Amount>().is_err());
    }

    #[test]
    fn test_checked_arithmetic_refuses_overflow() {
        assert_eq!(checked_div(dec!(1), dec!(0.02)).unwrap(), dec!(50));
        assert!(matches!(
            checked_div(Decimal::MAX, dec!(0.02)),
            Err(SaleError::ValidationError(_))
        ));
        assert!(checked_div(dec!(1), Decimal::ZERO).is_err());
        assert!(checked_mul(Decimal::MAX, dec!(2)).is_err());

        let full = Balance::new(Decimal::MAX);
        assert!(full.checked_add(Amount::new(dec!(1)).unwrap()).is_none());
        assert_eq!(
            Balance::new(dec!(1)).checked_add(Amount::new(dec!(2)).unwrap()),
            Some(Balance::new(dec!(3)))
        );
    }

    #[test]
    fn test_balance_covers() {
        let balance = Balance::new(dec!(10));
        assert!(balance.covers(Amount::new(dec!(10)).unwrap()));
        assert!(!balance.covers(Amount::new(dec!(10.0001)).unwrap()));
    }
}
