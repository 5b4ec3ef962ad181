use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Units of the quote symbol per one sale token, e.g. `USD_IND = 0.022`.
///
/// Rows are never edited: an update expires the live row and inserts a new
/// one, so the full rate history is kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyRate {
    pub symbol: String,
    pub rate: Decimal,
    pub created_at: DateTime<Utc>,
    pub expired_at: Option<DateTime<Utc>>,
}

impl CurrencyRate {
    pub fn new(symbol: impl Into<String>, rate: Decimal, now: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            rate,
            created_at: now,
            expired_at: None,
        }
    }

    pub fn is_live(&self) -> bool {
        self.expired_at.is_none()
    }
}

/// Rate key for paying in `symbol` for `token`.
pub fn pair_symbol(symbol: &str, token: &str) -> String {
    format!("{}_{}", symbol.trim().to_ascii_uppercase(), token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_symbol() {
        assert_eq!(pair_symbol("usd", "IND"), "USD_IND");
        assert_eq!(pair_symbol(" VND ", "IND"), "VND_IND");
    }
}
