use crate::error::{Result, SaleError};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Runtime settings of the sale. Every field has a default, so a config file
/// only needs the values it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaleConfig {
    /// Symbol of the token being sold.
    pub token_symbol: String,
    /// How long a sub-round stays open once started.
    pub sub_round_lifetime_minutes: i64,
    /// Fee percentage applied to stablecoin-denominated fees (0.125 = 0.125%).
    pub fee_percent: Decimal,
    pub ranking_max_page: usize,
    pub history_default_limit: usize,
    pub request_timeout_ms: u64,
    pub lock: LockConfig,
    pub scheduler: SchedulerConfig,
    pub genesis: GenesisConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub key: String,
    pub attempts: u32,
    pub retry_delay_ms: u64,
    pub lease_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_ms: u64,
    pub batch: usize,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

/// Tokenomics seeded into an empty store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenesisConfig {
    pub rounds: Vec<RoundSeed>,
    pub rates: Vec<RateSeed>,
    pub sale_wallet_balance: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundSeed {
    pub name: String,
    pub price: Decimal,
    pub total_tokens: Decimal,
    pub sub_rounds: u32,
    #[serde(default)]
    pub price_gap: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateSeed {
    pub symbol: String,
    pub rate: Decimal,
}

impl Default for SaleConfig {
    fn default() -> Self {
        Self {
            token_symbol: "IND".to_string(),
            sub_round_lifetime_minutes: 60,
            fee_percent: dec!(0.125),
            ranking_max_page: 50,
            history_default_limit: 20,
            request_timeout_ms: 30_000,
            lock: LockConfig::default(),
            scheduler: SchedulerConfig::default(),
            genesis: GenesisConfig::default(),
        }
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            key: "ico-sale".to_string(),
            attempts: 100,
            retry_delay_ms: 1_000,
            lease_ms: 8_000,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_ms: 1_000,
            batch: 16,
            max_retries: 1,
            retry_delay_ms: 5_000,
        }
    }
}

impl Default for GenesisConfig {
    fn default() -> Self {
        let rounds = [dec!(0.022), dec!(0.044), dec!(0.088)]
            .into_iter()
            .enumerate()
            .map(|(i, price)| RoundSeed {
                name: format!("Round {}", i + 1),
                price,
                total_tokens: dec!(30000000),
                sub_rounds: 100,
                price_gap: "100%".to_string(),
            })
            .collect();
        Self {
            rounds,
            rates: vec![
                RateSeed {
                    symbol: "VND".to_string(),
                    rate: dec!(550),
                },
                RateSeed {
                    symbol: "USD".to_string(),
                    rate: dec!(0.022),
                },
                RateSeed {
                    symbol: "USDT".to_string(),
                    rate: dec!(0.022),
                },
            ],
            sale_wallet_balance: dec!(90000000),
        }
    }
}

impl SaleConfig {
    /// Reads a JSON config file, or returns the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                serde_json::from_str::<SaleConfig>(&raw)?
            }
            None => SaleConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.token_symbol.trim().is_empty() {
            return Err(SaleError::ValidationError(
                "token_symbol must not be empty".to_string(),
            ));
        }
        if self.sub_round_lifetime_minutes <= 0 {
            return Err(SaleError::ValidationError(
                "sub_round_lifetime_minutes must be positive".to_string(),
            ));
        }
        if self.fee_percent < Decimal::ZERO {
            return Err(SaleError::ValidationError(
                "fee_percent must not be negative".to_string(),
            ));
        }
        if self.lock.attempts == 0 {
            return Err(SaleError::ValidationError(
                "lock.attempts must be at least 1".to_string(),
            ));
        }
        if self.ranking_max_page == 0 || self.history_default_limit == 0 {
            return Err(SaleError::ValidationError(
                "page sizes must be positive".to_string(),
            ));
        }
        for seed in &self.genesis.rounds {
            if seed.price <= Decimal::ZERO
                || seed.total_tokens <= Decimal::ZERO
                || seed.sub_rounds == 0
            {
                return Err(SaleError::ValidationError(format!(
                    "round seed {:?} needs a positive price, supply and sub-round count",
                    seed.name
                )));
            }
        }
        Ok(())
    }

    pub fn fee_fraction(&self) -> Decimal {
        self.fee_percent / dec!(100)
    }

    pub fn sub_round_lifetime(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.sub_round_lifetime_minutes)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = SaleConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.fee_fraction(), dec!(0.00125));
        assert_eq!(config.genesis.rounds.len(), 3);
        assert_eq!(config.genesis.rounds[1].price, dec!(0.044));
    }

    #[test]
    fn test_partial_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{ "token_symbol": "ABC", "lock": {{ "attempts": 3 }} }}"#
        )
        .unwrap();

        let config = SaleConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.token_symbol, "ABC");
        assert_eq!(config.lock.attempts, 3);
        assert_eq!(config.lock.key, "ico-sale");
        assert_eq!(config.sub_round_lifetime_minutes, 60);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = SaleConfig {
            sub_round_lifetime_minutes: 0,
            ..SaleConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SaleError::ValidationError(_))
        ));
    }
}
