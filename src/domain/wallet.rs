use super::money::Balance;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Active sale wallet; every purchased token leaves from here.
pub const WALLET_SYS_ICO: &str = "SYS_ICO";
/// Reserve that receives unsold capacity of expired sub-rounds.
pub const WALLET_SYS_ICO_BACKUP: &str = "SYS_ICO_BACKUP";
/// Receives subscription and fee charges.
pub const WALLET_SYS_INCOME: &str = "SYS_INCOME";
pub const WALLET_SYS_ICO_REWARD: &str = "SYS_ICO_REWARD";
pub const WALLET_SYS_REFERRAL_REWARD: &str = "SYS_REFERRAL_REWARD";
pub const WALLET_SYS_MARKETING_REWARD: &str = "SYS_MARKETING_REWARD";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WalletClass {
    System,
    User,
    Reward,
}

impl fmt::Display for WalletClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WalletClass::System => "SYSTEM",
            WalletClass::User => "USER",
            WalletClass::Reward => "REWARD",
        };
        f.write_str(s)
    }
}

/// Uniqueness key of a wallet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WalletKey {
    pub owner: String,
    pub symbol: String,
    pub class: WalletClass,
}

impl WalletKey {
    pub fn new(owner: impl Into<String>, symbol: impl Into<String>, class: WalletClass) -> Self {
        Self {
            owner: owner.into(),
            symbol: symbol.into(),
            class,
        }
    }

    pub fn user(owner: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self::new(owner, symbol, WalletClass::User)
    }

    pub fn reward(owner: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self::new(owner, symbol, WalletClass::Reward)
    }

    pub fn system(owner: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self::new(owner, symbol, WalletClass::System)
    }
}

impl fmt::Display for WalletKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.owner, self.symbol, self.class)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub key: WalletKey,
    pub balance: Balance,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(key: WalletKey, now: DateTime<Utc>) -> Self {
        Self {
            key,
            balance: Balance::ZERO,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn owner(&self) -> &str {
        &self.key.owner
    }

    pub fn symbol(&self) -> &str {
        &self.key.symbol
    }

    pub fn class(&self) -> WalletClass {
        self.key.class
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_wallet_is_empty_and_active() {
        let wallet = Wallet::new(WalletKey::user("u1", "IND"), Utc::now());
        assert_eq!(wallet.balance, Balance::ZERO);
        assert!(wallet.is_active);
        assert_eq!(wallet.class(), WalletClass::User);
        assert_eq!(wallet.key.to_string(), "u1/IND/USER");
    }

    #[test]
    fn test_wallet_class_serde() {
        let json = serde_json::to_string(&WalletClass::Reward).unwrap();
        assert_eq!(json, "\"REWARD\"");
    }
}
