//! The operations exposed to callers. Every call runs under a deadline and
//! answers with a [`Reply`]; only internal failures surface as `Err`.

use crate::application::coordinator::SaleCoordinator;
use crate::application::sale::{RankingView, SaleEngine};
use crate::application::wallet::{FeeType, HistoryPage, PurchaseReceipt, WalletTransactions};
use crate::domain::coupon::Coupon;
use crate::domain::currency::CurrencyRate;
use crate::domain::ledger::LedgerEntry;
use crate::domain::money::Amount;
use crate::domain::round::{Round, SubRound};
use crate::domain::wallet::Wallet;
use crate::error::{Result, SaleError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};
use uuid::Uuid;

pub const CODE_OK: u16 = 200;
pub const CODE_REFUSED: u16 = 400;
pub const MSG_SUCCESS: &str = "SUCCESS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply<T> {
    pub code: u16,
    pub msg_key: String,
    pub data: Option<T>,
}

impl<T> Reply<T> {
    pub fn ok(data: T) -> Self {
        Self {
            code: CODE_OK,
            msg_key: MSG_SUCCESS.to_string(),
            data: Some(data),
        }
    }

    pub fn refused(error: &SaleError) -> Self {
        Self {
            code: CODE_REFUSED,
            msg_key: error.msg_key().to_string(),
            data: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == CODE_OK
    }
}

impl<T: Serialize> Reply<T> {
    pub fn into_json(self) -> Result<Reply<serde_json::Value>> {
        let data = self.data.map(serde_json::to_value).transpose()?;
        Ok(Reply {
            code: self.code,
            msg_key: self.msg_key,
            data,
        })
    }
}

/// A mutating operation, decoupled from how it was received.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    BuyTokens {
        user: String,
        amount: Decimal,
        symbol: String,
        source_id: String,
        coupon: Option<String>,
    },
    Deposit {
        user: String,
        amount: Decimal,
        symbol: String,
        source_id: String,
        sub_type: Option<String>,
    },
    Subscribe {
        user: String,
        amount: Decimal,
        symbol: String,
        source_id: String,
    },
    ChargeFee {
        user: String,
        amount: Decimal,
        symbol: String,
        source_id: String,
        fee_type: FeeType,
    },
    ReferralReward {
        user: String,
        amount: Decimal,
        symbol: String,
        source_id: String,
    },
    MarketingReward {
        user: String,
        amount: Decimal,
        symbol: String,
        source_id: String,
    },
    AddCoupon {
        owner: String,
        code: String,
        reward: Decimal,
        cashback: Decimal,
    },
}

pub struct SaleService {
    engine: Arc<SaleEngine>,
    wallets: Arc<WalletTransactions>,
    coordinator: Arc<SaleCoordinator>,
    timeout: Duration,
}

fn require_user(user: &str) -> Result<()> {
    if user.trim().is_empty() {
        return Err(SaleError::Unauthorized);
    }
    Ok(())
}

fn parse_cursor(cursor: Option<&str>) -> Result<Option<Uuid>> {
    match cursor.map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => Uuid::parse_str(raw)
            .map(Some)
            .map_err(|e| SaleError::ValidationError(format!("invalid cursor {raw:?}: {e}"))),
    }
}

impl SaleService {
    pub fn new(
        engine: Arc<SaleEngine>,
        wallets: Arc<WalletTransactions>,
        coordinator: Arc<SaleCoordinator>,
        timeout: Duration,
    ) -> Self {
        Self {
            engine,
            wallets,
            coordinator,
            timeout,
        }
    }

    pub fn coordinator(&self) -> &Arc<SaleCoordinator> {
        &self.coordinator
    }

    async fn call<T, F>(&self, operation: &'static str, work: F) -> Result<Reply<T>>
    where
        F: Future<Output = Result<T>>,
    {
        let outcome = match tokio::time::timeout(self.timeout, work).await {
            Ok(outcome) => outcome,
            Err(_) => Err(SaleError::DeadlineExceeded),
        };
        match outcome {
            Ok(data) => Ok(Reply::ok(data)),
            Err(e) if e.is_business() => {
                debug!(operation, error = %e, "request refused");
                Ok(Reply::refused(&e))
            }
            Err(e) => {
                error!(operation, error = ?e, "request failed");
                Err(e)
            }
        }
    }

    pub async fn get_rounds(&self) -> Result<Reply<Vec<Round>>> {
        self.call("GetRounds", self.engine.rounds()).await
    }

    pub async fn get_current_sub_round(&self) -> Result<Reply<SubRound>> {
        self.call("GetCurrentSubRound", async {
            self.engine
                .current_sub_round()
                .await?
                .ok_or(SaleError::RoundExhausted)
        })
        .await
    }

    pub async fn buy_tokens(
        &self,
        user: &str,
        amount: Decimal,
        symbol: &str,
        source_id: &str,
        coupon: Option<&str>,
    ) -> Result<Reply<PurchaseReceipt>> {
        let mut reply = self
            .call("BuyTokens", async {
                require_user(user)?;
                let amount = Amount::new(amount)?;
                self.wallets
                    .buy_tokens(user, amount, symbol, source_id, None)
                    .await
            })
            .await?;
        // The coupon runs past the deadline: the purchase is already committed.
        if let Some(receipt) = reply.data.as_mut()
            && let Ok(amount) = Amount::new(amount)
        {
            receipt.coupon_applied = self
                .wallets
                .settle_coupon(user, coupon, amount, symbol, source_id)
                .await;
        }
        Ok(reply)
    }

    pub async fn deposit(
        &self,
        user: &str,
        amount: Decimal,
        symbol: &str,
        source_id: &str,
        sub_type: Option<&str>,
    ) -> Result<Reply<PurchaseReceipt>> {
        self.call("Deposit", async {
            require_user(user)?;
            let amount = Amount::new(amount)?;
            self.wallets
                .deposit(user, amount, symbol, source_id, sub_type)
                .await
        })
        .await
    }

    pub async fn subscribe(
        &self,
        user: &str,
        amount: Decimal,
        symbol: &str,
        source_id: &str,
    ) -> Result<Reply<LedgerEntry>> {
        self.call("Subscribe", async {
            require_user(user)?;
            let amount = Amount::new(amount)?;
            self.wallets.subscribe(user, amount, symbol, source_id).await
        })
        .await
    }

    pub async fn charge_fee(
        &self,
        user: &str,
        amount: Decimal,
        symbol: &str,
        source_id: &str,
        fee_type: FeeType,
    ) -> Result<Reply<Decimal>> {
        self.call("ChargeFee", async {
            require_user(user)?;
            let amount = Amount::new(amount)?;
            self.wallets
                .charge_fee(user, amount, symbol, source_id, fee_type)
                .await
        })
        .await
    }

    pub async fn calc_charge_fee(
        &self,
        user: &str,
        amount: Decimal,
        symbol: &str,
        fee_type: FeeType,
    ) -> Result<Reply<bool>> {
        self.call("CalcChargeFee", async {
            require_user(user)?;
            let amount = Amount::new(amount)?;
            self.wallets
                .calc_charge_fee(user, amount, symbol, fee_type)
                .await
        })
        .await
    }

    pub async fn referral_reward(
        &self,
        user: &str,
        amount: Decimal,
        symbol: &str,
        source_id: &str,
    ) -> Result<Reply<LedgerEntry>> {
        self.call("ReferralReward", async {
            require_user(user)?;
            let amount = Amount::new(amount)?;
            self.wallets
                .referral_reward(user, amount, symbol, source_id)
                .await
        })
        .await
    }

    pub async fn marketing_reward(
        &self,
        user: &str,
        amount: Decimal,
        symbol: &str,
        source_id: &str,
    ) -> Result<Reply<Uuid>> {
        self.call("MarketingReward", async {
            require_user(user)?;
            let amount = Amount::new(amount)?;
            self.wallets
                .marketing_reward(user, amount, symbol, source_id)
                .await
        })
        .await
    }

    pub async fn get_user_wallet(&self, user: &str) -> Result<Reply<Vec<Wallet>>> {
        self.call("GetUserWallet", async {
            require_user(user)?;
            self.wallets.user_wallets(user).await
        })
        .await
    }

    pub async fn get_transaction_history(
        &self,
        user: &str,
        cursor: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Reply<HistoryPage>> {
        self.call("GetTransactionHistory", async {
            require_user(user)?;
            let cursor = parse_cursor(cursor)?;
            self.wallets.transaction_history(user, cursor, limit).await
        })
        .await
    }

    pub async fn get_currency_rate(&self, symbol: &str) -> Result<Reply<CurrencyRate>> {
        self.call("GetCurrencyRate", self.wallets.currency_rate(symbol))
            .await
    }

    pub async fn get_purchase_ranking(
        &self,
        viewer: Option<&str>,
        cursor: Option<&str>,
        limit: i64,
    ) -> Result<Reply<RankingView>> {
        self.call(
            "GetPurchaseRanking",
            self.engine.ranking_view(viewer, cursor, limit),
        )
        .await
    }

    pub async fn add_coupon(
        &self,
        owner: &str,
        code: &str,
        reward: Decimal,
        cashback: Decimal,
    ) -> Result<Reply<Coupon>> {
        self.call("AddCoupon", async {
            require_user(owner)?;
            self.engine.add_coupon(owner, code, reward, cashback).await
        })
        .await
    }

    pub async fn get_coupon(&self, code: &str) -> Result<Reply<Coupon>> {
        self.call("GetCoupon", async {
            self.engine
                .coupon(code)
                .await?
                .ok_or_else(|| SaleError::NotFound(format!("coupon {}", code.trim())))
        })
        .await
    }

    /// Every wallet in the store.
    pub async fn wallets(&self) -> Result<Reply<Vec<Wallet>>> {
        self.call("ListWallets", self.wallets.all_wallets()).await
    }

    /// Runs a mutating command and returns its reply as JSON.
    pub async fn apply(&self, command: Command) -> Result<Reply<serde_json::Value>> {
        match command {
            Command::BuyTokens {
                user,
                amount,
                symbol,
                source_id,
                coupon,
            } => self
                .buy_tokens(&user, amount, &symbol, &source_id, coupon.as_deref())
                .await?
                .into_json(),
            Command::Deposit {
                user,
                amount,
                symbol,
                source_id,
                sub_type,
            } => self
                .deposit(&user, amount, &symbol, &source_id, sub_type.as_deref())
                .await?
                .into_json(),
            Command::Subscribe {
                user,
                amount,
                symbol,
                source_id,
            } => self
                .subscribe(&user, amount, &symbol, &source_id)
                .await?
                .into_json(),
            Command::ChargeFee {
                user,
                amount,
                symbol,
                source_id,
                fee_type,
            } => self
                .charge_fee(&user, amount, &symbol, &source_id, fee_type)
                .await?
                .into_json(),
            Command::ReferralReward {
                user,
                amount,
                symbol,
                source_id,
            } => self
                .referral_reward(&user, amount, &symbol, &source_id)
                .await?
                .into_json(),
            Command::MarketingReward {
                user,
                amount,
                symbol,
                source_id,
            } => self
                .marketing_reward(&user, amount, &symbol, &source_id)
                .await?
                .into_json(),
            Command::AddCoupon {
                owner,
                code,
                reward,
                cashback,
            } => self
                .add_coupon(&owner, &code, reward, cashback)
                .await?
                .into_json(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refused_reply_carries_key() {
        let reply: Reply<()> = Reply::refused(&SaleError::InsufficientBalance);
        assert_eq!(reply.code, CODE_REFUSED);
        assert_eq!(reply.msg_key, "ERROR_BALANCE_NOT_ENOUGH");
        assert!(!reply.is_ok());
        assert!(Reply::ok(1).is_ok());
    }

    #[test]
    fn test_parse_cursor() {
        assert_eq!(parse_cursor(None).unwrap(), None);
        assert_eq!(parse_cursor(Some(" ")).unwrap(), None);
        let id = Uuid::new_v4();
        assert_eq!(parse_cursor(Some(&id.to_string())).unwrap(), Some(id));
        assert!(matches!(
            parse_cursor(Some("page-2")),
            Err(SaleError::ValidationError(_))
        ));
    }
}
