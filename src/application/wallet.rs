//! Balance-affecting use cases. Each one runs in a single transaction and
//! writes exactly one ledger entry per balance movement.

use crate::application::coordinator::SaleCoordinator;
use crate::application::sale::SaleEngine;
use crate::application::tx::TxGuard;
use crate::config::SaleConfig;
use crate::domain::coupon::Coupon;
use crate::domain::currency::{CurrencyRate, pair_symbol};
use crate::domain::ledger::{LedgerEntry, Leg, TransactionEvent, TransactionType};
use crate::domain::money::{Amount, checked_div, checked_mul};
use crate::domain::ports::{PublisherBox, StoreBox, UnitOfWork};
use crate::domain::round::PurchaseCategory;
use crate::domain::wallet::{
    WALLET_SYS_ICO, WALLET_SYS_ICO_REWARD, WALLET_SYS_INCOME, WALLET_SYS_MARKETING_REWARD,
    WALLET_SYS_REFERRAL_REWARD, Wallet, WalletKey,
};
use crate::error::{Result, SaleError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How a fee amount is denominated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeeType {
    /// Charged as-is in the given symbol.
    #[default]
    Standard,
    /// A stablecoin amount. A percentage of it is charged in tokens at the
    /// current sub-round price.
    Stablecoin,
}

impl FeeType {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "STABLECOIN" | "USDT" | "USDT_TYPE_USDT" => FeeType::Stablecoin,
            _ => FeeType::Standard,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseReceipt {
    pub ledger_id: Uuid,
    pub tokens: Decimal,
    pub coupon_applied: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPage {
    pub entries: Vec<LedgerEntry>,
    /// Id of the last entry when the page is full, `None` otherwise.
    pub next_cursor: Option<Uuid>,
}

pub struct WalletTransactions {
    store: StoreBox,
    engine: Arc<SaleEngine>,
    coordinator: Arc<SaleCoordinator>,
    publisher: PublisherBox,
    fee_fraction: Decimal,
    history_limit: usize,
}

impl WalletTransactions {
    pub fn new(
        store: StoreBox,
        engine: Arc<SaleEngine>,
        coordinator: Arc<SaleCoordinator>,
        publisher: PublisherBox,
        config: &SaleConfig,
    ) -> Self {
        Self {
            store,
            engine,
            coordinator,
            publisher,
            fee_fraction: config.fee_fraction(),
            history_limit: config.history_default_limit,
        }
    }

    fn token(&self) -> &str {
        self.engine.token()
    }

    /// Pays a subscription from the user's token wallet.
    pub async fn subscribe(
        &self,
        user: &str,
        amount: Amount,
        symbol: &str,
        source_id: &str,
    ) -> Result<LedgerEntry> {
        let mut tx = TxGuard::begin(self.store.as_ref()).await?;
        let result = self
            .subscribe_in(tx.uow()?, user, amount, symbol, source_id)
            .await;
        let entry = tx.finish(result).await?;
        info!(user, %amount, symbol, "subscription charged");
        self.publish(&entry, user, TransactionType::Subscription)
            .await;
        Ok(entry)
    }

    async fn subscribe_in(
        &self,
        uow: &mut dyn UnitOfWork,
        user: &str,
        amount: Amount,
        symbol: &str,
        source_id: &str,
    ) -> Result<LedgerEntry> {
        let token = self.token();
        let rate = self.engine.rate_for(uow, symbol).await?;
        let charged = Amount::new(checked_div(amount.value(), rate)?)?;
        if uow
            .decrease_balance(&WalletKey::user(user, token), charged)
            .await?
            == 0
        {
            return Err(SaleError::InsufficientBalance);
        }
        credit_income(uow, token, charged).await?;
        let entry = LedgerEntry::new(
            TransactionType::Subscription,
            Leg::new(user, normalize_symbol(symbol), amount.value()),
            Leg::new(WALLET_SYS_INCOME, token, charged.value()),
        )
        .with_rate(rate)
        .with_source_id(source_id);
        uow.append(entry).await
    }

    /// Charges a fee and returns the charged amount.
    pub async fn charge_fee(
        &self,
        user: &str,
        amount: Amount,
        symbol: &str,
        source_id: &str,
        fee_type: FeeType,
    ) -> Result<Decimal> {
        let mut tx = TxGuard::begin(self.store.as_ref()).await?;
        let result = self
            .charge_fee_in(tx.uow()?, user, amount, symbol, source_id, fee_type)
            .await;
        let entry = tx.finish(result).await?;
        info!(
            user,
            charged = %entry.destination.amount,
            symbol = %entry.destination.symbol,
            "fee charged"
        );
        self.publish(&entry, user, TransactionType::ChargeFee).await;
        Ok(entry.destination.amount)
    }

    async fn charge_fee_in(
        &self,
        uow: &mut dyn UnitOfWork,
        user: &str,
        amount: Amount,
        symbol: &str,
        source_id: &str,
        fee_type: FeeType,
    ) -> Result<LedgerEntry> {
        let (charge_symbol, charged, rate) =
            self.fee_quote(uow, amount, symbol, fee_type).await?;
        if uow
            .decrease_balance(&WalletKey::user(user, &charge_symbol), charged)
            .await?
            == 0
        {
            return Err(SaleError::InsufficientBalance);
        }
        credit_income(uow, &charge_symbol, charged).await?;
        let mut entry = LedgerEntry::transfer(
            TransactionType::ChargeFee,
            user,
            WALLET_SYS_INCOME,
            &charge_symbol,
            charged.value(),
        )
        .with_source_id(source_id);
        if let Some(rate) = rate {
            entry = entry.with_rate(rate);
        }
        uow.append(entry).await
    }

    /// Whether the user could pay the fee right now. Nothing is written; the
    /// charge itself re-checks atomically.
    pub async fn calc_charge_fee(
        &self,
        user: &str,
        amount: Amount,
        symbol: &str,
        fee_type: FeeType,
    ) -> Result<bool> {
        let mut tx = TxGuard::begin(self.store.as_ref()).await?;
        let result = async {
            let uow = tx.uow()?;
            let (charge_symbol, charged, _) =
                self.fee_quote(uow, amount, symbol, fee_type).await?;
            uow.has_balance(&WalletKey::user(user, &charge_symbol), charged)
                .await
        }
        .await;
        tx.finish(result).await
    }

    /// Symbol and amount a fee is charged in, plus the sub-round price used
    /// for stablecoin fees.
    async fn fee_quote(
        &self,
        uow: &mut dyn UnitOfWork,
        amount: Amount,
        symbol: &str,
        fee_type: FeeType,
    ) -> Result<(String, Amount, Option<Decimal>)> {
        match fee_type {
            FeeType::Standard => Ok((normalize_symbol(symbol), amount, None)),
            FeeType::Stablecoin => {
                let current = uow
                    .current_sub_round()
                    .await?
                    .ok_or(SaleError::RoundExhausted)?;
                if current.price <= Decimal::ZERO {
                    return Err(SaleError::internal("sub-round without a price"));
                }
                let fee = checked_mul(amount.value(), self.fee_fraction)?;
                let charged = Amount::new(checked_div(fee, current.price)?)?;
                Ok((self.token().to_string(), charged, Some(current.price)))
            }
        }
    }

    /// Credits tokens bought through the sale, booked as a deposit.
    pub async fn deposit(
        &self,
        user: &str,
        amount: Amount,
        symbol: &str,
        source_id: &str,
        sub_type: Option<&str>,
    ) -> Result<PurchaseReceipt> {
        let category = PurchaseCategory::parse(sub_type.unwrap_or_default());
        let entry = self
            .sale_purchase(user, amount, symbol, source_id, TransactionType::Deposit, category)
            .await?;
        self.publish(&entry, user, TransactionType::Deposit).await;
        Ok(PurchaseReceipt {
            ledger_id: entry.id,
            tokens: entry.destination.amount,
            coupon_applied: false,
        })
    }

    /// Buys tokens from the sale, then pays out the coupon if one matches.
    pub async fn buy_tokens(
        &self,
        user: &str,
        amount: Amount,
        symbol: &str,
        source_id: &str,
        coupon: Option<&str>,
    ) -> Result<PurchaseReceipt> {
        let entry = self
            .sale_purchase(
                user,
                amount,
                symbol,
                source_id,
                TransactionType::Ico,
                PurchaseCategory::Ico,
            )
            .await?;
        self.publish(&entry, user, TransactionType::Ico).await;

        let coupon_applied = self
            .settle_coupon(user, coupon, amount, symbol, source_id)
            .await;
        Ok(PurchaseReceipt {
            ledger_id: entry.id,
            tokens: entry.destination.amount,
            coupon_applied,
        })
    }

    async fn sale_purchase(
        &self,
        user: &str,
        amount: Amount,
        symbol: &str,
        source_id: &str,
        r#type: TransactionType,
        category: PurchaseCategory,
    ) -> Result<LedgerEntry> {
        self.ensure_wallet(&WalletKey::user(user, self.token()))
            .await?;

        let guard = self.coordinator.acquire().await?;
        let result = self
            .sale_purchase_locked(user, amount, symbol, source_id, r#type, category)
            .await;
        guard.release().await;
        result
    }

    async fn sale_purchase_locked(
        &self,
        user: &str,
        amount: Amount,
        symbol: &str,
        source_id: &str,
        r#type: TransactionType,
        category: PurchaseCategory,
    ) -> Result<LedgerEntry> {
        let mut tx = TxGuard::begin(self.store.as_ref()).await?;
        let result = self
            .transfer_from_sale(tx.uow()?, user, amount, symbol, source_id, r#type, category)
            .await;
        let entry = tx.finish(result).await?;
        info!(user, %amount, symbol, tokens = %entry.destination.amount, "tokens sold");

        if let Err(e) = self.coordinator.schedule_current().await {
            warn!(error = %e, "could not schedule the current sub-round close");
        }
        Ok(entry)
    }

    #[allow(clippy::too_many_arguments)]
    async fn transfer_from_sale(
        &self,
        uow: &mut dyn UnitOfWork,
        user: &str,
        amount: Amount,
        symbol: &str,
        source_id: &str,
        r#type: TransactionType,
        category: PurchaseCategory,
    ) -> Result<LedgerEntry> {
        let token = self.token();
        let tokens = self
            .engine
            .allocate(uow, user, amount, symbol, category)
            .await?;
        let tokens_amount = Amount::new(tokens)?;

        if uow
            .decrease_balance(&WalletKey::system(WALLET_SYS_ICO, token), tokens_amount)
            .await?
            == 0
        {
            return Err(SaleError::InsufficientBalance);
        }
        let buyer = WalletKey::user(user, token);
        uow.create_wallet(&buyer).await?;
        uow.increase_balance(&buyer, tokens_amount).await?;

        let entry = LedgerEntry::transfer(r#type, WALLET_SYS_ICO, user, token, tokens)
            .with_rate(checked_div(amount.value(), tokens)?)
            .with_source_id(source_id);
        uow.append(entry).await
    }

    /// Coupon step of a purchase that has already committed. A failure here
    /// leaves the purchase in place: it is logged and reported as `false`.
    pub async fn settle_coupon(
        &self,
        user: &str,
        coupon: Option<&str>,
        amount: Amount,
        symbol: &str,
        source_id: &str,
    ) -> bool {
        let Some(code) = coupon.map(str::trim).filter(|c| !c.is_empty()) else {
            return false;
        };
        match self
            .apply_coupon(user, code, amount, symbol, source_id)
            .await
        {
            Ok(applied) => applied,
            Err(e) => {
                warn!(
                    user,
                    code,
                    source_id,
                    error = %e,
                    "coupon not applied to a completed purchase"
                );
                false
            }
        }
    }

    /// Pays the coupon owner's reward and the buyer's cashback. An unknown
    /// or deleted code is not an error; returns whether a coupon matched.
    pub async fn apply_coupon(
        &self,
        user: &str,
        code: &str,
        amount: Amount,
        symbol: &str,
        source_id: &str,
    ) -> Result<bool> {
        let mut tx = TxGuard::begin(self.store.as_ref()).await?;
        let result = async {
            let uow = tx.uow()?;
            match uow.coupon(code).await? {
                Some(coupon) => {
                    self.pay_coupon(uow, &coupon, user, amount, symbol, source_id)
                        .await?;
                    Ok::<_, SaleError>(true)
                }
                None => Ok(false),
            }
        }
        .await;
        let applied = tx.finish(result).await?;
        if applied {
            info!(user, code, "coupon applied");
        } else {
            debug!(user, code, "no coupon matches");
        }
        Ok(applied)
    }

    async fn pay_coupon(
        &self,
        uow: &mut dyn UnitOfWork,
        coupon: &Coupon,
        buyer: &str,
        amount: Amount,
        symbol: &str,
        source_id: &str,
    ) -> Result<()> {
        let symbol = normalize_symbol(symbol);
        let payouts = [
            (
                coupon.owner.as_str(),
                coupon.reward_for(amount.value())?,
                TransactionType::IcoCommission,
            ),
            (
                buyer,
                coupon.cashback_for(amount.value())?,
                TransactionType::IcoCashback,
            ),
        ];
        for (recipient, payout, r#type) in payouts {
            let wallet = WalletKey::reward(recipient, &symbol);
            uow.create_wallet(&wallet).await?;
            if let Ok(payout_amount) = Amount::new(payout) {
                uow.increase_balance(&wallet, payout_amount).await?;
            }
            uow.append(
                LedgerEntry::transfer(r#type, WALLET_SYS_ICO_REWARD, recipient, &symbol, payout)
                    .with_source_id(source_id),
            )
            .await?;
        }
        Ok(())
    }

    pub async fn referral_reward(
        &self,
        user: &str,
        amount: Amount,
        symbol: &str,
        source_id: &str,
    ) -> Result<LedgerEntry> {
        let entry = self
            .reward(
                user,
                amount,
                symbol,
                source_id,
                WALLET_SYS_REFERRAL_REWARD,
                TransactionType::ReferralReward,
            )
            .await?;
        self.publish(&entry, user, TransactionType::ReferralReward)
            .await;
        Ok(entry)
    }

    /// Returns the id of the ledger entry.
    pub async fn marketing_reward(
        &self,
        user: &str,
        amount: Amount,
        symbol: &str,
        source_id: &str,
    ) -> Result<Uuid> {
        let entry = self
            .reward(
                user,
                amount,
                symbol,
                source_id,
                WALLET_SYS_MARKETING_REWARD,
                TransactionType::MarketingReward,
            )
            .await?;
        self.publish(&entry, user, TransactionType::MarketingReward)
            .await;
        Ok(entry.id)
    }

    async fn reward(
        &self,
        user: &str,
        amount: Amount,
        symbol: &str,
        source_id: &str,
        pool: &str,
        r#type: TransactionType,
    ) -> Result<LedgerEntry> {
        let symbol = normalize_symbol(symbol);
        let mut tx = TxGuard::begin(self.store.as_ref()).await?;
        let result = async {
            let uow = tx.uow()?;
            let wallet = WalletKey::reward(user, &symbol);
            uow.create_wallet(&wallet).await?;
            uow.increase_balance(&wallet, amount).await?;
            uow.append(
                LedgerEntry::transfer(r#type, pool, user, &symbol, amount.value())
                    .with_source_id(source_id),
            )
            .await
        }
        .await;
        let entry = tx.finish(result).await?;
        info!(user, %amount, symbol = %symbol, kind = %r#type, "reward credited");
        Ok(entry)
    }

    /// All wallets of `user`, creating the token wallet on first access.
    pub async fn user_wallets(&self, user: &str) -> Result<Vec<Wallet>> {
        let key = WalletKey::user(user, self.token());
        let mut tx = TxGuard::begin(self.store.as_ref()).await?;
        let result = async {
            let uow = tx.uow()?;
            let wallets = uow.wallets_of(user).await?;
            if !wallets.is_empty() {
                return Ok(wallets);
            }
            uow.create_wallet(&key).await?;
            uow.wallets_of(user).await
        }
        .await;
        tx.finish(result).await
    }

    /// Every wallet, ordered by owner, symbol and class.
    pub async fn all_wallets(&self) -> Result<Vec<Wallet>> {
        let mut tx = TxGuard::begin(self.store.as_ref()).await?;
        let result = tx.uow()?.all_wallets().await;
        tx.finish(result).await
    }

    /// Ledger entries touching `user`, newest first. Deposits are not shown.
    pub async fn transaction_history(
        &self,
        user: &str,
        cursor: Option<Uuid>,
        limit: Option<usize>,
    ) -> Result<HistoryPage> {
        let limit = match limit {
            Some(l) if l > 0 => l,
            _ => self.history_limit,
        };
        let mut tx = TxGuard::begin(self.store.as_ref()).await?;
        let result = tx
            .uow()?
            .entries_for(user, cursor, limit, &[TransactionType::Deposit])
            .await;
        let entries = tx.finish(result).await?;
        let next_cursor = if entries.len() == limit {
            entries.last().map(|e| e.id)
        } else {
            None
        };
        Ok(HistoryPage {
            entries,
            next_cursor,
        })
    }

    /// Live rate of `symbol` against the sale token.
    pub async fn currency_rate(&self, symbol: &str) -> Result<CurrencyRate> {
        let pair = pair_symbol(symbol, self.token());
        let mut tx = TxGuard::begin(self.store.as_ref()).await?;
        let result = tx.uow()?.live_rate(&pair).await;
        tx.finish(result)
            .await?
            .ok_or_else(|| SaleError::NotFound(format!("currency rate {pair}")))
    }

    async fn ensure_wallet(&self, key: &WalletKey) -> Result<Wallet> {
        let mut tx = TxGuard::begin(self.store.as_ref()).await?;
        let result = tx.uow()?.create_wallet(key).await;
        tx.finish(result).await
    }

    /// Best effort: the ledger entry is already committed.
    async fn publish(&self, entry: &LedgerEntry, user: &str, r#type: TransactionType) {
        let event = TransactionEvent {
            id: entry.id,
            user_id: user.to_string(),
            amount: entry.destination.amount,
            symbol: entry.destination.symbol.clone(),
            r#type,
        };
        if let Err(e) = self.publisher.publish(event).await {
            warn!(id = %entry.id, error = %e, "failed to publish transaction event");
        }
    }
}

async fn credit_income(uow: &mut dyn UnitOfWork, symbol: &str, amount: Amount) -> Result<()> {
    let income = WalletKey::system(WALLET_SYS_INCOME, symbol);
    uow.create_wallet(&income).await?;
    uow.increase_balance(&income, amount).await?;
    Ok(())
}

fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fee_type_parse() {
        assert_eq!(FeeType::parse("stablecoin"), FeeType::Stablecoin);
        assert_eq!(FeeType::parse("USDT"), FeeType::Stablecoin);
        assert_eq!(FeeType::parse(""), FeeType::Standard);
        assert_eq!(FeeType::parse("IND"), FeeType::Standard);
    }
}
