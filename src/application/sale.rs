//! Sub-round progression, allocation of purchases across sub-rounds,
//! re-pricing on round change, the buyer ranking and coupon lookup.

use crate::application::tx::TxGuard;
use crate::config::{GenesisConfig, SaleConfig};
use crate::domain::coupon::{Coupon, normalize_code};
use crate::domain::currency::{CurrencyRate, pair_symbol};
use crate::domain::money::{Amount, checked_div, checked_mul};
use crate::domain::ports::{ClockBox, ProfileDirectoryBox, StoreBox, UnitOfWork};
use crate::domain::round::{BuyerRank, PurchaseCategory, PurchaseHistory, Round, SubRound};
use crate::domain::wallet::{WALLET_SYS_ICO, WALLET_SYS_ICO_BACKUP, WALLET_SYS_INCOME, WalletKey};
use crate::error::{Result, SaleError};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// What happened when a sub-round was asked to close.
#[derive(Debug, Clone, PartialEq)]
pub enum CloseOutcome {
    /// Another caller closed it first. Re-read the current sub-round.
    AlreadyClosed,
    /// The sale moved on to `next`, whose window has been stamped.
    Advanced { next: SubRound, rolled_over: bool },
    /// That was the last open sub-round.
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingPage {
    pub rows: Vec<BuyerRank>,
    pub total: usize,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedBuyer {
    pub rank: usize,
    pub user_id: String,
    pub email: String,
    pub full_name: String,
    pub tokens: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingView {
    pub rows: Vec<RankedBuyer>,
    pub total: usize,
    pub next_cursor: Option<String>,
}

pub struct SaleEngine {
    store: StoreBox,
    profiles: ProfileDirectoryBox,
    clock: ClockBox,
    token: String,
    lifetime: chrono::Duration,
    max_page: usize,
}

impl SaleEngine {
    pub fn new(
        store: StoreBox,
        profiles: ProfileDirectoryBox,
        clock: ClockBox,
        config: &SaleConfig,
    ) -> Self {
        Self {
            store,
            profiles,
            clock,
            token: config.token_symbol.clone(),
            lifetime: config.sub_round_lifetime(),
            max_page: config.ranking_max_page,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Seeds rounds, sub-rounds, rates and the funded sale wallet into an
    /// empty store, and opens the first window. Returns `false` if the store
    /// already holds rounds.
    pub async fn seed_genesis(&self, genesis: &GenesisConfig) -> Result<bool> {
        let mut tx = TxGuard::begin(self.store.as_ref()).await?;
        let result = self.seed_genesis_in(tx.uow()?, genesis).await;
        tx.finish(result).await
    }

    async fn seed_genesis_in(
        &self,
        uow: &mut dyn UnitOfWork,
        genesis: &GenesisConfig,
    ) -> Result<bool> {
        if !uow.rounds().await?.is_empty() {
            return Ok(false);
        }
        let now = self.clock.now();

        for (index, seed) in genesis.rounds.iter().enumerate() {
            let number = index as u32 + 1;
            let count = Decimal::from(seed.sub_rounds);
            let per_sub_round = seed.total_tokens / count;
            let sub_rounds = (1..=seed.sub_rounds)
                .map(|n| {
                    // The last sub-round absorbs any division remainder.
                    let total = if n == seed.sub_rounds {
                        seed.total_tokens - per_sub_round * Decimal::from(n - 1)
                    } else {
                        per_sub_round
                    };
                    SubRound::new(number, n, seed.price, total)
                })
                .collect();
            let round = Round {
                round: number,
                name: seed.name.clone(),
                price: seed.price,
                total_tokens: seed.total_tokens,
                sub_round_count: seed.sub_rounds,
                price_gap: seed.price_gap.clone(),
                ended_at: None,
            };
            uow.insert_round(round, sub_rounds).await?;
        }

        for rate in &genesis.rates {
            let pair = pair_symbol(&rate.symbol, &self.token);
            uow.insert_rate(CurrencyRate::new(pair, rate.rate, now)).await?;
        }

        let sale = WalletKey::system(WALLET_SYS_ICO, &self.token);
        for owner in [WALLET_SYS_ICO, WALLET_SYS_ICO_BACKUP, WALLET_SYS_INCOME] {
            uow.create_wallet(&WalletKey::system(owner, &self.token)).await?;
        }
        if genesis.sale_wallet_balance > Decimal::ZERO {
            uow.increase_balance(&sale, Amount::new(genesis.sale_wallet_balance)?)
                .await?;
        }

        if let Some(mut first) = uow.current_sub_round().await? {
            self.open_window(uow, &mut first, now).await?;
        }
        info!(
            rounds = genesis.rounds.len(),
            rates = genesis.rates.len(),
            "genesis tokenomics seeded"
        );
        Ok(true)
    }

    /// Spreads a purchase of `amount` (in `symbol`) over as many sub-rounds
    /// as it takes, closing each one it exhausts. Returns the tokens bought.
    ///
    /// Must run under the sale lock and inside the caller's transaction.
    pub async fn allocate(
        &self,
        uow: &mut dyn UnitOfWork,
        buyer: &str,
        amount: Amount,
        symbol: &str,
        category: PurchaseCategory,
    ) -> Result<Decimal> {
        let mut residual = amount.value();
        let mut tokens = Decimal::ZERO;
        let mut histories = Vec::new();

        while residual > Decimal::ZERO {
            let Some(sub) = uow.current_sub_round().await? else {
                return Err(SaleError::RoundExhausted);
            };
            // Re-read every pass: closing the previous sub-round may have
            // rolled the rates over.
            let rate = self.rate_for(uow, symbol).await?;
            let remaining_tokens = sub.remaining();
            let remaining_amount = checked_mul(remaining_tokens, rate)?;

            if remaining_amount > residual {
                let bought = checked_div(residual, rate)?;
                histories.push(self.history(&sub, buyer, bought, &category));
                uow.update_sub_round_bought(sub.id, sub.bought + bought)
                    .await?;
                tokens += bought;
                break;
            }

            if remaining_tokens > Decimal::ZERO {
                histories.push(self.history(&sub, buyer, remaining_tokens, &category));
                tokens += remaining_tokens;
            }
            residual -= remaining_amount;
            debug!(
                round = sub.round,
                sub_round = sub.sub_round,
                %residual,
                "sub-round filled"
            );
            self.close_sub_round(uow, &sub, sub.total).await?;
        }

        uow.save_histories(histories).await?;
        Ok(tokens)
    }

    /// Closes `sub_round` with its final `bought` and opens the next one.
    pub async fn close_sub_round(
        &self,
        uow: &mut dyn UnitOfWork,
        sub_round: &SubRound,
        bought: Decimal,
    ) -> Result<CloseOutcome> {
        if !uow.close_sub_round(sub_round.id, bought).await? {
            debug!(id = %sub_round.id, "sub-round already closed");
            return Ok(CloseOutcome::AlreadyClosed);
        }
        let now = self.clock.now();
        info!(
            round = sub_round.round,
            sub_round = sub_round.sub_round,
            %bought,
            "sub-round closed"
        );

        let Some(mut next) = uow.current_sub_round().await? else {
            uow.end_round(sub_round.round, now).await?;
            info!(round = sub_round.round, "sale exhausted");
            return Ok(CloseOutcome::Exhausted);
        };

        self.open_window(uow, &mut next, now).await?;

        let rolled_over = next.round != sub_round.round;
        if rolled_over {
            uow.end_round(sub_round.round, now).await?;
            self.rollover_rates(uow, sub_round.price, next.price, now)
                .await?;
            info!(
                from = sub_round.round,
                to = next.round,
                price = %next.price,
                "round changed"
            );
        }
        Ok(CloseOutcome::Advanced { next, rolled_over })
    }

    /// Starts the selling window of `sub_round` at `now`.
    pub async fn open_window(
        &self,
        uow: &mut dyn UnitOfWork,
        sub_round: &mut SubRound,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let end = now + self.lifetime;
        uow.set_sub_round_window(sub_round.id, now, end).await?;
        sub_round.start_at = Some(now);
        sub_round.end_at = Some(end);
        Ok(())
    }

    /// Rescales every live rate by `new_price / old_price`, keeping the
    /// previous rows as expired history.
    pub async fn rollover_rates(
        &self,
        uow: &mut dyn UnitOfWork,
        old_price: Decimal,
        new_price: Decimal,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if old_price <= Decimal::ZERO {
            return Err(SaleError::internal(format!(
                "cannot rescale rates from price {old_price}"
            )));
        }
        let factor = checked_div(new_price, old_price)?;
        for rate in uow.live_rates().await? {
            uow.expire_rate(&rate.symbol, now).await?;
            let scaled = checked_mul(rate.rate, factor)?;
            debug!(symbol = %rate.symbol, from = %rate.rate, to = %scaled, "rate rolled over");
            uow.insert_rate(CurrencyRate::new(rate.symbol, scaled, now))
                .await?;
        }
        Ok(())
    }

    /// Units of `symbol` per token. The token itself trades at 1.
    pub async fn rate_for(&self, uow: &mut dyn UnitOfWork, symbol: &str) -> Result<Decimal> {
        if symbol.trim().eq_ignore_ascii_case(&self.token) {
            return Ok(Decimal::ONE);
        }
        let pair = pair_symbol(symbol, &self.token);
        let rate = uow
            .live_rate(&pair)
            .await?
            .ok_or_else(|| SaleError::NotFound(format!("currency rate {pair}")))?;
        if rate.rate <= Decimal::ZERO {
            return Err(SaleError::internal(format!("non-positive rate for {pair}")));
        }
        Ok(rate.rate)
    }

    fn history(
        &self,
        sub: &SubRound,
        buyer: &str,
        tokens: Decimal,
        category: &PurchaseCategory,
    ) -> PurchaseHistory {
        PurchaseHistory {
            round: sub.round,
            sub_round: sub.sub_round,
            buyer: buyer.to_string(),
            price: sub.price,
            tokens,
            category: category.clone(),
            created_at: self.clock.now(),
        }
    }

    pub async fn rounds(&self) -> Result<Vec<Round>> {
        let mut tx = TxGuard::begin(self.store.as_ref()).await?;
        let rounds = tx.uow()?.rounds().await;
        tx.finish(rounds).await
    }

    pub async fn current_sub_round(&self) -> Result<Option<SubRound>> {
        let mut tx = TxGuard::begin(self.store.as_ref()).await?;
        let current = tx.uow()?.current_sub_round().await;
        tx.finish(current).await
    }

    /// Buyers ordered by tokens bought. `cursor` is a row offset; anything
    /// unparsable starts from the top.
    pub async fn purchase_ranking(&self, cursor: Option<&str>, limit: i64) -> Result<RankingPage> {
        let offset = cursor
            .and_then(|c| c.trim().parse::<usize>().ok())
            .unwrap_or(0);
        let limit = if limit <= 0 || limit as usize > self.max_page {
            self.max_page
        } else {
            limit as usize
        };

        let mut tx = TxGuard::begin(self.store.as_ref()).await?;
        let result = Self::ranking_rows(tx.uow()?, limit, offset).await;
        let (rows, total) = tx.finish(result).await?;

        let next_cursor = if rows.len() == limit {
            rows.last().map(|r| r.rank.to_string())
        } else {
            None
        };
        Ok(RankingPage {
            rows,
            total,
            next_cursor,
        })
    }

    async fn ranking_rows(
        uow: &mut dyn UnitOfWork,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<BuyerRank>, usize)> {
        let total = uow.buyer_count().await?;
        if offset >= total {
            return Ok((Vec::new(), total));
        }
        let rows = uow.buyer_ranking(limit, offset).await?;
        Ok((rows, total))
    }

    /// The ranking joined with buyer profiles. E-mails of everybody but
    /// `viewer` are masked.
    pub async fn ranking_view(
        &self,
        viewer: Option<&str>,
        cursor: Option<&str>,
        limit: i64,
    ) -> Result<RankingView> {
        let page = self.purchase_ranking(cursor, limit).await?;
        let ids: Vec<String> = page.rows.iter().map(|r| r.buyer.clone()).collect();
        let profiles = if ids.is_empty() {
            Default::default()
        } else {
            self.profiles.profiles(&ids).await?
        };

        let rows = page
            .rows
            .into_iter()
            .map(|row| {
                let (email, full_name) = match profiles.get(&row.buyer) {
                    Some(p) if viewer == Some(row.buyer.as_str()) => {
                        (p.email.clone(), p.full_name.clone())
                    }
                    Some(p) => (mask_email(&p.email), p.full_name.clone()),
                    None => (String::new(), String::new()),
                };
                RankedBuyer {
                    rank: row.rank,
                    user_id: row.buyer,
                    email,
                    full_name,
                    tokens: row.tokens,
                }
            })
            .collect();

        Ok(RankingView {
            rows,
            total: page.total,
            next_cursor: page.next_cursor,
        })
    }

    /// Inserts the coupon, or overwrites the one with the same code.
    pub async fn add_coupon(
        &self,
        owner: &str,
        code: &str,
        reward: Decimal,
        cashback: Decimal,
    ) -> Result<Coupon> {
        if normalize_code(code).is_empty() {
            return Err(SaleError::ValidationError("coupon code is empty".to_string()));
        }
        if reward < Decimal::ZERO || cashback < Decimal::ZERO {
            return Err(SaleError::ValidationError(
                "coupon fractions must not be negative".to_string(),
            ));
        }
        let coupon = Coupon::new(code, owner, reward, cashback, self.clock.now());
        let mut tx = TxGuard::begin(self.store.as_ref()).await?;
        let result = tx.uow()?.upsert_coupon(coupon.clone()).await;
        tx.finish(result).await?;
        info!(code = %coupon.code, owner, "coupon saved");
        Ok(coupon)
    }

    pub async fn coupon(&self, code: &str) -> Result<Option<Coupon>> {
        let mut tx = TxGuard::begin(self.store.as_ref()).await?;
        let coupon = tx.uow()?.coupon(code).await;
        tx.finish(coupon).await
    }
}

/// `alice@example.com` becomes `al****ce@example.com`. Anything without an
/// `@` masks to an empty string.
pub fn mask_email(email: &str) -> String {
    let Some(at) = email.find('@') else {
        return String::new();
    };
    let (local, domain) = email.split_at(at);
    let chars: Vec<char> = local.chars().collect();
    let head: String = chars.iter().take(2).collect();
    let tail: String = chars[chars.len().saturating_sub(2)..].iter().collect();
    format!("{head}****{tail}{domain}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_email() {
        assert_eq!(mask_email("alice@example.com"), "al****ce@example.com");
        assert_eq!(mask_email("ab@x.io"), "ab****ab@x.io");
        assert_eq!(mask_email("not-an-email"), "");
    }
}
