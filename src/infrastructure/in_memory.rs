use crate::domain::coupon::{Coupon, normalize_code};
use crate::domain::currency::CurrencyRate;
use crate::domain::ledger::{LedgerEntry, TransactionType};
use crate::domain::money::{Amount, Balance};
use crate::domain::ports::{
    CouponRepository, CurrencyRateRepository, LedgerRepository, RoundRepository, Store,
    UnitOfWork, WalletRepository,
};
use crate::domain::round::{BuyerRank, PurchaseHistory, Round, SubRound};
use crate::domain::wallet::{Wallet, WalletKey};
use crate::error::{Result, SaleError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Every collection the service persists.
///
/// Sub-rounds are keyed by `(round, sub_round)` so iteration follows sale
/// order. Histories and ledger entries are append-only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerState {
    pub rounds: BTreeMap<u32, Round>,
    pub sub_rounds: BTreeMap<(u32, u32), SubRound>,
    pub histories: Vec<PurchaseHistory>,
    pub wallets: BTreeMap<WalletKey, Wallet>,
    pub ledger: Vec<LedgerEntry>,
    pub rates: Vec<CurrencyRate>,
    pub coupons: BTreeMap<String, Coupon>,
}

impl LedgerState {
    fn sub_round_mut(&mut self, id: Uuid) -> Result<&mut SubRound> {
        self.sub_rounds
            .values_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| SaleError::NotFound(format!("sub-round {id}")))
    }

    fn live_rate_mut(&mut self, symbol: &str) -> Option<&mut CurrencyRate> {
        self.rates
            .iter_mut()
            .rev()
            .find(|r| r.symbol == symbol && r.is_live())
    }
}

/// Receives every committed state change. Used by persistent stores that
/// keep the in-memory state as their working copy.
pub trait CommitSink: Send + Sync {
    fn persist(&self, before: &LedgerState, after: &LedgerState) -> Result<()>;
}

/// A thread-safe in-memory store.
///
/// A unit of work holds the state lock for its whole lifetime and works on a
/// staged copy, so transactions are serialized and uncommitted writes are
/// never visible. Do not begin a second unit of work from a task that still
/// holds one.
///
/// Staging clones the whole [`LedgerState`], so every unit of work costs
/// O(total state), ledger history included.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<LedgerState>>,
    sink: Option<Arc<dyn CommitSink>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: LedgerState, sink: Option<Arc<dyn CommitSink>>) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            sink,
        }
    }

    /// Copy of the committed state.
    pub async fn snapshot(&self) -> LedgerState {
        self.state.lock().await.clone()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let committed = self.state.clone().lock_owned().await;
        let staged = committed.clone();
        Ok(Box::new(InMemoryUnitOfWork {
            committed,
            staged,
            sink: self.sink.clone(),
        }))
    }
}

pub struct InMemoryUnitOfWork {
    committed: OwnedMutexGuard<LedgerState>,
    staged: LedgerState,
    sink: Option<Arc<dyn CommitSink>>,
}

#[async_trait]
impl RoundRepository for InMemoryUnitOfWork {
    async fn insert_round(&mut self, round: Round, sub_rounds: Vec<SubRound>) -> Result<()> {
        if self.staged.rounds.contains_key(&round.round) {
            return Err(SaleError::ValidationError(format!(
                "round {} already exists",
                round.round
            )));
        }
        for sub in sub_rounds {
            self.staged.sub_rounds.insert(sub.position(), sub);
        }
        self.staged.rounds.insert(round.round, round);
        Ok(())
    }

    async fn rounds(&mut self) -> Result<Vec<Round>> {
        Ok(self.staged.rounds.values().cloned().collect())
    }

    async fn round(&mut self, round: u32) -> Result<Option<Round>> {
        Ok(self.staged.rounds.get(&round).cloned())
    }

    async fn end_round(&mut self, round: u32, at: DateTime<Utc>) -> Result<bool> {
        match self.staged.rounds.get_mut(&round) {
            Some(r) if r.ended_at.is_none() => {
                r.ended_at = Some(at);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(SaleError::NotFound(format!("round {round}"))),
        }
    }

    async fn current_sub_round(&mut self) -> Result<Option<SubRound>> {
        Ok(self.staged.sub_rounds.values().find(|s| !s.closed).cloned())
    }

    async fn sub_round(&mut self, id: Uuid) -> Result<Option<SubRound>> {
        Ok(self.staged.sub_rounds.values().find(|s| s.id == id).cloned())
    }

    async fn update_sub_round_bought(&mut self, id: Uuid, bought: Decimal) -> Result<()> {
        let sub = self.staged.sub_round_mut(id)?;
        if bought > sub.total || bought < Decimal::ZERO {
            return Err(SaleError::internal(format!(
                "bought {bought} out of range for sub-round {id}"
            )));
        }
        sub.bought = bought;
        Ok(())
    }

    async fn close_sub_round(&mut self, id: Uuid, bought: Decimal) -> Result<bool> {
        let sub = self.staged.sub_round_mut(id)?;
        if sub.closed {
            return Ok(false);
        }
        sub.closed = true;
        sub.bought = bought.min(sub.total);
        Ok(true)
    }

    async fn set_sub_round_window(
        &mut self,
        id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<()> {
        let sub = self.staged.sub_round_mut(id)?;
        sub.start_at = Some(start);
        sub.end_at = Some(end);
        Ok(())
    }

    async fn save_histories(&mut self, histories: Vec<PurchaseHistory>) -> Result<()> {
        self.staged.histories.extend(histories);
        Ok(())
    }

    async fn histories(&mut self, buyer: Option<&str>) -> Result<Vec<PurchaseHistory>> {
        Ok(self
            .staged
            .histories
            .iter()
            .filter(|h| buyer.is_none_or(|b| h.buyer == b))
            .cloned()
            .collect())
    }

    async fn buyer_ranking(&mut self, limit: usize, offset: usize) -> Result<Vec<BuyerRank>> {
        let mut totals: HashMap<&str, Decimal> = HashMap::new();
        for h in &self.staged.histories {
            *totals.entry(h.buyer.as_str()).or_default() += h.tokens;
        }
        let mut totals: Vec<(&str, Decimal)> = totals.into_iter().collect();
        totals.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        Ok(totals
            .into_iter()
            .enumerate()
            .skip(offset)
            .take(limit)
            .map(|(index, (buyer, tokens))| BuyerRank {
                rank: index + 1,
                buyer: buyer.to_string(),
                tokens,
            })
            .collect())
    }

    async fn buyer_count(&mut self) -> Result<usize> {
        let mut buyers: Vec<&str> = self
            .staged
            .histories
            .iter()
            .map(|h| h.buyer.as_str())
            .collect();
        buyers.sort_unstable();
        buyers.dedup();
        Ok(buyers.len())
    }
}

#[async_trait]
impl WalletRepository for InMemoryUnitOfWork {
    async fn all_wallets(&mut self) -> Result<Vec<Wallet>> {
        Ok(self.staged.wallets.values().cloned().collect())
    }

    async fn wallets_of(&mut self, owner: &str) -> Result<Vec<Wallet>> {
        Ok(self
            .staged
            .wallets
            .values()
            .filter(|w| w.owner() == owner)
            .cloned()
            .collect())
    }

    async fn wallet(&mut self, key: &WalletKey) -> Result<Option<Wallet>> {
        Ok(self.staged.wallets.get(key).cloned())
    }

    async fn create_wallet(&mut self, key: &WalletKey) -> Result<Wallet> {
        let wallet = self
            .staged
            .wallets
            .entry(key.clone())
            .or_insert_with(|| Wallet::new(key.clone(), Utc::now()));
        Ok(wallet.clone())
    }

    async fn increase_balance(&mut self, key: &WalletKey, amount: Amount) -> Result<u64> {
        match self.staged.wallets.get_mut(key) {
            Some(wallet) => {
                wallet.balance = wallet.balance.checked_add(amount).ok_or_else(|| {
                    SaleError::ValidationError(format!("balance of {key} would overflow"))
                })?;
                wallet.updated_at = Utc::now();
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn decrease_balance(&mut self, key: &WalletKey, amount: Amount) -> Result<u64> {
        match self.staged.wallets.get_mut(key) {
            Some(wallet) if wallet.balance.covers(amount) => {
                wallet.balance -= Balance::from(amount);
                wallet.updated_at = Utc::now();
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn has_balance(&mut self, key: &WalletKey, amount: Amount) -> Result<bool> {
        Ok(self
            .staged
            .wallets
            .get(key)
            .is_some_and(|w| w.balance.covers(amount)))
    }
}

#[async_trait]
impl LedgerRepository for InMemoryUnitOfWork {
    async fn append(&mut self, entry: LedgerEntry) -> Result<LedgerEntry> {
        self.staged.ledger.push(entry.clone());
        Ok(entry)
    }

    async fn entries_for(
        &mut self,
        owner: &str,
        cursor: Option<Uuid>,
        limit: usize,
        exclude: &[TransactionType],
    ) -> Result<Vec<LedgerEntry>> {
        let end = match cursor {
            Some(id) => match self.staged.ledger.iter().rposition(|e| e.id == id) {
                Some(position) => position,
                None => return Ok(Vec::new()),
            },
            None => self.staged.ledger.len(),
        };
        Ok(self.staged.ledger[..end]
            .iter()
            .rev()
            .filter(|e| e.involves(owner) && !exclude.contains(&e.r#type))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn all_entries(&mut self) -> Result<Vec<LedgerEntry>> {
        Ok(self.staged.ledger.clone())
    }
}

#[async_trait]
impl CurrencyRateRepository for InMemoryUnitOfWork {
    async fn live_rate(&mut self, symbol: &str) -> Result<Option<CurrencyRate>> {
        Ok(self.staged.live_rate_mut(symbol).map(|r| r.clone()))
    }

    async fn live_rates(&mut self) -> Result<Vec<CurrencyRate>> {
        Ok(self
            .staged
            .rates
            .iter()
            .filter(|r| r.is_live())
            .cloned()
            .collect())
    }

    async fn expire_rate(&mut self, symbol: &str, at: DateTime<Utc>) -> Result<u64> {
        match self.staged.live_rate_mut(symbol) {
            Some(rate) => {
                rate.expired_at = Some(at);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn insert_rate(&mut self, rate: CurrencyRate) -> Result<()> {
        if self.staged.live_rate_mut(&rate.symbol).is_some() {
            return Err(SaleError::ValidationError(format!(
                "{} already has a live rate",
                rate.symbol
            )));
        }
        self.staged.rates.push(rate);
        Ok(())
    }

    async fn rate_history(&mut self, symbol: &str) -> Result<Vec<CurrencyRate>> {
        Ok(self
            .staged
            .rates
            .iter()
            .filter(|r| r.symbol == symbol)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CouponRepository for InMemoryUnitOfWork {
    async fn upsert_coupon(&mut self, coupon: Coupon) -> Result<()> {
        self.staged
            .coupons
            .insert(normalize_code(&coupon.code), coupon);
        Ok(())
    }

    async fn coupon(&mut self, code: &str) -> Result<Option<Coupon>> {
        Ok(self
            .staged
            .coupons
            .get(&normalize_code(code))
            .filter(|c| !c.is_deleted())
            .cloned())
    }

    async fn delete_coupon(&mut self, code: &str, at: DateTime<Utc>) -> Result<bool> {
        match self.staged.coupons.get_mut(&normalize_code(code)) {
            Some(coupon) if !coupon.is_deleted() => {
                coupon.deleted_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn commit(self: Box<Self>) -> Result<()> {
        let InMemoryUnitOfWork {
            mut committed,
            staged,
            sink,
        } = *self;
        if let Some(sink) = sink {
            sink.persist(&committed, &staged)?;
        }
        *committed = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }

    fn abort(self: Box<Self>) {}
}
