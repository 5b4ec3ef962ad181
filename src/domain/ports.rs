use super::coupon::Coupon;
use super::currency::CurrencyRate;
use super::ledger::{LedgerEntry, TransactionEvent, TransactionType};
use super::money::Amount;
use super::round::{BuyerRank, PurchaseHistory, Round, SubRound};
use super::wallet::{Wallet, WalletKey};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[async_trait]
pub trait RoundRepository: Send {
    async fn insert_round(&mut self, round: Round, sub_rounds: Vec<SubRound>) -> Result<()>;
    async fn rounds(&mut self) -> Result<Vec<Round>>;
    async fn round(&mut self, round: u32) -> Result<Option<Round>>;
    /// Stamps `ended_at` unless already set. Returns whether it was stamped.
    async fn end_round(&mut self, round: u32, at: DateTime<Utc>) -> Result<bool>;

    /// First not-closed sub-round ordered by `(round, sub_round)`.
    async fn current_sub_round(&mut self) -> Result<Option<SubRound>>;
    async fn sub_round(&mut self, id: Uuid) -> Result<Option<SubRound>>;
    async fn update_sub_round_bought(&mut self, id: Uuid, bought: Decimal) -> Result<()>;
    /// Compare-and-swap on the open flag. `false` means somebody else closed it.
    async fn close_sub_round(&mut self, id: Uuid, bought: Decimal) -> Result<bool>;
    async fn set_sub_round_window(
        &mut self,
        id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<()>;

    async fn save_histories(&mut self, histories: Vec<PurchaseHistory>) -> Result<()>;
    async fn histories(&mut self, buyer: Option<&str>) -> Result<Vec<PurchaseHistory>>;
    /// Buyers ranked by total tokens, descending.
    async fn buyer_ranking(&mut self, limit: usize, offset: usize) -> Result<Vec<BuyerRank>>;
    async fn buyer_count(&mut self) -> Result<usize>;
}

#[async_trait]
pub trait WalletRepository: Send {
    async fn all_wallets(&mut self) -> Result<Vec<Wallet>>;
    async fn wallets_of(&mut self, owner: &str) -> Result<Vec<Wallet>>;
    async fn wallet(&mut self, key: &WalletKey) -> Result<Option<Wallet>>;
    /// Creates an empty wallet; an existing wallet is returned untouched.
    async fn create_wallet(&mut self, key: &WalletKey) -> Result<Wallet>;
    /// Rows affected: 0 when the wallet does not exist.
    async fn increase_balance(&mut self, key: &WalletKey, amount: Amount) -> Result<u64>;
    /// Decrement only if `balance >= amount`. Rows affected: 0 when the
    /// balance does not cover the amount or the wallet does not exist.
    async fn decrease_balance(&mut self, key: &WalletKey, amount: Amount) -> Result<u64>;
    async fn has_balance(&mut self, key: &WalletKey, amount: Amount) -> Result<bool>;
}

#[async_trait]
pub trait LedgerRepository: Send {
    async fn append(&mut self, entry: LedgerEntry) -> Result<LedgerEntry>;
    /// Entries where `owner` is either side, newest first, strictly older
    /// than `cursor` when given.
    async fn entries_for(
        &mut self,
        owner: &str,
        cursor: Option<Uuid>,
        limit: usize,
        exclude: &[TransactionType],
    ) -> Result<Vec<LedgerEntry>>;
    async fn all_entries(&mut self) -> Result<Vec<LedgerEntry>>;
}

#[async_trait]
pub trait CurrencyRateRepository: Send {
    async fn live_rate(&mut self, symbol: &str) -> Result<Option<CurrencyRate>>;
    async fn live_rates(&mut self) -> Result<Vec<CurrencyRate>>;
    /// Stamps `expired_at` on the live row of `symbol`.
    async fn expire_rate(&mut self, symbol: &str, at: DateTime<Utc>) -> Result<u64>;
    async fn insert_rate(&mut self, rate: CurrencyRate) -> Result<()>;
    async fn rate_history(&mut self, symbol: &str) -> Result<Vec<CurrencyRate>>;
}

#[async_trait]
pub trait CouponRepository: Send {
    /// Inserts or overwrites by code.
    async fn upsert_coupon(&mut self, coupon: Coupon) -> Result<()>;
    /// Case-insensitive lookup that skips soft-deleted coupons.
    async fn coupon(&mut self, code: &str) -> Result<Option<Coupon>>;
    async fn delete_coupon(&mut self, code: &str, at: DateTime<Utc>) -> Result<bool>;
}

/// A transaction scope over every repository. Changes become visible to
/// other units of work only after `commit`.
#[async_trait]
pub trait UnitOfWork:
    RoundRepository
    + WalletRepository
    + LedgerRepository
    + CurrencyRateRepository
    + CouponRepository
{
    async fn commit(self: Box<Self>) -> Result<()>;
    async fn rollback(self: Box<Self>) -> Result<()>;
    /// Synchronous discard, used from `Drop` when no async rollback is possible.
    fn abort(self: Box<Self>);
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>>;
}

/// Fencing token handed out with a lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockToken(pub u64);

/// Lease-based mutex shared by every service instance.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Single attempt. `None` when another holder owns a live lease.
    async fn try_acquire(&self, key: &str, lease: Duration) -> Result<Option<LockToken>>;
    /// Returns `false` if the lease already expired or was taken over.
    async fn release(&self, key: &str, token: LockToken) -> Result<bool>;
}

/// "Close this sub-round no earlier than `not_before`."
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseJob {
    pub id: String,
    pub sub_round_id: Uuid,
    pub not_before: DateTime<Utc>,
    pub attempts: u32,
}

impl CloseJob {
    pub fn new(sub_round_id: Uuid, not_before: DateTime<Utc>) -> Self {
        Self {
            id: format!("{}-{}", sub_round_id, not_before.timestamp()),
            sub_round_id,
            not_before,
            attempts: 0,
        }
    }
}

/// Delayed, deduplicated, at-least-once job delivery.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Returns `false` when a job with the same id is still pending or in flight.
    async fn enqueue(&self, job: CloseJob) -> Result<bool>;
    /// Claims up to `max` jobs whose `not_before` has passed.
    async fn due(&self, now: DateTime<Utc>, max: usize) -> Result<Vec<CloseJob>>;
    async fn complete(&self, job_id: &str) -> Result<()>;
    async fn retry(&self, job: CloseJob, not_before: DateTime<Utc>) -> Result<()>;
    async fn pending(&self) -> Result<Vec<CloseJob>>;
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: TransactionEvent) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub email: String,
    pub full_name: String,
}

#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    async fn profiles(&self, ids: &[String]) -> Result<HashMap<String, Profile>>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub type StoreBox = Arc<dyn Store>;
pub type LockBox = Arc<dyn DistributedLock>;
pub type JobQueueBox = Arc<dyn JobQueue>;
pub type PublisherBox = Arc<dyn EventPublisher>;
pub type ProfileDirectoryBox = Arc<dyn ProfileDirectory>;
pub type ClockBox = Arc<dyn Clock>;
