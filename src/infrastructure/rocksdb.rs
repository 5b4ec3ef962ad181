use crate::domain::ports::{Store, UnitOfWork};
use crate::error::{Result, SaleError};
use crate::infrastructure::in_memory::{CommitSink, InMemoryStore, LedgerState};
use async_trait::async_trait;
use rocksdb::{ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

pub const CF_ROUNDS: &str = "rounds";
pub const CF_SUB_ROUNDS: &str = "sub_rounds";
pub const CF_HISTORIES: &str = "purchase_histories";
pub const CF_WALLETS: &str = "wallets";
pub const CF_LEDGER: &str = "ledger";
pub const CF_RATES: &str = "currency_rates";
pub const CF_COUPONS: &str = "coupons";

const COLUMN_FAMILIES: [&str; 7] = [
    CF_ROUNDS,
    CF_SUB_ROUNDS,
    CF_HISTORIES,
    CF_WALLETS,
    CF_LEDGER,
    CF_RATES,
    CF_COUPONS,
];

/// A persistent store backed by RocksDB, one column family per entity.
///
/// The committed state is loaded into memory on open and units of work run
/// against it exactly as in [`InMemoryStore`]; each commit writes the changed
/// rows in a single `WriteBatch` before it becomes visible. Finding those rows
/// diffs every map, so a commit costs O(total state) on top of the staging
/// clone.
#[derive(Clone)]
pub struct RocksDBStore {
    inner: InMemoryStore,
}

struct RocksSink {
    db: Arc<DB>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at `path` and loads its contents.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect::<Vec<_>>();
        let db = Arc::new(DB::open_cf_descriptors(&opts, path, descriptors)?);

        let state = load_state(&db)?;
        info!(
            rounds = state.rounds.len(),
            wallets = state.wallets.len(),
            ledger = state.ledger.len(),
            "rocksdb state loaded"
        );
        let sink: Arc<dyn CommitSink> = Arc::new(RocksSink { db });
        Ok(Self {
            inner: InMemoryStore::with_state(state, Some(sink)),
        })
    }

    pub async fn snapshot(&self) -> LedgerState {
        self.inner.snapshot().await
    }
}

#[async_trait]
impl Store for RocksDBStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        self.inner.begin().await
    }
}

fn cf<'a>(db: &'a DB, name: &str) -> Result<&'a rocksdb::ColumnFamily> {
    db.cf_handle(name)
        .ok_or_else(|| SaleError::internal(format!("{name} column family not found")))
}

fn read_all<T: DeserializeOwned>(db: &DB, name: &str) -> Result<Vec<T>> {
    let handle = cf(db, name)?;
    let mut rows = Vec::new();
    for item in db.iterator_cf(handle, IteratorMode::Start) {
        let (_key, value) = item?;
        rows.push(serde_json::from_slice(&value)?);
    }
    Ok(rows)
}

fn load_state(db: &DB) -> Result<LedgerState> {
    let mut state = LedgerState::default();
    for round in read_all::<crate::domain::round::Round>(db, CF_ROUNDS)? {
        state.rounds.insert(round.round, round);
    }
    for sub in read_all::<crate::domain::round::SubRound>(db, CF_SUB_ROUNDS)? {
        state.sub_rounds.insert(sub.position(), sub);
    }
    for wallet in read_all::<crate::domain::wallet::Wallet>(db, CF_WALLETS)? {
        state.wallets.insert(wallet.key.clone(), wallet);
    }
    for coupon in read_all::<crate::domain::coupon::Coupon>(db, CF_COUPONS)? {
        state.coupons.insert(coupon.code.clone(), coupon);
    }
    // Sequence keys are big-endian, so iteration order is insertion order.
    state.histories = read_all(db, CF_HISTORIES)?;
    state.ledger = read_all(db, CF_LEDGER)?;
    state.rates = read_all(db, CF_RATES)?;
    Ok(state)
}

/// Rows whose value changed between the two maps.
fn changed_in_map<'a, K: Ord, V: PartialEq>(
    before: &BTreeMap<K, V>,
    after: &'a BTreeMap<K, V>,
) -> impl Iterator<Item = (&'a K, &'a V)> {
    after
        .iter()
        .filter(move |(k, v)| before.get(*k) != Some(*v))
}

/// Rows of an append-mostly list that are new or were modified in place.
fn changed_in_seq<'a, V: PartialEq>(
    before: &'a [V],
    after: &'a [V],
) -> impl Iterator<Item = (u64, &'a V)> {
    after
        .iter()
        .enumerate()
        .filter(move |(i, v)| before.get(*i) != Some(*v))
        .map(|(i, v)| (i as u64, v))
}

impl RocksSink {
    fn put<V: Serialize>(
        &self,
        batch: &mut WriteBatch,
        name: &str,
        key: &[u8],
        value: &V,
    ) -> Result<()> {
        let handle = cf(&self.db, name)?;
        batch.put_cf(handle, key, serde_json::to_vec(value)?);
        Ok(())
    }
}

impl CommitSink for RocksSink {
    fn persist(&self, before: &LedgerState, after: &LedgerState) -> Result<()> {
        let mut batch = WriteBatch::default();

        for (number, round) in changed_in_map(&before.rounds, &after.rounds) {
            self.put(&mut batch, CF_ROUNDS, &number.to_be_bytes(), round)?;
        }
        for ((round, sub), sub_round) in changed_in_map(&before.sub_rounds, &after.sub_rounds) {
            let key = [round.to_be_bytes(), sub.to_be_bytes()].concat();
            self.put(&mut batch, CF_SUB_ROUNDS, &key, sub_round)?;
        }
        for (key, wallet) in changed_in_map(&before.wallets, &after.wallets) {
            self.put(&mut batch, CF_WALLETS, &serde_json::to_vec(key)?, wallet)?;
        }
        for (code, coupon) in changed_in_map(&before.coupons, &after.coupons) {
            self.put(&mut batch, CF_COUPONS, code.as_bytes(), coupon)?;
        }
        for (seq, history) in changed_in_seq(&before.histories, &after.histories) {
            self.put(&mut batch, CF_HISTORIES, &seq.to_be_bytes(), history)?;
        }
        for (seq, entry) in changed_in_seq(&before.ledger, &after.ledger) {
            self.put(&mut batch, CF_LEDGER, &seq.to_be_bytes(), entry)?;
        }
        for (seq, rate) in changed_in_seq(&before.rates, &after.rates) {
            self.put(&mut batch, CF_RATES, &seq.to_be_bytes(), rate)?;
        }

        let rows = batch.len();
        if rows > 0 {
            self.db.write(batch)?;
        }
        debug!(rows, "commit persisted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::{Amount, Balance};
    use crate::domain::wallet::WalletKey;
    use rust_decimal_macros::dec;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_committed_state_survives_reopen() {
        let dir = tempdir().unwrap();
        let key = WalletKey::user("u1", "IND");
        {
            let store = RocksDBStore::open(dir.path()).unwrap();
            let mut uow = store.begin().await.unwrap();
            uow.create_wallet(&key).await.unwrap();
            uow.increase_balance(&key, Amount::new(dec!(42)).unwrap())
                .await
                .unwrap();
            uow.commit().await.unwrap();

            let mut uow = store.begin().await.unwrap();
            uow.increase_balance(&key, Amount::new(dec!(1)).unwrap())
                .await
                .unwrap();
            uow.rollback().await.unwrap();
        }

        let store = RocksDBStore::open(dir.path()).unwrap();
        let state = store.snapshot().await;
        assert_eq!(state.wallets[&key].balance, Balance::new(dec!(42)));
    }
}
