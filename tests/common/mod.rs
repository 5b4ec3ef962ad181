#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use sale_ledger::config::{GenesisConfig, LockConfig, RateSeed, RoundSeed, SaleConfig};
use sale_ledger::domain::ledger::{LedgerEntry, TransactionType};
use sale_ledger::domain::money::Amount;
use sale_ledger::domain::ports::{Profile, Store};
use sale_ledger::domain::round::SubRound;
use sale_ledger::domain::wallet::WalletKey;
use sale_ledger::infrastructure::clock::ManualClock;
use sale_ledger::infrastructure::in_memory::{InMemoryStore, LedgerState};
use sale_ledger::infrastructure::lock::InMemoryLock;
use sale_ledger::infrastructure::profiles::StaticProfileDirectory;
use sale_ledger::infrastructure::publisher::RecordingPublisher;
use sale_ledger::infrastructure::queue::InMemoryJobQueue;
use sale_ledger::runtime::{Ports, SaleRuntime};
use std::fs::File;
use std::io::Error;
use std::path::Path;
use std::sync::Arc;

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

pub fn round(name: &str, price: Decimal, total: Decimal, sub_rounds: u32) -> RoundSeed {
    RoundSeed {
        name: name.to_string(),
        price,
        total_tokens: total,
        sub_rounds,
        price_gap: String::new(),
    }
}

pub fn rate(symbol: &str, rate: Decimal) -> RateSeed {
    RateSeed {
        symbol: symbol.to_string(),
        rate,
    }
}

/// A config with short lock backoff and the given tokenomics.
pub fn config(rounds: Vec<RoundSeed>, rates: Vec<RateSeed>, sale_wallet: Decimal) -> SaleConfig {
    SaleConfig {
        lock: LockConfig {
            attempts: 200,
            retry_delay_ms: 2,
            lease_ms: 5_000,
            ..LockConfig::default()
        },
        genesis: GenesisConfig {
            rounds,
            rates,
            sale_wallet_balance: sale_wallet,
        },
        ..SaleConfig::default()
    }
}

pub struct Harness {
    pub runtime: SaleRuntime,
    pub store: InMemoryStore,
    pub clock: ManualClock,
    pub lock: InMemoryLock,
    pub queue: InMemoryJobQueue,
    pub publisher: RecordingPublisher,
}

impl Harness {
    pub async fn start(config: SaleConfig) -> Self {
        Self::start_with_profiles(config, Vec::new()).await
    }

    pub async fn start_with_profiles(config: SaleConfig, profiles: Vec<Profile>) -> Self {
        let store = InMemoryStore::new();
        let clock = ManualClock::new(start_time());
        let lock = InMemoryLock::new();
        let queue = InMemoryJobQueue::new();
        let publisher = RecordingPublisher::new();
        let ports = Ports {
            store: Arc::new(store.clone()),
            lock: Arc::new(lock.clone()),
            queue: Arc::new(queue.clone()),
            publisher: Arc::new(publisher.clone()),
            profiles: Arc::new(StaticProfileDirectory::new(profiles)),
            clock: Arc::new(clock.clone()),
        };
        let runtime = SaleRuntime::new(config, ports);
        runtime.start().await.unwrap();
        Self {
            runtime,
            store,
            clock,
            lock,
            queue,
            publisher,
        }
    }

    pub async fn state(&self) -> LedgerState {
        self.store.snapshot().await
    }

    /// Credits a user wallet directly, outside any use case.
    pub async fn fund(&self, key: &WalletKey, amount: Decimal) {
        let mut uow = self.store.begin().await.unwrap();
        uow.create_wallet(key).await.unwrap();
        uow.increase_balance(key, Amount::new(amount).unwrap())
            .await
            .unwrap();
        uow.commit().await.unwrap();
    }

    pub async fn balance(&self, key: &WalletKey) -> Decimal {
        self.state()
            .await
            .wallets
            .get(key)
            .map(|w| w.balance.0)
            .unwrap_or_default()
    }

    pub async fn sub_rounds(&self) -> Vec<SubRound> {
        self.state().await.sub_rounds.into_values().collect()
    }

    pub async fn entries_of_type(&self, r#type: TransactionType) -> Vec<LedgerEntry> {
        self.state()
            .await
            .ledger
            .into_iter()
            .filter(|e| e.r#type == r#type)
            .collect()
    }
}

pub fn write_commands(path: &Path, rows: &[&str]) -> Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().flexible(true).from_writer(file);
    wtr.write_record([
        "op", "user", "amount", "symbol", "source_id", "code", "kind", "reward", "cashback",
    ])?;
    for row in rows {
        let fields: Vec<&str> = row.split(',').map(str::trim).collect();
        wtr.write_record(&fields)?;
    }
    wtr.flush()?;
    Ok(())
}
