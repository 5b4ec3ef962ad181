//! Wires the application services onto a set of port adapters.

use crate::application::coordinator::{LockPolicy, SaleCoordinator, SchedulerWorker};
use crate::application::sale::SaleEngine;
use crate::application::wallet::WalletTransactions;
use crate::config::SaleConfig;
use crate::domain::ports::{
    ClockBox, JobQueueBox, LockBox, ProfileDirectoryBox, PublisherBox, StoreBox,
};
use crate::error::Result;
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::in_memory::InMemoryStore;
use crate::infrastructure::lock::InMemoryLock;
use crate::infrastructure::profiles::StaticProfileDirectory;
use crate::infrastructure::publisher::TracingPublisher;
use crate::infrastructure::queue::InMemoryJobQueue;
use crate::interfaces::service::SaleService;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct Ports {
    pub store: StoreBox,
    pub lock: LockBox,
    pub queue: JobQueueBox,
    pub publisher: PublisherBox,
    pub profiles: ProfileDirectoryBox,
    pub clock: ClockBox,
}

impl Ports {
    /// Process-local adapters for everything.
    pub fn in_memory() -> Self {
        Self::with_store(Arc::new(InMemoryStore::new()))
    }

    pub fn with_store(store: StoreBox) -> Self {
        Self {
            store,
            lock: Arc::new(InMemoryLock::new()),
            queue: Arc::new(InMemoryJobQueue::new()),
            publisher: Arc::new(TracingPublisher),
            profiles: Arc::new(StaticProfileDirectory::default()),
            clock: Arc::new(SystemClock),
        }
    }
}

pub struct SaleRuntime {
    pub config: SaleConfig,
    pub ports: Ports,
    pub engine: Arc<SaleEngine>,
    pub coordinator: Arc<SaleCoordinator>,
    pub wallets: Arc<WalletTransactions>,
    pub service: SaleService,
}

impl SaleRuntime {
    pub fn new(config: SaleConfig, ports: Ports) -> Self {
        let engine = Arc::new(SaleEngine::new(
            ports.store.clone(),
            ports.profiles.clone(),
            ports.clock.clone(),
            &config,
        ));
        let coordinator = Arc::new(SaleCoordinator::new(
            ports.store.clone(),
            ports.lock.clone(),
            ports.queue.clone(),
            engine.clone(),
            ports.clock.clone(),
            LockPolicy::from(&config.lock),
        ));
        let wallets = Arc::new(WalletTransactions::new(
            ports.store.clone(),
            engine.clone(),
            coordinator.clone(),
            ports.publisher.clone(),
            &config,
        ));
        let service = SaleService::new(
            engine.clone(),
            wallets.clone(),
            coordinator.clone(),
            config.request_timeout(),
        );
        Self {
            config,
            ports,
            engine,
            coordinator,
            wallets,
            service,
        }
    }

    /// Seeds an empty store and queues the current close job.
    pub async fn start(&self) -> Result<()> {
        if self.engine.seed_genesis(&self.config.genesis).await? {
            info!("empty store seeded with genesis tokenomics");
        }
        if let Some(job) = self.coordinator.bootstrap().await? {
            info!(job = %job.id, "bootstrap close job queued");
        }
        Ok(())
    }

    pub fn worker(&self) -> SchedulerWorker {
        SchedulerWorker::new(
            self.coordinator.clone(),
            self.ports.queue.clone(),
            self.ports.clock.clone(),
            &self.config.scheduler,
        )
    }
}
