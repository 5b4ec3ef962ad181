//! Sale lock, scheduled sub-round closing and the worker that drives it.

use crate::application::sale::{CloseOutcome, SaleEngine};
use crate::application::tx::TxGuard;
use crate::config::{LockConfig, SchedulerConfig};
use crate::domain::ledger::{LedgerEntry, TransactionType};
use crate::domain::money::Amount;
use crate::domain::ports::{
    ClockBox, CloseJob, JobQueueBox, LockBox, LockToken, StoreBox, UnitOfWork,
};
use crate::domain::wallet::{WALLET_SYS_ICO, WALLET_SYS_ICO_BACKUP, WalletKey};
use crate::error::{Result, SaleError};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct LockPolicy {
    pub key: String,
    pub attempts: u32,
    pub retry_delay: Duration,
    pub lease: Duration,
}

impl From<&LockConfig> for LockPolicy {
    fn from(config: &LockConfig) -> Self {
        Self {
            key: config.key.clone(),
            attempts: config.attempts.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            lease: Duration::from_millis(config.lease_ms),
        }
    }
}

/// A held sale lock. Released explicitly with [`SaleLockGuard::release`], or
/// in the background when dropped.
pub struct SaleLockGuard {
    lock: LockBox,
    key: String,
    token: Option<LockToken>,
}

impl SaleLockGuard {
    pub fn token(&self) -> Option<LockToken> {
        self.token
    }

    /// Failures are logged, never returned: the guarded work already has
    /// its own outcome.
    pub async fn release(mut self) {
        if let Some(token) = self.token.take() {
            release_logged(&self.lock, &self.key, token).await;
        }
    }
}

impl Drop for SaleLockGuard {
    fn drop(&mut self) {
        let Some(token) = self.token.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let lock = self.lock.clone();
                let key = self.key.clone();
                handle.spawn(async move {
                    release_logged(&lock, &key, token).await;
                });
            }
            Err(_) => warn!(key = %self.key, "no runtime to release lock, lease will expire"),
        }
    }
}

async fn release_logged(lock: &LockBox, key: &str, token: LockToken) {
    match lock.release(key, token).await {
        Ok(true) => debug!(key, "lock released"),
        Ok(false) => warn!(key, "lock lease was already gone on release"),
        Err(e) => warn!(key, error = %e, "failed to release lock"),
    }
}

/// Result of running one scheduled close job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// The sub-round was closed; `swept` tokens moved to the reserve.
    Closed { swept: Decimal },
    /// The window has not ended yet. The worker hands the job back.
    NotDue,
    /// Already closed, or unknown.
    Skipped,
}

pub struct SaleCoordinator {
    store: StoreBox,
    lock: LockBox,
    queue: JobQueueBox,
    engine: Arc<SaleEngine>,
    clock: ClockBox,
    policy: LockPolicy,
}

impl SaleCoordinator {
    pub fn new(
        store: StoreBox,
        lock: LockBox,
        queue: JobQueueBox,
        engine: Arc<SaleEngine>,
        clock: ClockBox,
        policy: LockPolicy,
    ) -> Self {
        Self {
            store,
            lock,
            queue,
            engine,
            clock,
            policy,
        }
    }

    /// Takes the sale lock, retrying with a fixed delay.
    pub async fn acquire(&self) -> Result<SaleLockGuard> {
        let key = self.policy.key.as_str();
        for attempt in 1..=self.policy.attempts {
            if let Some(token) = self.lock.try_acquire(key, self.policy.lease).await? {
                debug!(key, attempt, "lock acquired");
                return Ok(SaleLockGuard {
                    lock: self.lock.clone(),
                    key: key.to_string(),
                    token: Some(token),
                });
            }
            if attempt < self.policy.attempts {
                tokio::time::sleep(self.policy.retry_delay).await;
            }
        }
        warn!(key, attempts = self.policy.attempts, "lock unavailable");
        Err(SaleError::LockUnavailable)
    }

    /// Enqueues the close job of the current sub-round. Does nothing when
    /// the sale is over or the sub-round has no window yet.
    pub async fn schedule_current(&self) -> Result<Option<CloseJob>> {
        let Some(current) = self.engine.current_sub_round().await? else {
            return Ok(None);
        };
        let Some(end_at) = current.end_at else {
            return Ok(None);
        };
        let job = CloseJob::new(current.id, end_at);
        if self.queue.enqueue(job.clone()).await? {
            info!(job = %job.id, not_before = %end_at, "close job scheduled");
        }
        Ok(Some(job))
    }

    /// Runs at startup: makes sure the current sub-round has a window and
    /// that its close job is queued.
    pub async fn bootstrap(&self) -> Result<Option<CloseJob>> {
        let guard = self.acquire().await?;
        let result = self.bootstrap_locked().await;
        guard.release().await;
        result
    }

    async fn bootstrap_locked(&self) -> Result<Option<CloseJob>> {
        let mut tx = TxGuard::begin(self.store.as_ref()).await?;
        let result = self.ensure_window(tx.uow()?).await;
        tx.finish(result).await?;
        self.schedule_current().await
    }

    async fn ensure_window(&self, uow: &mut dyn UnitOfWork) -> Result<()> {
        if let Some(mut current) = uow.current_sub_round().await?
            && current.end_at.is_none()
        {
            let now = self.clock.now();
            self.engine.open_window(uow, &mut current, now).await?;
            info!(round = current.round, sub_round = current.sub_round, "sub-round window opened");
        }
        Ok(())
    }

    /// Handler of a scheduled close job. Safe to run more than once for the
    /// same job.
    pub async fn execute_close_job(&self, job: &CloseJob) -> Result<JobOutcome> {
        let guard = self.acquire().await?;
        let result = self.execute_locked(job.sub_round_id).await;
        guard.release().await;
        result
    }

    async fn execute_locked(&self, sub_round_id: Uuid) -> Result<JobOutcome> {
        let mut tx = TxGuard::begin(self.store.as_ref()).await?;
        let result = self.close_and_sweep(tx.uow()?, sub_round_id).await;
        let outcome = tx.finish(result).await?;
        self.schedule_current().await?;
        Ok(outcome)
    }

    async fn close_and_sweep(
        &self,
        uow: &mut dyn UnitOfWork,
        sub_round_id: Uuid,
    ) -> Result<JobOutcome> {
        let Some(sub) = uow.sub_round(sub_round_id).await? else {
            warn!(id = %sub_round_id, "close job for unknown sub-round");
            return Ok(JobOutcome::Skipped);
        };
        if sub.closed {
            return Ok(JobOutcome::Skipped);
        }
        if !sub.is_expired(self.clock.now()) {
            return Ok(JobOutcome::NotDue);
        }

        if let CloseOutcome::AlreadyClosed =
            self.engine.close_sub_round(uow, &sub, sub.bought).await?
        {
            return Ok(JobOutcome::Skipped);
        }

        let remainder = sub.remaining();
        if remainder.is_zero() {
            return Ok(JobOutcome::Closed {
                swept: Decimal::ZERO,
            });
        }

        let token = self.engine.token();
        let sale = WalletKey::system(WALLET_SYS_ICO, token);
        let reserve = WalletKey::system(WALLET_SYS_ICO_BACKUP, token);
        let amount = Amount::new(remainder)?;
        if uow.decrease_balance(&sale, amount).await? == 0 {
            warn!(%remainder, "sale wallet cannot cover the sweep, skipping it");
            return Ok(JobOutcome::Closed {
                swept: Decimal::ZERO,
            });
        }
        uow.create_wallet(&reserve).await?;
        uow.increase_balance(&reserve, amount).await?;
        uow.append(
            LedgerEntry::transfer(
                TransactionType::ReserveSweep,
                WALLET_SYS_ICO,
                WALLET_SYS_ICO_BACKUP,
                token,
                remainder,
            )
            .with_source_id(format!("{}-{}", sub.round, sub.sub_round)),
        )
        .await?;
        info!(
            round = sub.round,
            sub_round = sub.sub_round,
            %remainder,
            "unsold tokens swept to reserve"
        );
        Ok(JobOutcome::Closed { swept: remainder })
    }
}

/// Polls the job queue and runs due close jobs until told to stop.
pub struct SchedulerWorker {
    coordinator: Arc<SaleCoordinator>,
    queue: JobQueueBox,
    clock: ClockBox,
    tick: Duration,
    batch: usize,
    max_retries: u32,
    retry_delay: chrono::Duration,
}

impl SchedulerWorker {
    pub fn new(
        coordinator: Arc<SaleCoordinator>,
        queue: JobQueueBox,
        clock: ClockBox,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            coordinator,
            queue,
            clock,
            tick: Duration::from_millis(config.tick_ms.max(1)),
            batch: config.batch.max(1),
            max_retries: config.max_retries,
            retry_delay: chrono::Duration::milliseconds(config.retry_delay_ms as i64),
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(tick_ms = self.tick.as_millis() as u64, "scheduler started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_due().await {
                        error!(error = %e, "scheduler tick failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("scheduler stopped");
    }

    /// Runs every job that is due now. Returns how many were handled.
    pub async fn run_due(&self) -> Result<usize> {
        let now = self.clock.now();
        let jobs = self.queue.due(now, self.batch).await?;
        let handled = jobs.len();
        for job in jobs {
            match self.coordinator.execute_close_job(&job).await {
                Ok(JobOutcome::NotDue) => {
                    // Clocks disagree on the window end; try again later.
                    let not_before = job.not_before.max(now + self.retry_delay);
                    debug!(job = %job.id, %not_before, "close job fired early, requeued");
                    self.queue.retry(job, not_before).await?;
                }
                Ok(outcome) => {
                    debug!(job = %job.id, ?outcome, "close job done");
                    self.queue.complete(&job.id).await?;
                }
                Err(e) if job.attempts < self.max_retries => {
                    warn!(
                        job = %job.id,
                        attempt = job.attempts + 1,
                        error = %e,
                        "close job failed, retrying"
                    );
                    let mut retry = job.clone();
                    retry.attempts += 1;
                    self.queue.retry(retry, now + self.retry_delay).await?;
                }
                Err(e) => {
                    error!(job = %job.id, error = %e, "close job failed, giving up");
                    self.queue.complete(&job.id).await?;
                }
            }
        }
        Ok(handled)
    }
}
