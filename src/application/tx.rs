use crate::domain::ports::{Store, UnitOfWork};
use crate::error::{Result, SaleError};
use tracing::warn;

/// Owns an open unit of work until it is committed or rolled back.
///
/// Dropping the guard without finishing it (early return, panic, a cancelled
/// future) aborts the unit of work, so no partial writes become visible.
pub struct TxGuard {
    uow: Option<Box<dyn UnitOfWork>>,
}

impl TxGuard {
    pub async fn begin(store: &dyn Store) -> Result<Self> {
        let uow = store.begin().await?;
        Ok(Self { uow: Some(uow) })
    }

    pub fn uow(&mut self) -> Result<&mut dyn UnitOfWork> {
        match self.uow.as_deref_mut() {
            Some(uow) => Ok(uow),
            None => Err(SaleError::internal("transaction already finished")),
        }
    }

    pub async fn commit(mut self) -> Result<()> {
        match self.uow.take() {
            Some(uow) => uow.commit().await,
            None => Err(SaleError::internal("transaction already finished")),
        }
    }

    pub async fn rollback(mut self) -> Result<()> {
        match self.uow.take() {
            Some(uow) => uow.rollback().await,
            None => Ok(()),
        }
    }

    /// Commits on `Ok`, rolls back on `Err`. A failed rollback is reported
    /// together with the error that caused it.
    pub async fn finish<T>(self, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(source) => match self.rollback().await {
                Ok(()) => Err(source),
                Err(rollback) => Err(SaleError::Rollback {
                    source: Box::new(source),
                    rollback: Box::new(rollback),
                }),
            },
        }
    }
}

impl Drop for TxGuard {
    fn drop(&mut self) {
        if let Some(uow) = self.uow.take() {
            warn!("transaction dropped before commit, rolling back");
            uow.abort();
        }
    }
}
