use crate::domain::ports::{DistributedLock, LockToken};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct Lease {
    token: LockToken,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct LockTable {
    leases: HashMap<String, Lease>,
    next_token: u64,
}

/// Process-local lease lock. A lease that outlives its duration can be taken
/// over, and every grant carries a fresh fencing token so a stale holder's
/// release is rejected.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLock {
    table: Arc<Mutex<LockTable>>,
}

impl InMemoryLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_held(&self, key: &str) -> bool {
        let table = self.table.lock().await;
        table
            .leases
            .get(key)
            .is_some_and(|lease| lease.expires_at > Instant::now())
    }
}

#[async_trait]
impl DistributedLock for InMemoryLock {
    async fn try_acquire(&self, key: &str, lease: Duration) -> Result<Option<LockToken>> {
        let mut table = self.table.lock().await;
        let now = Instant::now();
        if let Some(current) = table.leases.get(key)
            && current.expires_at > now
        {
            return Ok(None);
        }
        table.next_token += 1;
        let token = LockToken(table.next_token);
        table.leases.insert(
            key.to_string(),
            Lease {
                token,
                expires_at: now + lease,
            },
        );
        Ok(Some(token))
    }

    async fn release(&self, key: &str, token: LockToken) -> Result<bool> {
        let mut table = self.table.lock().await;
        match table.leases.get(key) {
            Some(lease) if lease.token == token => {
                let live = lease.expires_at > Instant::now();
                table.leases.remove(key);
                Ok(live)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_second_holder_is_refused() {
        let lock = InMemoryLock::new();
        let lease = Duration::from_secs(5);
        let token = lock.try_acquire("ico-sale", lease).await.unwrap().unwrap();
        assert!(lock.try_acquire("ico-sale", lease).await.unwrap().is_none());
        assert!(lock.try_acquire("other", lease).await.unwrap().is_some());

        assert!(lock.release("ico-sale", token).await.unwrap());
        assert!(lock.try_acquire("ico-sale", lease).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lease_is_taken_over() {
        let lock = InMemoryLock::new();
        let stale = lock
            .try_acquire("ico-sale", Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        tokio::time::advance(Duration::from_millis(150)).await;

        let fresh = lock
            .try_acquire("ico-sale", Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_ne!(stale, fresh);
        assert!(!lock.release("ico-sale", stale).await.unwrap());
        assert!(lock.is_held("ico-sale").await);
    }
}
