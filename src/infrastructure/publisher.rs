use crate::domain::ledger::TransactionEvent;
use crate::domain::ports::EventPublisher;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Emits every event as a structured log line.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingPublisher;

#[async_trait]
impl EventPublisher for TracingPublisher {
    async fn publish(&self, event: TransactionEvent) -> Result<()> {
        info!(
            target: "sale_ledger::events",
            id = %event.id,
            user_id = %event.user_id,
            amount = %event.amount,
            symbol = %event.symbol,
            kind = %event.r#type,
            "transaction event"
        );
        Ok(())
    }
}

/// Keeps published events in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingPublisher {
    events: Arc<Mutex<Vec<TransactionEvent>>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<TransactionEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: TransactionEvent) -> Result<()> {
        self.events.lock().await.push(event);
        Ok(())
    }
}
