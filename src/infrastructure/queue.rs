use crate::domain::ports::{CloseJob, JobQueue};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct QueueState {
    pending: HashMap<String, CloseJob>,
    in_flight: HashMap<String, CloseJob>,
}

/// Delayed job queue deduplicated by job id while the job is pending or in
/// flight. A claimed job stays in flight until it is completed or handed back
/// for retry; once completed, the same id may be enqueued again.
#[derive(Debug, Clone, Default)]
pub struct InMemoryJobQueue {
    state: Arc<Mutex<QueueState>>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job: CloseJob) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.pending.contains_key(&job.id) || state.in_flight.contains_key(&job.id) {
            return Ok(false);
        }
        state.pending.insert(job.id.clone(), job);
        Ok(true)
    }

    async fn due(&self, now: DateTime<Utc>, max: usize) -> Result<Vec<CloseJob>> {
        let mut state = self.state.lock().await;
        let mut due: Vec<CloseJob> = state
            .pending
            .values()
            .filter(|job| job.not_before <= now)
            .cloned()
            .collect();
        due.sort_by(|a, b| a.not_before.cmp(&b.not_before).then_with(|| a.id.cmp(&b.id)));
        due.truncate(max);
        for job in &due {
            state.pending.remove(&job.id);
            state.in_flight.insert(job.id.clone(), job.clone());
        }
        Ok(due)
    }

    async fn complete(&self, job_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.in_flight.remove(job_id);
        state.pending.remove(job_id);
        Ok(())
    }

    async fn retry(&self, mut job: CloseJob, not_before: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().await;
        state.in_flight.remove(&job.id);
        job.not_before = not_before;
        state.pending.insert(job.id.clone(), job);
        Ok(())
    }

    async fn pending(&self) -> Result<Vec<CloseJob>> {
        let state = self.state.lock().await;
        let mut jobs: Vec<CloseJob> = state
            .pending
            .values()
            .chain(state.in_flight.values())
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.not_before.cmp(&b.not_before));
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_enqueue_is_idempotent() {
        let queue = InMemoryJobQueue::new();
        let job = CloseJob::new(Uuid::new_v4(), Utc::now());
        assert!(queue.enqueue(job.clone()).await.unwrap());
        assert!(!queue.enqueue(job).await.unwrap());
        assert_eq!(queue.pending().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_completed_job_can_be_enqueued_again() {
        let queue = InMemoryJobQueue::new();
        let now = Utc::now();
        let job = CloseJob::new(Uuid::new_v4(), now);
        queue.enqueue(job.clone()).await.unwrap();

        let claimed = queue.due(now, 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        // Still refused while in flight.
        assert!(!queue.enqueue(job.clone()).await.unwrap());

        queue.complete(&job.id).await.unwrap();
        assert!(queue.pending().await.unwrap().is_empty());
        assert!(queue.enqueue(job).await.unwrap());
        assert_eq!(queue.pending().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_due_claims_only_ripe_jobs() {
        let queue = InMemoryJobQueue::new();
        let now = Utc::now();
        let ripe = CloseJob::new(Uuid::new_v4(), now - Duration::seconds(1));
        let later = CloseJob::new(Uuid::new_v4(), now + Duration::minutes(5));
        queue.enqueue(ripe.clone()).await.unwrap();
        queue.enqueue(later).await.unwrap();

        let due = queue.due(now, 10).await.unwrap();
        assert_eq!(due, vec![ripe.clone()]);
        assert!(queue.due(now, 10).await.unwrap().is_empty());

        queue.retry(ripe.clone(), now).await.unwrap();
        assert_eq!(queue.due(now, 10).await.unwrap().len(), 1);
        queue.complete(&ripe.id).await.unwrap();
        assert_eq!(queue.pending().await.unwrap().len(), 1);
    }
}
