//! Queue facade — the operations the CLI layer consumes.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::config::{DEFAULT_BASE_BACKOFF, DEFAULT_MAX_RETRIES, KEY_BASE_BACKOFF, KEY_MAX_RETRIES};
use crate::error::{JobError, Result};
use crate::job::{Job, JobState, NewJob};
use crate::store::{JobStore, LibSqlBackend};

/// Public queue operations over a shared job store.
#[derive(Clone)]
pub struct Queue {
    store: Arc<dyn JobStore>,
}

impl Queue {
    /// Wrap an existing store.
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Open (or create) the queue database at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        let store = LibSqlBackend::open(path).await?;
        Ok(Self::new(Arc::new(store)))
    }

    /// In-memory queue (for tests).
    pub async fn open_memory() -> Result<Self> {
        let store = LibSqlBackend::open_memory().await?;
        Ok(Self::new(Arc::new(store)))
    }

    /// The underlying store, shared with worker loops.
    pub fn store(&self) -> Arc<dyn JobStore> {
        Arc::clone(&self.store)
    }

    /// Validate and persist a new job. Returns its id.
    pub async fn enqueue(&self, input: NewJob) -> Result<String> {
        if input.command.trim().is_empty() {
            return Err(JobError::MissingCommand.into());
        }
        let id = self.store.insert(&input).await?;
        info!(job_id = %id, command = %input.command, "Job enqueued");
        Ok(id)
    }

    /// Fetch a job by id.
    pub async fn get(&self, id: &str) -> Result<Option<Job>> {
        Ok(self.store.get_by_id(id).await?)
    }

    /// List jobs, optionally filtered by state, oldest first.
    pub async fn list(&self, state: Option<JobState>) -> Result<Vec<Job>> {
        Ok(self.store.list_by_state(state).await?)
    }

    /// Per-state job counts.
    pub async fn status_summary(&self) -> Result<BTreeMap<JobState, u64>> {
        Ok(self.store.count_by_state().await?)
    }

    /// Jobs that exhausted their retry budget.
    pub async fn dlq_list(&self) -> Result<Vec<Job>> {
        Ok(self.store.list_by_state(Some(JobState::Dead)).await?)
    }

    /// Manually move a dead job back to pending with a fresh retry budget.
    pub async fn dlq_retry(&self, id: &str) -> Result<()> {
        let job = self
            .store
            .get_by_id(id)
            .await?
            .ok_or_else(|| JobError::NotFound { id: id.to_string() })?;

        if job.state != JobState::Dead {
            return Err(JobError::NotDead {
                id: id.to_string(),
                state: job.state,
            }
            .into());
        }

        self.store.reset_to_pending(id).await?;
        info!(job_id = %id, "Job moved from DLQ back to pending");
        Ok(())
    }

    /// Read a raw configuration value.
    pub async fn config_get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.store.config_get(key).await?)
    }

    /// Write a configuration value.
    pub async fn config_set(&self, key: &str, value: &str) -> Result<()> {
        self.store.config_set(key, value).await?;
        info!(key, value, "Config updated");
        Ok(())
    }

    /// The retry ceiling applied to jobs enqueued without one.
    pub async fn max_retries_default(&self) -> Result<u32> {
        Ok(self
            .store
            .config_get(KEY_MAX_RETRIES)
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_RETRIES))
    }

    /// The exponential backoff base for failure rescheduling.
    pub async fn backoff_base(&self) -> Result<f64> {
        Ok(self
            .store
            .config_get(KEY_BASE_BACKOFF)
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_BASE_BACKOFF))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[tokio::test]
    async fn enqueue_rejects_missing_command() {
        let queue = Queue::open_memory().await.unwrap();
        let err = queue.enqueue(NewJob::default()).await.unwrap_err();
        assert!(matches!(err, Error::Job(JobError::MissingCommand)));

        let err = queue.enqueue(NewJob::command("   ")).await.unwrap_err();
        assert!(matches!(err, Error::Job(JobError::MissingCommand)));
    }

    #[tokio::test]
    async fn enqueue_roundtrip() {
        let queue = Queue::open_memory().await.unwrap();
        let id = queue
            .enqueue(NewJob::command("echo hi").with_max_retries(4))
            .await
            .unwrap();

        let job = queue.get(&id).await.unwrap().unwrap();
        assert_eq!(job.command, "echo hi");
        assert_eq!(job.max_retries, 4);
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.attempts, 0);
    }

    #[tokio::test]
    async fn dlq_retry_unknown_id() {
        let queue = Queue::open_memory().await.unwrap();
        let err = queue.dlq_retry("no-such-job").await.unwrap_err();
        assert!(matches!(err, Error::Job(JobError::NotFound { .. })));
    }

    #[tokio::test]
    async fn dlq_retry_rejects_non_dead_without_mutation() {
        let queue = Queue::open_memory().await.unwrap();
        let id = queue.enqueue(NewJob::command("true")).await.unwrap();

        let err = queue.dlq_retry(&id).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Job(JobError::NotDead {
                state: JobState::Pending,
                ..
            })
        ));

        // No mutation happened.
        let job = queue.get(&id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.attempts, 0);
    }

    #[tokio::test]
    async fn dlq_retry_resets_dead_job() {
        let queue = Queue::open_memory().await.unwrap();
        let id = queue
            .enqueue(NewJob::command("exit 1").with_max_retries(0))
            .await
            .unwrap();

        let store = queue.store();
        store.claim("worker-a").await.unwrap().unwrap();
        store
            .mark_failure(&id, 0, 0, "exit status 1", 2.0)
            .await
            .unwrap();

        assert_eq!(queue.dlq_list().await.unwrap().len(), 1);
        queue.dlq_retry(&id).await.unwrap();

        let job = queue.get(&id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.next_run, 0);
        assert!(job.last_error.is_none());
        assert!(queue.dlq_list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn typed_config_helpers_fall_back_on_garbage() {
        let queue = Queue::open_memory().await.unwrap();
        assert_eq!(queue.max_retries_default().await.unwrap(), 3);
        assert_eq!(queue.backoff_base().await.unwrap(), 2.0);

        queue.config_set(KEY_BASE_BACKOFF, "2.5").await.unwrap();
        assert_eq!(queue.backoff_base().await.unwrap(), 2.5);

        queue.config_set(KEY_MAX_RETRIES, "not-a-number").await.unwrap();
        assert_eq!(queue.max_retries_default().await.unwrap(), 3);
    }
}
