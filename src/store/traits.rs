//! Backend-agnostic store trait.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::job::{Job, JobState, NewJob};

/// Durable job store. The `claim` operation is the queue's only
/// synchronization primitive: it must flip exactly one due job to
/// processing with a single conditional write, so that concurrent claims
/// against the same job cannot both succeed.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job record and return its id.
    ///
    /// Input validation (non-empty command) happens in `Queue::enqueue`
    /// before this is called.
    async fn insert(&self, input: &NewJob) -> Result<String, StoreError>;

    /// Atomically claim the oldest due job for `worker_id`.
    ///
    /// Returns `Ok(None)` both when nothing is due and when another worker
    /// won the conditional write (a lost race is not an error). Never
    /// blocks waiting for work.
    async fn claim(&self, worker_id: &str) -> Result<Option<Job>, StoreError>;

    /// Record a successful execution: completed, lock cleared.
    async fn mark_success(&self, id: &str) -> Result<(), StoreError>;

    /// Record a failed execution. With `attempts_before + 1 <= max_retries`
    /// the job goes back to failed with an exponential-backoff `next_run`;
    /// otherwise it goes to dead. Lock cleared either way.
    async fn mark_failure(
        &self,
        id: &str,
        attempts_before: u32,
        max_retries: u32,
        err_msg: &str,
        backoff_base: f64,
    ) -> Result<(), StoreError>;

    /// Fetch a job by id.
    async fn get_by_id(&self, id: &str) -> Result<Option<Job>, StoreError>;

    /// List jobs, optionally filtered by state, ordered by `created_at`
    /// ascending.
    async fn list_by_state(&self, state: Option<JobState>) -> Result<Vec<Job>, StoreError>;

    /// Per-state job counts.
    async fn count_by_state(&self) -> Result<BTreeMap<JobState, u64>, StoreError>;

    /// Manual DLQ retry: back to pending with `attempts = 0`,
    /// `next_run = 0`, `last_error` cleared.
    ///
    /// State checks (job exists, job is dead) happen in `Queue::dlq_retry`.
    async fn reset_to_pending(&self, id: &str) -> Result<(), StoreError>;

    /// Read a configuration value.
    async fn config_get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a configuration value.
    async fn config_set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}
