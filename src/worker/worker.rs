//! One polling worker loop.
//!
//! Workers coordinate solely through the store's atomic claim; there are no
//! cross-worker locks. Each loop owns its own cancellation flag, observed at
//! loop-top and before each idle sleep, so one process can host any number
//! of independent loops.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::job::Job;
use crate::store::JobStore;

/// Error text stored on a failed job is capped at this many characters.
const MAX_ERROR_LEN: usize = 1024;

/// How often `stop()` re-checks the current-job marker while draining.
const DRAIN_POLL: Duration = Duration::from_millis(200);

/// A claim-execute-record polling loop for one worker identity.
pub struct Worker {
    worker_id: String,
    store: Arc<dyn JobStore>,
    backoff_base: f64,
    poll_interval: Duration,
    shutdown: Arc<AtomicBool>,
    current: Arc<RwLock<Option<String>>>,
}

/// Handle for stopping a spawned worker.
pub struct WorkerHandle {
    worker_id: String,
    shutdown: Arc<AtomicBool>,
    current: Arc<RwLock<Option<String>>>,
    handle: JoinHandle<()>,
}

impl Worker {
    /// Spawn a worker loop onto the runtime and return its handle.
    pub fn spawn(
        worker_id: impl Into<String>,
        store: Arc<dyn JobStore>,
        backoff_base: f64,
        poll_interval: Duration,
    ) -> WorkerHandle {
        let worker_id = worker_id.into();
        let shutdown = Arc::new(AtomicBool::new(false));
        let current = Arc::new(RwLock::new(None));

        let worker = Worker {
            worker_id: worker_id.clone(),
            store,
            backoff_base,
            poll_interval,
            shutdown: Arc::clone(&shutdown),
            current: Arc::clone(&current),
        };
        let handle = tokio::spawn(worker.run());

        WorkerHandle {
            worker_id,
            shutdown,
            current,
            handle,
        }
    }

    async fn run(self) {
        info!(
            worker_id = %self.worker_id,
            backoff_base = self.backoff_base,
            "Worker starting"
        );

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            match self.store.claim(&self.worker_id).await {
                Ok(Some(job)) => {
                    *self.current.write().await = Some(job.id.clone());
                    self.execute(&job).await;
                    *self.current.write().await = None;
                }
                Ok(None) => {
                    // Nothing due; idle until the next poll.
                    self.idle_pause().await;
                }
                Err(e) => {
                    // Store unreachable is not fatal for the loop.
                    error!(worker_id = %self.worker_id, error = %e, "Worker loop store error");
                    self.idle_pause().await;
                }
            }
        }

        info!(worker_id = %self.worker_id, "Worker loop exited");
    }

    async fn idle_pause(&self) {
        if self.shutdown.load(Ordering::SeqCst) {
            return;
        }
        tokio::time::sleep(self.poll_interval).await;
    }

    /// Run the job's command through the shell and record the outcome.
    /// Execution failures are absorbed into the failure transition; they
    /// never escalate out of the loop.
    async fn execute(&self, job: &Job) {
        info!(
            worker_id = %self.worker_id,
            job_id = %job.id,
            command = %job.command,
            "Claimed job"
        );

        // Arbitrary shell execution is the queue's purpose; streams are
        // inherited so job output lands on the worker's own stdout/stderr.
        let outcome = Command::new("sh").arg("-c").arg(&job.command).status().await;

        match outcome {
            Ok(status) if status.success() => {
                match self.store.mark_success(&job.id).await {
                    Ok(()) => {
                        info!(worker_id = %self.worker_id, job_id = %job.id, "Job completed")
                    }
                    Err(e) => error!(
                        worker_id = %self.worker_id,
                        job_id = %job.id,
                        error = %e,
                        "Failed to record job success"
                    ),
                }
            }
            Ok(status) => {
                self.record_failure(job, &format!("command exited with {status}"))
                    .await;
            }
            Err(e) => {
                self.record_failure(job, &format!("failed to spawn command: {e}"))
                    .await;
            }
        }
    }

    async fn record_failure(&self, job: &Job, err_msg: &str) {
        let err_msg = truncate_error(err_msg);
        warn!(
            worker_id = %self.worker_id,
            job_id = %job.id,
            attempts = job.attempts,
            error = %err_msg,
            "Job failed"
        );

        if let Err(e) = self
            .store
            .mark_failure(
                &job.id,
                job.attempts,
                job.max_retries,
                &err_msg,
                self.backoff_base,
            )
            .await
        {
            error!(
                worker_id = %self.worker_id,
                job_id = %job.id,
                error = %e,
                "Failed to record job failure"
            );
        }
    }
}

impl WorkerHandle {
    /// The worker's identity string.
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Id of the job currently being executed, if any.
    pub async fn current_job(&self) -> Option<String> {
        self.current.read().await.clone()
    }

    /// Request shutdown and wait until the in-flight job (if any) has had
    /// its outcome durably recorded and the loop has exited. Running
    /// processes are never force-killed.
    pub async fn stop(self) {
        info!(worker_id = %self.worker_id, "Shutdown requested");
        self.shutdown.store(true, Ordering::SeqCst);

        while self.current.read().await.is_some() {
            debug!(worker_id = %self.worker_id, "Waiting for current job to finish");
            tokio::time::sleep(DRAIN_POLL).await;
        }

        // Joining the task closes the window between the loop-top shutdown
        // check and the current-job marker being set.
        if let Err(e) = self.handle.await {
            error!(worker_id = %self.worker_id, error = %e, "Worker task panicked");
        }
        info!(worker_id = %self.worker_id, "Worker stopped");
    }
}

/// Cap error text at `MAX_ERROR_LEN` characters.
fn truncate_error(msg: &str) -> String {
    if msg.chars().count() <= MAX_ERROR_LEN {
        msg.to_string()
    } else {
        msg.chars().take(MAX_ERROR_LEN).collect()
    }
}
