//! Error types for queuectl.

use crate::job::JobState;

/// Top-level error type for the queue.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),
}

/// Storage-level failures. Distinct from "no job available", which claim
/// reports as `Ok(None)`.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to open database: {0}")]
    Open(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Malformed row: {0}")]
    Row(String),
}

/// Job-level errors surfaced to callers of the public queue operations.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// Enqueue input had no usable command. Rejected before persistence.
    #[error("Job input must include a non-empty \"command\" field")]
    MissingCommand,

    #[error("Job {id} not found")]
    NotFound { id: String },

    /// DLQ retry requested for a job that is not dead.
    #[error("Job {id} is in state {state}, not dead")]
    NotDead { id: String, state: JobState },
}

/// Result type alias for the queue.
pub type Result<T> = std::result::Result<T, Error>;
