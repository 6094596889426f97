//! Job records and the job state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// State of a job. Variant order follows the lifecycle, so derived
/// ordering groups status summaries sensibly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting to be claimed.
    Pending,
    /// Claimed by a worker; the command is running.
    Processing,
    /// Command exited 0. Terminal.
    Completed,
    /// Command failed; rescheduled with backoff, claimable once `next_run`
    /// elapses.
    Failed,
    /// Retry budget exhausted. Terminal unless manually retried from the DLQ.
    Dead,
}

impl JobState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: JobState) -> bool {
        use JobState::*;

        matches!(
            (self, target),
            // Claim
            (Pending, Processing) | (Failed, Processing) |
            // Outcome
            (Processing, Completed) | (Processing, Failed) | (Processing, Dead) |
            // Manual DLQ retry
            (Dead, Pending)
        )
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Dead)
    }

    /// Parse the DB string form.
    pub fn parse(s: &str) -> Option<JobState> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "dead" => Some(Self::Dead),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Dead => "dead",
        };
        write!(f, "{s}")
    }
}

/// A persisted job record.
///
/// `id` and `command` never change after creation. `locked_by` is set iff
/// the job is processing.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: String,
    pub command: String,
    pub state: JobState,
    pub attempts: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Earliest epoch-ms eligible time; 0 = immediately eligible.
    pub next_run: i64,
    pub locked_by: Option<String>,
    pub last_error: Option<String>,
}

/// Enqueue input. Only `command` is required.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewJob {
    #[serde(default)]
    pub command: String,
    pub id: Option<String>,
    pub state: Option<JobState>,
    pub attempts: Option<u32>,
    pub max_retries: Option<u32>,
    pub next_run: Option<i64>,
}

impl NewJob {
    /// Enqueue input for a command with all defaults.
    pub fn command(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    /// Override the retry ceiling.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// The id to persist: caller-specified or a fresh UUID.
    pub fn id_or_generate(&self) -> String {
        self.id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string())
    }
}
