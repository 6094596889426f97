//! libSQL backend — async `JobStore` implementation.
//!
//! Supports local file and in-memory databases. All mutual exclusion
//! between workers comes from the conditional UPDATE in [`claim`]: the
//! write is guarded by the state observed at selection time, and a
//! zero-rows-affected result means another worker won the race.
//!
//! [`claim`]: JobStore::claim

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::backoff;
use crate::config::{DEFAULT_MAX_RETRIES, KEY_MAX_RETRIES};
use crate::error::StoreError;
use crate::job::{Job, JobState, NewJob};
use crate::store::traits::JobStore;

const JOB_COLUMNS: &str = "id, command, state, attempts, max_retries, created_at, updated_at, next_run, locked_by, last_error";

/// libSQL job store.
///
/// Holds a single connection reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and initialize the schema.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Open(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Open(format!("Failed to open database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Open(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        info!(path = %path.display(), "Job store opened");
        Ok(backend)
    }

    /// Create an in-memory store (for tests).
    pub async fn open_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| StoreError::Open(format!("Failed to create in-memory database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Open(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Create tables and seed config defaults if absent.
    async fn init_schema(&self) -> Result<(), StoreError> {
        self.conn()
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS jobs (
                    id TEXT PRIMARY KEY,
                    command TEXT NOT NULL,
                    state TEXT NOT NULL,
                    attempts INTEGER NOT NULL DEFAULT 0,
                    max_retries INTEGER NOT NULL DEFAULT 3,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    next_run INTEGER NOT NULL DEFAULT 0,
                    locked_by TEXT,
                    last_error TEXT
                );
                CREATE INDEX IF NOT EXISTS idx_jobs_state ON jobs(state);
                CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs(created_at);

                CREATE TABLE IF NOT EXISTS config (
                    key TEXT PRIMARY KEY,
                    value TEXT
                );

                INSERT OR IGNORE INTO config (key, value) VALUES ('max_retries', '3');
                INSERT OR IGNORE INTO config (key, value) VALUES ('base_backoff', '2');",
            )
            .await
            .map_err(|e| StoreError::Query(format!("init_schema: {e}")))?;
        Ok(())
    }

    /// Conditional write half of a claim. The guard re-checks both the
    /// observed state and due-ness against the observation time, so a job
    /// another worker claimed, failed, and rescheduled in the meantime is
    /// not picked up before its fresh next_run.
    async fn try_lock(
        &self,
        id: &str,
        observed_state: &str,
        observed_at_ms: i64,
        worker_id: &str,
    ) -> Result<bool, StoreError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE jobs SET state = 'processing', locked_by = ?1, updated_at = ?2
                 WHERE id = ?3 AND state = ?4 AND next_run <= ?5",
                params![
                    worker_id,
                    Utc::now().to_rfc3339(),
                    id,
                    observed_state,
                    observed_at_ms
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("claim update: {e}")))?;
        Ok(affected == 1)
    }

    /// Resolve the retry ceiling for a new job: explicit input, else the
    /// config-store default, else the built-in default.
    async fn default_max_retries(&self) -> Result<u32, StoreError> {
        Ok(self
            .config_get(KEY_MAX_RETRIES)
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_RETRIES))
    }
}

// ── Row helpers ─────────────────────────────────────────────────────

/// Parse an RFC 3339 timestamp as persisted by this backend.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Row(format!("bad timestamp {s:?}: {e}")))
}

fn row_to_job(row: &libsql::Row) -> Result<Job, StoreError> {
    let text = |idx: i32| -> Result<String, StoreError> {
        row.get::<String>(idx)
            .map_err(|e| StoreError::Row(format!("column {idx}: {e}")))
    };
    let opt_text = |idx: i32| -> Result<Option<String>, StoreError> {
        row.get::<Option<String>>(idx)
            .map_err(|e| StoreError::Row(format!("column {idx}: {e}")))
    };
    let int = |idx: i32| -> Result<i64, StoreError> {
        row.get::<i64>(idx)
            .map_err(|e| StoreError::Row(format!("column {idx}: {e}")))
    };

    let state_str = text(2)?;
    let state = JobState::parse(&state_str)
        .ok_or_else(|| StoreError::Row(format!("unknown job state {state_str:?}")))?;

    Ok(Job {
        id: text(0)?,
        command: text(1)?,
        state,
        attempts: int(3)? as u32,
        max_retries: int(4)? as u32,
        created_at: parse_datetime(&text(5)?)?,
        updated_at: parse_datetime(&text(6)?)?,
        next_run: int(7)?,
        locked_by: opt_text(8)?,
        last_error: opt_text(9)?,
    })
}

#[async_trait]
impl JobStore for LibSqlBackend {
    async fn insert(&self, input: &NewJob) -> Result<String, StoreError> {
        let id = input.id_or_generate();
        let now = Utc::now().to_rfc3339();
        let state = input.state.unwrap_or(JobState::Pending);
        let max_retries = match input.max_retries {
            Some(n) => n,
            None => self.default_max_retries().await?,
        };

        self.conn()
            .execute(
                "INSERT INTO jobs (id, command, state, attempts, max_retries, created_at, updated_at, next_run, locked_by, last_error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?7, NULL, NULL)",
                params![
                    id.clone(),
                    input.command.clone(),
                    state.to_string(),
                    input.attempts.unwrap_or(0) as i64,
                    max_retries as i64,
                    now,
                    input.next_run.unwrap_or(0),
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("insert: {e}")))?;

        debug!(job_id = %id, state = %state, "Job inserted");
        Ok(id)
    }

    async fn claim(&self, worker_id: &str) -> Result<Option<Job>, StoreError> {
        let now_ms = Utc::now().timestamp_millis();

        // Oldest due job. Failed jobs whose backoff has elapsed are due too,
        // so automatic retries happen without a separate requeue step.
        let mut rows = self
            .conn()
            .query(
                "SELECT id, state FROM jobs
                 WHERE state IN ('pending', 'failed') AND next_run <= ?1
                 ORDER BY created_at
                 LIMIT 1",
                params![now_ms],
            )
            .await
            .map_err(|e| StoreError::Query(format!("claim select: {e}")))?;

        let (id, observed_state) = match rows.next().await {
            Ok(Some(row)) => {
                let id: String = row
                    .get(0)
                    .map_err(|e| StoreError::Row(format!("claim id: {e}")))?;
                let state: String = row
                    .get(1)
                    .map_err(|e| StoreError::Row(format!("claim state: {e}")))?;
                (id, state)
            }
            Ok(None) => return Ok(None),
            Err(e) => return Err(StoreError::Query(format!("claim select: {e}"))),
        };

        // One conditional write guarded by the observation above. Zero rows
        // affected means another worker got there first.
        if !self.try_lock(&id, &observed_state, now_ms, worker_id).await? {
            debug!(job_id = %id, worker_id, "Lost claim race");
            return Ok(None);
        }

        self.get_by_id(&id).await
    }

    async fn mark_success(&self, id: &str) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "UPDATE jobs SET state = 'completed', updated_at = ?1, locked_by = NULL WHERE id = ?2",
                params![Utc::now().to_rfc3339(), id],
            )
            .await
            .map_err(|e| StoreError::Query(format!("mark_success: {e}")))?;
        Ok(())
    }

    async fn mark_failure(
        &self,
        id: &str,
        attempts_before: u32,
        max_retries: u32,
        err_msg: &str,
        backoff_base: f64,
    ) -> Result<(), StoreError> {
        let attempts_after = attempts_before + 1;
        let now = Utc::now();

        if attempts_after > max_retries {
            self.conn()
                .execute(
                    "UPDATE jobs SET state = 'dead', attempts = ?1, last_error = ?2, updated_at = ?3, locked_by = NULL WHERE id = ?4",
                    params![attempts_after as i64, err_msg, now.to_rfc3339(), id],
                )
                .await
                .map_err(|e| StoreError::Query(format!("mark_failure dead: {e}")))?;
            debug!(job_id = %id, attempts = attempts_after, "Job moved to dead letter queue");
        } else {
            let next_run = backoff::next_run_ms(now.timestamp_millis(), backoff_base, attempts_after);
            self.conn()
                .execute(
                    "UPDATE jobs SET state = 'failed', attempts = ?1, last_error = ?2, next_run = ?3, updated_at = ?4, locked_by = NULL WHERE id = ?5",
                    params![attempts_after as i64, err_msg, next_run, now.to_rfc3339(), id],
                )
                .await
                .map_err(|e| StoreError::Query(format!("mark_failure retry: {e}")))?;
            debug!(job_id = %id, attempts = attempts_after, next_run, "Job rescheduled with backoff");
        }
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Job>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| StoreError::Query(format!("get_by_id: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_job(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("get_by_id: {e}"))),
        }
    }

    async fn list_by_state(&self, state: Option<JobState>) -> Result<Vec<Job>, StoreError> {
        let mut rows = match state {
            Some(state) => self
                .conn()
                .query(
                    &format!(
                        "SELECT {JOB_COLUMNS} FROM jobs WHERE state = ?1 ORDER BY created_at ASC"
                    ),
                    params![state.to_string()],
                )
                .await,
            None => self
                .conn()
                .query(
                    &format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at ASC"),
                    (),
                )
                .await,
        }
        .map_err(|e| StoreError::Query(format!("list_by_state: {e}")))?;

        let mut jobs = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("list_by_state: {e}")))?
        {
            jobs.push(row_to_job(&row)?);
        }
        Ok(jobs)
    }

    async fn count_by_state(&self) -> Result<BTreeMap<JobState, u64>, StoreError> {
        let mut rows = self
            .conn()
            .query("SELECT state, COUNT(*) FROM jobs GROUP BY state", ())
            .await
            .map_err(|e| StoreError::Query(format!("count_by_state: {e}")))?;

        let mut counts = BTreeMap::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("count_by_state: {e}")))?
        {
            let state_str: String = row
                .get(0)
                .map_err(|e| StoreError::Row(format!("count state: {e}")))?;
            let count: i64 = row
                .get(1)
                .map_err(|e| StoreError::Row(format!("count value: {e}")))?;
            if let Some(state) = JobState::parse(&state_str) {
                counts.insert(state, count as u64);
            }
        }
        Ok(counts)
    }

    async fn reset_to_pending(&self, id: &str) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "UPDATE jobs SET state = 'pending', attempts = 0, next_run = 0, last_error = NULL, updated_at = ?1 WHERE id = ?2",
                params![Utc::now().to_rfc3339(), id],
            )
            .await
            .map_err(|e| StoreError::Query(format!("reset_to_pending: {e}")))?;
        Ok(())
    }

    async fn config_get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut rows = self
            .conn()
            .query("SELECT value FROM config WHERE key = ?1", params![key])
            .await
            .map_err(|e| StoreError::Query(format!("config_get: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let value: Option<String> = row
                    .get(0)
                    .map_err(|e| StoreError::Row(format!("config value: {e}")))?;
                Ok(value)
            }
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("config_get: {e}"))),
        }
    }

    async fn config_set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "INSERT OR REPLACE INTO config (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .await
            .map_err(|e| StoreError::Query(format!("config_set: {e}")))?;
        Ok(())
    }
}
