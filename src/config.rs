//! Configuration: environment-derived settings and config-store keys.
//!
//! The database location comes from the environment; everything else
//! (retry ceiling, backoff base) lives in the `config` table so running
//! workers pick up changes on their next poll.

use std::path::PathBuf;
use std::time::Duration;

/// Config-store key for the default retry ceiling applied at enqueue time.
pub const KEY_MAX_RETRIES: &str = "max_retries";
/// Config-store key for the exponential backoff base.
pub const KEY_BASE_BACKOFF: &str = "base_backoff";

/// Built-in fallback when the config store has no usable `max_retries`.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Built-in fallback when the config store has no usable `base_backoff`.
pub const DEFAULT_BASE_BACKOFF: f64 = 2.0;

/// Environment variable selecting the store location.
pub const ENV_DB_PATH: &str = "QUEUECTL_DB_PATH";

/// Process-level settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// How long an idle worker sleeps between claim attempts.
    pub poll_interval: Duration,
    /// Path to the worker liveness pid file.
    pub pid_path: PathBuf,
}

impl Settings {
    /// Settings from the environment, with defaults relative to the
    /// current working directory.
    pub fn from_env() -> Self {
        let db_path = std::env::var(ENV_DB_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("jobs.db"));
        Self {
            db_path,
            ..Self::default()
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("jobs.db"),
            poll_interval: Duration::from_millis(500),
            pid_path: PathBuf::from("queuectl.pid"),
        }
    }
}
