//! Worker pool — spawns N independent loops over one shared store.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::info;

use crate::config::{DEFAULT_BASE_BACKOFF, KEY_BASE_BACKOFF};
use crate::store::JobStore;
use crate::worker::worker::{Worker, WorkerHandle};

/// Options for starting a pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolOptions {
    /// Number of worker loops.
    pub count: usize,
    /// Backoff base override; when `None` the config store value is used.
    pub backoff_base: Option<f64>,
    /// Idle sleep between claim attempts.
    pub poll_interval: Duration,
}

impl Default for WorkerPoolOptions {
    fn default() -> Self {
        Self {
            count: 1,
            backoff_base: None,
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// A set of running worker loops sharing one store.
pub struct WorkerPool {
    handles: Vec<WorkerHandle>,
}

impl WorkerPool {
    /// Spawn `options.count` workers with ids `worker-{pid}-{index}`.
    ///
    /// The backoff base is resolved once at start: the explicit override
    /// wins, then the config store, then the built-in default.
    pub async fn start(store: Arc<dyn JobStore>, options: WorkerPoolOptions) -> Self {
        let backoff_base = match options.backoff_base {
            Some(base) => base,
            None => store
                .config_get(KEY_BASE_BACKOFF)
                .await
                .ok()
                .flatten()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_BASE_BACKOFF),
        };

        let pid = std::process::id();
        let handles = (0..options.count.max(1))
            .map(|i| {
                Worker::spawn(
                    format!("worker-{pid}-{i}"),
                    Arc::clone(&store),
                    backoff_base,
                    options.poll_interval,
                )
            })
            .collect::<Vec<_>>();

        info!(count = handles.len(), backoff_base, "Worker pool started");
        Self { handles }
    }

    /// Number of workers in the pool.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Stop every worker, waiting for each in-flight job to be recorded.
    pub async fn shutdown(self) {
        info!("Stopping worker pool");
        join_all(self.handles.into_iter().map(WorkerHandle::stop)).await;
        info!("Worker pool stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlBackend;

    #[tokio::test]
    async fn pool_spawns_requested_count() {
        let store: Arc<dyn JobStore> = Arc::new(LibSqlBackend::open_memory().await.unwrap());
        let pool = WorkerPool::start(
            store,
            WorkerPoolOptions {
                count: 3,
                poll_interval: Duration::from_millis(20),
                ..Default::default()
            },
        )
        .await;
        assert_eq!(pool.len(), 3);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn zero_count_still_spawns_one() {
        let store: Arc<dyn JobStore> = Arc::new(LibSqlBackend::open_memory().await.unwrap());
        let pool = WorkerPool::start(
            store,
            WorkerPoolOptions {
                count: 0,
                poll_interval: Duration::from_millis(20),
                ..Default::default()
            },
        )
        .await;
        assert_eq!(pool.len(), 1);
        pool.shutdown().await;
    }
}
