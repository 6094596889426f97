//! End-to-end queue scenarios: enqueue, execute, retry, dead-letter, drain.
//!
//! These tests run real worker loops executing real shell commands against
//! an in-memory (or temp-file) store.

use std::sync::Arc;
use std::time::Duration;

use queuectl::config::KEY_BASE_BACKOFF;
use queuectl::job::{JobState, NewJob};
use queuectl::queue::Queue;
use queuectl::store::{JobStore, LibSqlBackend};
use queuectl::worker::{Worker, WorkerPool, WorkerPoolOptions};

/// Maximum time any wait loop runs before the test is considered hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Fast poll interval so tests don't sit in idle sleeps.
const FAST_POLL: Duration = Duration::from_millis(25);

/// Poll the store until the job reaches `state`, panicking on timeout.
async fn wait_for_state(queue: &Queue, id: &str, state: JobState) {
    let deadline = tokio::time::Instant::now() + TEST_TIMEOUT;
    loop {
        let job = queue.get(id).await.unwrap().unwrap();
        if job.state == state {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!(
                "job {id} stuck in state {} (attempts={}), wanted {state}",
                job.state, job.attempts
            );
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test]
async fn successful_job_completes_in_one_claim() {
    let queue = Queue::open_memory().await.unwrap();
    let id = queue.enqueue(NewJob::command("true")).await.unwrap();

    let handle = Worker::spawn("worker-it-0", queue.store(), 2.0, FAST_POLL);
    wait_for_state(&queue, &id, JobState::Completed).await;
    handle.stop().await;

    let job = queue.get(&id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.attempts, 0);
    assert!(job.locked_by.is_none());
    assert!(job.last_error.is_none());
}

#[tokio::test]
async fn failing_job_retries_then_goes_dead() {
    let queue = Queue::open_memory().await.unwrap();
    let id = queue
        .enqueue(NewJob::command("exit 1").with_max_retries(2))
        .await
        .unwrap();

    // Backoff base 0 makes every retry due immediately.
    let handle = Worker::spawn("worker-it-1", queue.store(), 0.0, FAST_POLL);
    wait_for_state(&queue, &id, JobState::Dead).await;
    handle.stop().await;

    // Third failure pushed attempts past max_retries = 2.
    let job = queue.get(&id).await.unwrap().unwrap();
    assert_eq!(job.attempts, 3);
    assert!(job.attempts <= job.max_retries + 1);
    assert!(job.locked_by.is_none());
    let err = job.last_error.expect("dead job must carry an error");
    assert!(!err.is_empty());
    assert!(err.contains("exit"), "unexpected error text: {err}");
}

#[tokio::test]
async fn concurrent_claims_yield_exactly_one_winner() {
    let store: Arc<dyn JobStore> = Arc::new(LibSqlBackend::open_memory().await.unwrap());
    let id = store.insert(&NewJob::command("true")).await.unwrap();

    let claims = (0..8).map(|i| {
        let store = Arc::clone(&store);
        tokio::spawn(async move { store.claim(&format!("worker-race-{i}")).await.unwrap() })
    });
    let results = futures::future::join_all(claims).await;

    let winners: Vec<_> = results
        .into_iter()
        .filter_map(|r| r.unwrap())
        .collect();
    assert_eq!(winners.len(), 1, "exactly one claim must succeed");
    assert!(winners[0].locked_by.is_some());

    let job = store.get_by_id(&id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Processing);
    assert_eq!(job.locked_by, winners[0].locked_by);
}

#[tokio::test]
async fn stop_waits_for_in_flight_outcome() {
    let queue = Queue::open_memory().await.unwrap();
    let id = queue.enqueue(NewJob::command("sleep 0.4")).await.unwrap();

    let handle = Worker::spawn("worker-it-2", queue.store(), 2.0, FAST_POLL);

    // Wait until the job is actually in flight (the worker sets its
    // current-job marker just after the claim lands).
    wait_for_state(&queue, &id, JobState::Processing).await;
    let deadline = tokio::time::Instant::now() + TEST_TIMEOUT;
    while handle.current_job().await.as_deref() != Some(id.as_str()) {
        assert!(
            tokio::time::Instant::now() < deadline,
            "worker never marked the job as current"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // stop() must not return before the outcome is durably recorded.
    handle.stop().await;
    let job = queue.get(&id).await.unwrap().unwrap();
    assert_eq!(job.state, JobState::Completed);
}

#[tokio::test]
async fn dead_job_can_be_retried_and_succeed() {
    let queue = Queue::open_memory().await.unwrap();

    // A command that fails until a marker file exists.
    let tmp = tempfile::tempdir().unwrap();
    let marker = tmp.path().join("ready");
    let command = format!("test -f {}", marker.display());
    let id = queue
        .enqueue(NewJob::command(&command).with_max_retries(0))
        .await
        .unwrap();

    let handle = Worker::spawn("worker-it-3", queue.store(), 0.0, FAST_POLL);
    wait_for_state(&queue, &id, JobState::Dead).await;

    // Manual DLQ retry with the precondition now satisfied.
    std::fs::write(&marker, "").unwrap();
    queue.dlq_retry(&id).await.unwrap();
    wait_for_state(&queue, &id, JobState::Completed).await;
    handle.stop().await;

    let job = queue.get(&id).await.unwrap().unwrap();
    assert_eq!(job.attempts, 0);
    assert!(job.last_error.is_none());
}

#[tokio::test]
async fn pool_drains_all_workers_on_shutdown() {
    let tmp = tempfile::tempdir().unwrap();
    let queue = Queue::open(&tmp.path().join("jobs.db")).await.unwrap();
    queue.config_set(KEY_BASE_BACKOFF, "0").await.unwrap();

    let mut ids = Vec::new();
    for _ in 0..4 {
        ids.push(queue.enqueue(NewJob::command("sleep 0.1")).await.unwrap());
    }

    let pool = WorkerPool::start(
        queue.store(),
        WorkerPoolOptions {
            count: 2,
            backoff_base: None,
            poll_interval: FAST_POLL,
        },
    )
    .await;
    assert_eq!(pool.len(), 2);

    for id in &ids {
        wait_for_state(&queue, id, JobState::Completed).await;
    }
    pool.shutdown().await;

    // Nothing left in flight after drain.
    let counts = queue.status_summary().await.unwrap();
    assert_eq!(counts.get(&JobState::Completed), Some(&4));
    assert_eq!(counts.get(&JobState::Processing), None);
}
