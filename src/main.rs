use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, bail};
use chrono::DateTime;

use queuectl::config::Settings;
use queuectl::job::{JobState, NewJob};
use queuectl::pidfile;
use queuectl::queue::Queue;
use queuectl::worker::{WorkerPool, WorkerPoolOptions};

const USAGE: &str = "queuectl - simple durable job queue

Usage:
  queuectl enqueue <json|file>
  queuectl worker start [--count N] [--base-backoff B] [--max-retries M]
  queuectl worker stop
  queuectl list [--state <pending|processing|completed|failed|dead>] [--json]
  queuectl status
  queuectl dlq list
  queuectl dlq retry <job-id>
  queuectl config get <key>
  queuectl config set <key> <value>

Environment:
  QUEUECTL_DB_PATH   database file (default ./jobs.db)
  RUST_LOG           log filter (default info)";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let settings = Settings::from_env();
    let args: Vec<String> = std::env::args().skip(1).collect();
    let args: Vec<&str> = args.iter().map(String::as_str).collect();

    let result = match args.as_slice() {
        ["enqueue", input] => cmd_enqueue(&settings, input).await,
        ["worker", "start", rest @ ..] => cmd_worker_start(&settings, rest).await,
        ["worker", "stop"] => cmd_worker_stop(&settings),
        ["list", rest @ ..] => cmd_list(&settings, rest).await,
        ["status"] => cmd_status(&settings).await,
        ["dlq", "list"] => cmd_dlq_list(&settings).await,
        ["dlq", "retry", id] => cmd_dlq_retry(&settings, id).await,
        ["config", "get", key] => cmd_config_get(&settings, key).await,
        ["config", "set", key, value] => cmd_config_set(&settings, key, value).await,
        _ => {
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(2);
    }
    Ok(())
}

/// Parse `--flag value` out of a trailing argument list.
fn flag_value<'a>(args: &[&'a str], flag: &str) -> anyhow::Result<Option<&'a str>> {
    match args.iter().position(|a| *a == flag) {
        Some(i) => match args.get(i + 1) {
            Some(v) => Ok(Some(v)),
            None => bail!("{flag} requires a value"),
        },
        None => Ok(None),
    }
}

async fn open_queue(settings: &Settings) -> anyhow::Result<Queue> {
    Queue::open(&settings.db_path)
        .await
        .with_context(|| format!("opening queue database {}", settings.db_path.display()))
}

async fn cmd_enqueue(settings: &Settings, input: &str) -> anyhow::Result<()> {
    // The argument is either inline JSON or a path to a JSON file.
    let json = if Path::new(input).exists() {
        std::fs::read_to_string(input).with_context(|| format!("reading {input}"))?
    } else {
        input.to_string()
    };
    let job: NewJob = serde_json::from_str(&json).context("invalid job JSON")?;

    let queue = open_queue(settings).await?;
    let id = queue.enqueue(job).await?;
    println!("Enqueued job: {id}");
    Ok(())
}

async fn cmd_worker_start(settings: &Settings, rest: &[&str]) -> anyhow::Result<()> {
    let count: usize = flag_value(rest, "--count")?
        .map(|v| v.parse().context("--count must be a number"))
        .transpose()?
        .unwrap_or(1);
    let backoff_base: Option<f64> = flag_value(rest, "--base-backoff")?
        .map(|v| v.parse().context("--base-backoff must be a number"))
        .transpose()?;
    let max_retries: Option<u32> = flag_value(rest, "--max-retries")?
        .map(|v| v.parse().context("--max-retries must be a number"))
        .transpose()?;

    let queue = open_queue(settings).await?;

    // CLI overrides become the stored defaults for newly enqueued jobs.
    if let Some(m) = max_retries {
        queue
            .config_set(queuectl::config::KEY_MAX_RETRIES, &m.to_string())
            .await?;
    }
    if let Some(b) = backoff_base {
        queue
            .config_set(queuectl::config::KEY_BASE_BACKOFF, &b.to_string())
            .await?;
    }

    pidfile::write(&settings.pid_path)
        .with_context(|| format!("writing pid file {}", settings.pid_path.display()))?;

    let pool = WorkerPool::start(
        queue.store(),
        WorkerPoolOptions {
            count,
            backoff_base,
            poll_interval: settings.poll_interval,
        },
    )
    .await;
    println!(
        "Started {} worker(s), pid {}. Press Ctrl+C to stop.",
        pool.len(),
        std::process::id()
    );

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, draining workers");

    pool.shutdown().await;
    pidfile::remove(&settings.pid_path).ok();
    Ok(())
}

fn cmd_worker_stop(settings: &Settings) -> anyhow::Result<()> {
    let Some(pid) = pidfile::read(&settings.pid_path) else {
        println!("No worker pid file found.");
        return Ok(());
    };
    if pidfile::interrupt(pid)? {
        println!("Sent interrupt to worker process {pid}");
    } else {
        bail!("failed to signal worker process {pid}");
    }
    Ok(())
}

async fn cmd_list(settings: &Settings, rest: &[&str]) -> anyhow::Result<()> {
    let state = match flag_value(rest, "--state")? {
        Some(s) => Some(
            JobState::parse(s).with_context(|| format!("unknown state {s:?}"))?,
        ),
        None => None,
    };

    let queue = open_queue(settings).await?;
    let jobs = queue.list(state).await?;
    if rest.contains(&"--json") {
        println!("{}", serde_json::to_string_pretty(&jobs)?);
        return Ok(());
    }
    if jobs.is_empty() {
        println!("No jobs found.");
        return Ok(());
    }
    for job in jobs {
        let next_run = if job.next_run > 0 {
            DateTime::from_timestamp_millis(job.next_run)
                .map(|dt| dt.to_rfc3339())
                .unwrap_or_else(|| job.next_run.to_string())
        } else {
            "immediate".to_string()
        };
        println!(
            "{} | {} | attempts={}/{} | command={:?} | next_run={}",
            job.id, job.state, job.attempts, job.max_retries, job.command, next_run
        );
    }
    Ok(())
}

async fn cmd_status(settings: &Settings) -> anyhow::Result<()> {
    let queue = open_queue(settings).await?;
    let counts = queue.status_summary().await?;

    println!("Job counts:");
    for state in [
        JobState::Pending,
        JobState::Processing,
        JobState::Completed,
        JobState::Failed,
        JobState::Dead,
    ] {
        println!("  {:<12} {}", state, counts.get(&state).copied().unwrap_or(0));
    }

    match pidfile::read(&settings.pid_path) {
        Some(pid) if pidfile::process_alive(pid) => {
            println!("Worker running: yes (pid {pid})")
        }
        _ => println!("Worker running: no"),
    }
    Ok(())
}

async fn cmd_dlq_list(settings: &Settings) -> anyhow::Result<()> {
    let queue = open_queue(settings).await?;
    let jobs = queue.dlq_list().await?;
    if jobs.is_empty() {
        println!("DLQ is empty.");
        return Ok(());
    }
    for job in jobs {
        println!(
            "{} | attempts={}/{} | last_error={:?} | command={:?}",
            job.id,
            job.attempts,
            job.max_retries,
            job.last_error.as_deref().unwrap_or(""),
            job.command
        );
    }
    Ok(())
}

async fn cmd_dlq_retry(settings: &Settings, id: &str) -> anyhow::Result<()> {
    let queue = open_queue(settings).await?;
    queue.dlq_retry(id).await?;
    println!("Job moved from DLQ to pending: {id}");
    Ok(())
}

async fn cmd_config_get(settings: &Settings, key: &str) -> anyhow::Result<()> {
    let queue = open_queue(settings).await?;
    match queue.config_get(key).await? {
        Some(value) => println!("{value}"),
        None => println!("(unset)"),
    }
    Ok(())
}

async fn cmd_config_set(settings: &Settings, key: &str, value: &str) -> anyhow::Result<()> {
    let queue = open_queue(settings).await?;
    queue.config_set(key, value).await?;
    println!("Config {key} set to {value}");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term =
        signal(SignalKind::terminate()).expect("Failed to listen for SIGTERM");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = term.recv() => {},
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for Ctrl+C");
}
