//! queuectl — a durable, SQLite-backed job queue.
//!
//! Producers enqueue shell commands; worker loops poll the shared store,
//! atomically claim due jobs, execute them as external processes, and
//! record outcomes with bounded exponential-backoff retry and a dead
//! letter queue for jobs that exhaust their budget.

pub mod backoff;
pub mod config;
pub mod error;
pub mod job;
pub mod pidfile;
pub mod queue;
pub mod store;
pub mod worker;
