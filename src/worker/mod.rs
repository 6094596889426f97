//! Worker loops — claim, execute, record.

pub mod pool;
pub mod worker;

pub use pool::{WorkerPool, WorkerPoolOptions};
pub use worker::{Worker, WorkerHandle};
