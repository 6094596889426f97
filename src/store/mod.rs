//! Persistence layer — SQLite-backed durable job store.

pub mod libsql_backend;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::JobStore;
