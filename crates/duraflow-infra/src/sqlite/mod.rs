//! SQLite storage layer.
//!
//! The durable log implementation backed by SQLite with WAL mode and split
//! read/write connection pools.

pub mod log_store;
pub mod pool;

pub use log_store::SqliteLogStore;
pub use pool::DatabasePool;
