//! SQLite storage bootstrap, pooling and transaction discipline.
//!
//! # Responsibility
//! - Open and configure SQLite connections for the storage engine.
//! - Apply schema migrations in deterministic order.
//! - Hand out one connection per thread and scope transactions.
//!
//! # Invariants
//! - Migration version is tracked via `PRAGMA user_version`.
//! - Every connection runs in WAL mode with `foreign_keys=ON`.
//! - No application data is read or written before migrations succeed.

use thiserror::Error;

pub mod migrations;
mod open;
pub mod pool;
pub mod transaction;

pub use open::{open_connection, open_db, open_db_in_memory};
pub use pool::{ConnectionPool, PooledConnection};
pub use transaction::{Transaction, TransactionMode};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("{0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("database schema version {db_version} is newer than supported {latest_supported}")]
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
}
