//! Per-thread SQLite connection pool.
//!
//! # Responsibility
//! - Hand out one dedicated connection per calling thread.
//! - Run schema migrations once, before the first connection is handed out.
//!
//! # Invariants
//! - Repeated `acquire` calls from the same thread return the same connection.
//! - A connection is only ever used by the thread that acquired it.
//! - All connections target one database file in WAL mode.

use super::open::{open_connection, open_db};
use crate::error::{StorageError, StorageResult};
use log::{debug, info};
use parking_lot::Mutex;
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::Duration;

/// Connection owned by one thread. The mutex is uncontended; it only exists
/// so the handle can be shared with the pool's bookkeeping.
pub type PooledConnection = Arc<Mutex<Connection>>;

/// Thread-keyed SQLite connection pool.
pub struct ConnectionPool {
    database_path: PathBuf,
    busy_timeout: Duration,
    connections: Mutex<HashMap<ThreadId, PooledConnection>>,
}

impl ConnectionPool {
    /// Opens the pool, creating the parent directory and migrating the schema.
    ///
    /// # Errors
    /// - `Configuration` when the parent directory is missing and cannot be
    ///   created, or the schema version is newer than supported.
    /// - `Database` when the engine rejects the file.
    pub fn open(database_path: impl Into<PathBuf>, busy_timeout: Duration) -> StorageResult<Self> {
        let database_path = database_path.into();
        let parent = database_path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .ok_or_else(|| {
                StorageError::InvalidArgument(format!(
                    "database path `{}` has no parent directory",
                    database_path.display()
                ))
            })?;
        std::fs::create_dir_all(parent).map_err(|err| {
            StorageError::Configuration(format!(
                "cannot create database directory `{}`: {err}",
                parent.display()
            ))
        })?;

        let migrated = open_db(&database_path)?;
        let pool = Self {
            database_path,
            busy_timeout,
            connections: Mutex::new(HashMap::new()),
        };
        migrated.busy_timeout(busy_timeout)?;
        pool.connections.lock().insert(
            std::thread::current().id(),
            Arc::new(Mutex::new(migrated)),
        );
        info!(
            "event=pool_open module=db status=ok path={}",
            pool.database_path.display()
        );
        Ok(pool)
    }

    /// Returns the calling thread's connection, opening it on first use.
    pub fn acquire(&self) -> StorageResult<PooledConnection> {
        let thread_id = std::thread::current().id();
        if let Some(conn) = self.connections.lock().get(&thread_id) {
            return Ok(Arc::clone(conn));
        }

        let conn = open_connection(&self.database_path, self.busy_timeout)?;
        debug!(
            "event=pool_acquire module=db status=opened thread={:?}",
            thread_id
        );
        let mut connections = self.connections.lock();
        let entry = connections
            .entry(thread_id)
            .or_insert_with(|| Arc::new(Mutex::new(conn)));
        Ok(Arc::clone(entry))
    }

    /// Drops the calling thread's connection. Returns whether one existed.
    pub fn release_current_thread(&self) -> bool {
        self.connections
            .lock()
            .remove(&std::thread::current().id())
            .is_some()
    }

    /// Number of threads currently holding a connection.
    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectionPool;
    use std::sync::Arc;
    use std::time::Duration;

    fn open_pool(dir: &tempfile::TempDir) -> Arc<ConnectionPool> {
        Arc::new(
            ConnectionPool::open(dir.path().join("pool.sqlite3"), Duration::from_secs(1))
                .expect("pool should open"),
        )
    }

    #[test]
    fn same_thread_gets_same_connection() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_pool(&dir);
        let first = pool.acquire().unwrap();
        let second = pool.acquire().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(pool.connection_count(), 1);
    }

    #[test]
    fn other_threads_get_their_own_connection() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_pool(&dir);
        let main_conn = pool.acquire().unwrap();

        let worker_pool = Arc::clone(&pool);
        let worker_conn = std::thread::spawn(move || worker_pool.acquire().unwrap())
            .join()
            .unwrap();

        assert!(!Arc::ptr_eq(&main_conn, &worker_conn));
        assert_eq!(pool.connection_count(), 2);
    }

    #[test]
    fn connections_run_in_wal_mode() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_pool(&dir);
        let conn = pool.acquire().unwrap();
        let mode: String = conn
            .lock()
            .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn release_current_thread_forgets_connection() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_pool(&dir);
        assert!(pool.release_current_thread());
        assert!(!pool.release_current_thread());
        assert_eq!(pool.connection_count(), 0);
    }
}
