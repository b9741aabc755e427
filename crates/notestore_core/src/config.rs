//! Storage configuration.
//!
//! # Responsibility
//! - Describe where the database file and resource bodies live.
//! - Size the read worker pool and SQLite busy timeout.
//!
//! # Invariants
//! - `storage_dir` is absolute or resolvable; it is created on demand.
//! - `read_workers` is at least 1.

use crate::error::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_DATABASE_FILE_NAME: &str = "notestore.sqlite3";
const DEFAULT_BLOB_DIR_NAME: &str = "resources";
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
const MIN_DEFAULT_READ_WORKERS: usize = 2;
const MAX_DEFAULT_READ_WORKERS: usize = 8;

/// Configuration for one local storage instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the database file and the resource body tree.
    pub storage_dir: PathBuf,
    #[serde(default = "default_database_file_name")]
    pub database_file_name: String,
    #[serde(default = "default_blob_dir_name")]
    pub blob_dir_name: String,
    /// Number of reader threads, each owning one pooled connection.
    #[serde(default = "default_read_workers")]
    pub read_workers: usize,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl StorageConfig {
    /// Creates a config with defaults rooted at `storage_dir`.
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            database_file_name: default_database_file_name(),
            blob_dir_name: default_blob_dir_name(),
            read_workers: default_read_workers(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }

    /// Parses a JSON config document.
    pub fn from_json_str(raw: &str) -> StorageResult<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|err| StorageError::Configuration(format!("invalid config json: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| {
            StorageError::Configuration(format!(
                "failed to read config `{}`: {err}",
                path.display()
            ))
        })?;
        Self::from_json_str(&raw)
    }

    /// Checks field-level constraints without touching the filesystem.
    pub fn validate(&self) -> StorageResult<()> {
        if self.storage_dir.as_os_str().is_empty() {
            return Err(StorageError::Configuration(
                "storage_dir cannot be empty".to_string(),
            ));
        }
        if !is_plain_file_name(&self.database_file_name) {
            return Err(StorageError::Configuration(format!(
                "database_file_name must be a plain file name, got `{}`",
                self.database_file_name
            )));
        }
        if !is_plain_file_name(&self.blob_dir_name) {
            return Err(StorageError::Configuration(format!(
                "blob_dir_name must be a plain directory name, got `{}`",
                self.blob_dir_name
            )));
        }
        if self.read_workers == 0 {
            return Err(StorageError::Configuration(
                "read_workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Creates the storage directory when missing and verifies it is writable.
    pub fn ensure_storage_dir(&self) -> StorageResult<()> {
        std::fs::create_dir_all(&self.storage_dir).map_err(|err| {
            StorageError::Configuration(format!(
                "cannot create storage dir `{}`: {err}",
                self.storage_dir.display()
            ))
        })?;
        let metadata = std::fs::metadata(&self.storage_dir).map_err(|err| {
            StorageError::Configuration(format!(
                "cannot stat storage dir `{}`: {err}",
                self.storage_dir.display()
            ))
        })?;
        if !metadata.is_dir() {
            return Err(StorageError::Configuration(format!(
                "storage path `{}` is not a directory",
                self.storage_dir.display()
            )));
        }
        if metadata.permissions().readonly() {
            return Err(StorageError::Configuration(format!(
                "storage dir `{}` is not writable",
                self.storage_dir.display()
            )));
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.storage_dir.join(&self.database_file_name)
    }

    pub fn blob_root(&self) -> PathBuf {
        self.storage_dir.join(&self.blob_dir_name)
    }
}

fn is_plain_file_name(value: &str) -> bool {
    !value.trim().is_empty()
        && !value.contains(['/', '\\'])
        && value != "."
        && value != ".."
}

fn default_database_file_name() -> String {
    DEFAULT_DATABASE_FILE_NAME.to_string()
}

fn default_blob_dir_name() -> String {
    DEFAULT_BLOB_DIR_NAME.to_string()
}

fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

fn default_read_workers() -> usize {
    std::thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(MIN_DEFAULT_READ_WORKERS)
        .clamp(MIN_DEFAULT_READ_WORKERS, MAX_DEFAULT_READ_WORKERS)
}
