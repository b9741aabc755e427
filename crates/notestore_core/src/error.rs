//! Storage-wide error type.
//!
//! # Responsibility
//! - Give every engine operation one error vocabulary.
//! - Keep SQLite diagnostics (extended code + message) attached to failures.
//!
//! # Invariants
//! - "Not found" is never an error; lookups return `Option::None`.
//! - Validation and compiler errors are produced before any SQL is issued.

use crate::db::DbError;
use std::path::PathBuf;
use thiserror::Error;

/// Result alias used by every storage operation.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error kinds surfaced by the storage engine.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Malformed constructor or call input.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Storage directory or config file is unusable.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Entity failed wire-format checks.
    #[error("validation failed for `{field}`: {reason}")]
    ValidationFailed { field: String, reason: String },

    /// Engine-level failure. `code` is the extended SQLite result code when
    /// the engine reported one.
    #[error("database error (code {code:?}): {message}")]
    Database { code: Option<i32>, message: String },

    /// Task was canceled before it started.
    #[error("operation canceled")]
    Canceled,

    /// Issuing handler was dropped before the task started.
    #[error("issuing handler was destroyed")]
    HandlerDestroyed,

    /// Search query cannot be translated to SQL.
    #[error("cannot compile search query: {0}")]
    Compiler(String),

    /// Filesystem failure while reading or writing a resource body.
    #[error("resource body i/o failed at `{path}`: {source}")]
    BlobIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Persisted row cannot be decoded into a domain value.
    #[error("invalid persisted data: {0}")]
    InvalidData(String),
}

impl StorageError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ValidationFailed {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn compiler(message: impl Into<String>) -> Self {
        Self::Compiler(message.into())
    }

    pub fn blob_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::BlobIo {
            path: path.into(),
            source,
        }
    }

    /// Short stable code used in structured log events.
    pub fn log_code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "invalid_argument",
            Self::Configuration(_) => "configuration",
            Self::ValidationFailed { .. } => "validation_failed",
            Self::Database { .. } => "database",
            Self::Canceled => "canceled",
            Self::HandlerDestroyed => "handler_destroyed",
            Self::Compiler(_) => "compiler",
            Self::BlobIo { .. } => "blob_io",
            Self::InvalidData(_) => "invalid_data",
        }
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(value: rusqlite::Error) -> Self {
        match value {
            rusqlite::Error::SqliteFailure(failure, message) => Self::Database {
                code: Some(failure.extended_code),
                message: message.unwrap_or_else(|| failure.to_string()),
            },
            other => Self::Database {
                code: None,
                message: other.to_string(),
            },
        }
    }
}

impl From<DbError> for StorageError {
    fn from(value: DbError) -> Self {
        match value {
            DbError::Sqlite(err) => err.into(),
            DbError::UnsupportedSchemaVersion { .. } => Self::Configuration(value.to_string()),
        }
    }
}
