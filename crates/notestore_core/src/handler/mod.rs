//! Per-entity handlers.
//!
//! # Responsibility
//! - Expose put/find/list/expunge for one entity type each.
//! - Validate input synchronously, then hand the work to the scheduler.
//!
//! # Invariants
//! - Every operation returns a [`TaskFuture`](crate::task::TaskFuture);
//!   validation failures come back as already-resolved futures.
//! - Tasks carry a weak reference to their handler; a task whose handler is
//!   gone resolves `HandlerDestroyed` without touching storage.
//! - Body files are touched under the process-wide blob lock only.
//! - Notifications go out after a successful commit only.

pub mod note;
pub mod notebook;
pub mod resource;
pub mod tag;

use crate::blob::BlobStore;
use crate::db::{Transaction, TransactionMode};
use crate::error::StorageResult;
use crate::notify::StorageNotifier;
use crate::task::TaskScheduler;
use crate::validation::EntityValidator;
use rusqlite::Connection;
use std::sync::Arc;

pub use note::{FetchNoteOptions, NoteHandler, UpdateNoteOptions};
pub use notebook::NotebookHandler;
pub use resource::ResourceHandler;
pub use tag::TagHandler;

/// Collaborators shared by every handler of one storage instance.
pub(crate) struct HandlerContext {
    pub(crate) scheduler: TaskScheduler,
    pub(crate) blobs: BlobStore,
    pub(crate) validator: Arc<dyn EntityValidator>,
    pub(crate) notifier: Arc<dyn StorageNotifier>,
}

/// Runs `work` in a `Selection` transaction.
pub(crate) fn read_in_transaction<T>(
    conn: &mut Connection,
    work: impl FnOnce(&Connection) -> StorageResult<T>,
) -> StorageResult<T> {
    let tx = Transaction::begin(conn, TransactionMode::Selection)?;
    let value = work(&tx)?;
    tx.commit()?;
    Ok(value)
}

/// Runs `work` in a write transaction of `mode` and commits it.
pub(crate) fn write_in_transaction<T>(
    conn: &mut Connection,
    mode: TransactionMode,
    work: impl FnOnce(&Connection) -> StorageResult<T>,
) -> StorageResult<T> {
    let tx = Transaction::begin(conn, mode)?;
    let value = work(&tx)?;
    tx.commit()?;
    Ok(value)
}
