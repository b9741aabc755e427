//! Local persistence engine for a synchronized note-taking client.
//! Notebooks, tags, notes and resources live in one SQLite file; resource
//! bodies live in a versioned file tree next to it.

pub mod blob;
pub mod config;
pub mod db;
pub mod error;
pub mod handler;
pub mod logging;
pub mod model;
pub mod notify;
pub mod query;
pub mod repo;
pub mod search;
pub mod storage;
pub mod task;
pub mod validation;

pub use config::StorageConfig;
pub use db::{ConnectionPool, Transaction, TransactionMode};
pub use error::{StorageError, StorageResult};
pub use handler::{
    FetchNoteOptions, NoteHandler, NotebookHandler, ResourceHandler, TagHandler,
    UpdateNoteOptions,
};
pub use logging::{default_log_level, init_logging, init_logging_for, logging_status};
pub use model::note::Note;
pub use model::notebook::Notebook;
pub use model::resource::{BodyKind, Resource, ResourceBody};
pub use model::tag::Tag;
pub use model::{new_local_id, LocalId};
pub use notify::{ChannelNotifier, NoopNotifier, StorageEvent, StorageNotifier};
pub use query::{ListFilters, ListOptions, OrderDirection, TriState};
pub use repo::{NoteListOrder, NotebookListOrder, TagListOrder};
pub use search::NoteSearchQuery;
pub use storage::{LocalStorage, LocalStorageBuilder};
pub use task::{CancelHandle, TaskFuture};
pub use validation::{EntityValidator, WireFormatValidator};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
