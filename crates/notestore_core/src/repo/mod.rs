//! Row-level persistence for every entity type.
//!
//! # Responsibility
//! - Map domain records to SQLite rows and back.
//! - Declare each entity's listing layout for the generic list compiler.
//!
//! # Invariants
//! - Repositories never open or commit transactions; they run on whatever
//!   connection or transaction the caller hands them.
//! - Lookups return `Option::None` for missing rows.

pub mod note_repo;
pub mod notebook_repo;
pub mod resource_repo;
pub mod tag_repo;

pub use note_repo::{NoteEntity, NoteListOrder, SqliteNoteRepository};
pub use notebook_repo::{NotebookEntity, NotebookListOrder, SqliteNotebookRepository};
pub use resource_repo::{BodyVersions, SqliteResourceRepository, StoredResource};
pub use tag_repo::{SqliteTagRepository, TagEntity, TagListOrder};
