//! Note search.
//!
//! # Responsibility
//! - Parse Evernote-style search strings into [`NoteSearchQuery`].
//! - Compile queries into one SQL statement mixing FTS5 and relational
//!   predicates.
//!
//! # Invariants
//! - Parse and compile failures are `Compiler` errors raised before the
//!   search statement runs.

pub mod compiler;
mod parser;
pub mod query;

pub use compiler::{compile, compile_resolved, resolve, ResolvedNames, ResolvedQuery};
pub use parser::parse_date;
pub use query::{NoteSearchQuery, SearchAxis, TodoAxis};
