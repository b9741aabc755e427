//! Parameterized SQL assembly.
//!
//! # Responsibility
//! - Build SQL text and its bind values together so they never drift apart.
//! - Compile the shared list/filter/order vocabulary for every entity type.
//!
//! # Invariants
//! - User-supplied values only ever reach SQLite as bind parameters.
//! - Identical inputs produce byte-identical SQL.

pub mod builder;
pub mod list;

pub use builder::{Combinator, SqlFragment};
pub use list::{
    compile_count, compile_list, ListFilters, ListOptions, ListOrder, ListedEntity,
    OrderDirection, TriState,
};
