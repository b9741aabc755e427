//! Resource body storage outside the relational rows.
//!
//! # Responsibility
//! - Store resource bodies as versioned files.
//! - Reconcile a note's resource list against its previous state with
//!   minimal row writes and file I/O.
//!
//! # Invariants
//! - Every body write creates a fresh version file; files are never
//!   overwritten in place.
//! - New files are written before the referencing row commits; stale files
//!   are removed only after the commit succeeded.

pub mod reconcile;
pub mod store;

pub use reconcile::{diff_resources, partial_update, IndexMove, ResourceDiff};
pub use store::{BlobStore, BlobWriteSet};
