//! Domain model for notebooks, tags, notes and resources.
//!
//! # Responsibility
//! - Define the records exchanged between handlers and callers.
//! - Keep identity rules (local id vs. server guid) in one place.
//!
//! # Invariants
//! - Every entity carries a non-empty local id once it has been put.
//! - A guid is only present after the entity has been synchronized.

pub mod note;
pub mod notebook;
pub mod resource;
pub mod tag;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Client-generated entity identifier.
pub type LocalId = String;

/// Generates a fresh local id.
pub fn new_local_id() -> LocalId {
    Uuid::new_v4().to_string()
}

/// Flags shared by every synchronizable entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFlags {
    /// Modified locally since the last sync.
    pub is_dirty: bool,
    /// Never sent to the server.
    pub is_local_only: bool,
    pub is_favorited: bool,
}
