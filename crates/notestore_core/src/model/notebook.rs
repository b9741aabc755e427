//! Notebook record.

use super::{new_local_id, LocalId, SyncFlags};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotebookRestrictions {
    pub no_read_notes: Option<bool>,
    pub no_create_notes: Option<bool>,
    pub no_update_notes: Option<bool>,
    pub no_expunge_notes: Option<bool>,
    pub no_create_tags: Option<bool>,
    pub no_update_tags: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notebook {
    pub local_id: LocalId,
    pub guid: Option<String>,
    pub name: String,
    pub update_sequence_num: Option<i32>,
    /// Epoch milliseconds.
    pub created_at: Option<i64>,
    pub updated_at: Option<i64>,
    pub is_default: bool,
    #[serde(default)]
    pub flags: SyncFlags,
    pub restrictions: Option<NotebookRestrictions>,
}

impl Notebook {
    /// Creates an unsynced notebook with a generated local id.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            local_id: new_local_id(),
            guid: None,
            name: name.into(),
            update_sequence_num: None,
            created_at: None,
            updated_at: None,
            is_default: false,
            flags: SyncFlags::default(),
            restrictions: None,
        }
    }
}
