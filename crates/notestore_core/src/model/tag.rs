//! Tag record.

use super::{new_local_id, LocalId, SyncFlags};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub local_id: LocalId,
    pub guid: Option<String>,
    pub name: String,
    /// Parent tag; expunging the parent expunges this tag too.
    pub parent_local_id: Option<LocalId>,
    pub update_sequence_num: Option<i32>,
    #[serde(default)]
    pub flags: SyncFlags,
}

impl Tag {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            local_id: new_local_id(),
            guid: None,
            name: name.into(),
            parent_local_id: None,
            update_sequence_num: None,
            flags: SyncFlags::default(),
        }
    }
}
