//! Resource (attachment) record.
//!
//! # Invariants
//! - `note_local_id` always names an existing note.
//! - `index_in_note` values of one note's resources are dense and 0-based.
//! - Body `size`/`hash` are metadata; `body` bytes are optional payload and
//!   never take part in metadata equality.

use super::{new_local_id, LocalId};
use serde::{Deserialize, Serialize};

/// Binary body kinds kept in the blob store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BodyKind {
    Data,
    AlternateData,
}

impl BodyKind {
    pub const ALL: [BodyKind; 2] = [BodyKind::Data, BodyKind::AlternateData];

    /// Directory name used in the blob store layout.
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::AlternateData => "alternate_data",
        }
    }
}

/// One binary body with its declared metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceBody {
    /// Declared size in bytes.
    pub size: Option<i32>,
    /// MD5 digest of the body.
    pub hash: Option<Vec<u8>>,
    /// Raw bytes, when loaded or supplied for writing.
    pub body: Option<Vec<u8>>,
}

impl ResourceBody {
    pub fn metadata_eq(&self, other: &Self) -> bool {
        self.size == other.size && self.hash == other.hash
    }

    pub fn without_body(&self) -> Self {
        Self {
            size: self.size,
            hash: self.hash.clone(),
            body: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceAttributes {
    pub source_url: Option<String>,
    pub file_name: Option<String>,
    pub is_attachment: Option<bool>,
    pub timestamp: Option<i64>,
    pub camera_make: Option<String>,
}

impl ResourceAttributes {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub local_id: LocalId,
    pub guid: Option<String>,
    pub note_local_id: LocalId,
    pub index_in_note: i32,
    pub update_sequence_num: Option<i32>,
    pub is_dirty: bool,
    pub is_local_only: bool,
    pub mime: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub data: Option<ResourceBody>,
    /// Recognition index; kept in the resource row, not the blob store.
    pub recognition: Option<ResourceBody>,
    pub alternate_data: Option<ResourceBody>,
    pub attributes: Option<ResourceAttributes>,
}

impl Resource {
    pub fn new(note_local_id: impl Into<LocalId>, mime: impl Into<String>) -> Self {
        Self {
            local_id: new_local_id(),
            guid: None,
            note_local_id: note_local_id.into(),
            index_in_note: 0,
            update_sequence_num: None,
            is_dirty: true,
            is_local_only: false,
            mime: Some(mime.into()),
            width: None,
            height: None,
            data: None,
            recognition: None,
            alternate_data: None,
            attributes: None,
        }
    }

    /// Body of the given blob-store kind.
    pub fn body(&self, kind: BodyKind) -> Option<&ResourceBody> {
        match kind {
            BodyKind::Data => self.data.as_ref(),
            BodyKind::AlternateData => self.alternate_data.as_ref(),
        }
    }

    pub fn body_mut(&mut self, kind: BodyKind) -> Option<&mut ResourceBody> {
        match kind {
            BodyKind::Data => self.data.as_mut(),
            BodyKind::AlternateData => self.alternate_data.as_mut(),
        }
    }

    /// Whether any blob-store body carries raw bytes.
    pub fn has_blob_bytes(&self) -> bool {
        BodyKind::ALL
            .iter()
            .any(|kind| self.body(*kind).is_some_and(|body| body.body.is_some()))
    }

    /// Equality over everything except body bytes and position in the note.
    pub fn metadata_eq(&self, other: &Self) -> bool {
        fn body_eq(left: &Option<ResourceBody>, right: &Option<ResourceBody>) -> bool {
            match (left, right) {
                (Some(left), Some(right)) => left.metadata_eq(right),
                (None, None) => true,
                _ => false,
            }
        }

        self.local_id == other.local_id
            && self.guid == other.guid
            && self.note_local_id == other.note_local_id
            && self.update_sequence_num == other.update_sequence_num
            && self.is_dirty == other.is_dirty
            && self.is_local_only == other.is_local_only
            && self.mime == other.mime
            && self.width == other.width
            && self.height == other.height
            && body_eq(&self.data, &other.data)
            && body_eq(&self.recognition, &other.recognition)
            && body_eq(&self.alternate_data, &other.alternate_data)
            && self.attributes == other.attributes
    }

    /// Copy with every body's raw bytes dropped.
    pub fn without_binary_data(&self) -> Self {
        let mut copy = self.clone();
        for body in [
            &mut copy.data,
            &mut copy.recognition,
            &mut copy.alternate_data,
        ]
        .into_iter()
        .flatten()
        {
            body.body = None;
        }
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::{Resource, ResourceBody};

    fn body(bytes: &[u8]) -> ResourceBody {
        ResourceBody {
            size: Some(bytes.len() as i32),
            hash: Some(vec![7; 16]),
            body: Some(bytes.to_vec()),
        }
    }

    #[test]
    fn metadata_eq_ignores_body_bytes_and_index() {
        let mut left = Resource::new("note-1", "image/png");
        left.data = Some(body(b"abc"));
        let mut right = left.without_binary_data();
        right.index_in_note = 4;
        assert!(left.metadata_eq(&right));
        assert_ne!(left, right);
    }

    #[test]
    fn metadata_eq_detects_hash_change() {
        let mut left = Resource::new("note-1", "image/png");
        left.data = Some(body(b"abc"));
        let mut right = left.clone();
        if let Some(data) = right.data.as_mut() {
            data.hash = Some(vec![9; 16]);
        }
        assert!(!left.metadata_eq(&right));
    }
}
