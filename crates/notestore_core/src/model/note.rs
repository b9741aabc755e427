//! Note record and ENML-derived projections.
//!
//! # Responsibility
//! - Define the note shape with its sub-records, tags and resources.
//! - Derive the search projections (plain text, to-do and encryption state)
//!   from ENML content.
//!
//! # Invariants
//! - `local_id` and `guid` are never both absent.
//! - `resources[i].index_in_note == i` once a note has been persisted.

use super::resource::Resource;
use super::{new_local_id, LocalId, SyncFlags};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static EN_TODO_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<en-todo\b([^>]*)/?>").expect("valid en-todo regex"));
static CHECKED_TRUE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"checked\s*=\s*"true""#).expect("valid checked regex"));
static EN_CRYPT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<en-crypt\b").expect("valid en-crypt regex"));
static EN_CRYPT_BLOCK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<en-crypt\b[^>]*>.*?</en-crypt>").expect("valid en-crypt block regex")
});
static XML_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid tag regex"));
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid ws regex"));

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NoteAttributes {
    pub subject_date: Option<i64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
    pub author: Option<String>,
    pub source: Option<String>,
    pub source_url: Option<String>,
    pub source_application: Option<String>,
    pub place_name: Option<String>,
    pub content_class: Option<String>,
    pub reminder_order: Option<i64>,
    pub reminder_time: Option<i64>,
    pub reminder_done_time: Option<i64>,
}

impl NoteAttributes {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteRestrictions {
    pub no_update_title: Option<bool>,
    pub no_update_content: Option<bool>,
    pub no_email: Option<bool>,
    pub no_share: Option<bool>,
    pub no_share_publicly: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteLimits {
    pub note_resource_count_max: Option<i32>,
    pub upload_limit: Option<i64>,
    pub resource_size_max: Option<i64>,
    pub note_size_max: Option<i64>,
    pub uploaded: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    /// Empty only for notes identified by `guid` that have never been stored
    /// locally; `put` assigns one.
    pub local_id: LocalId,
    pub guid: Option<String>,
    /// Owning notebook. May be empty when `notebook_guid` is set; `put`
    /// resolves it.
    pub notebook_local_id: LocalId,
    pub notebook_guid: Option<String>,
    pub update_sequence_num: Option<i32>,
    pub title: Option<String>,
    /// ENML document.
    pub content: Option<String>,
    /// Epoch milliseconds.
    pub created_at: Option<i64>,
    pub updated_at: Option<i64>,
    pub deleted_at: Option<i64>,
    pub is_active: bool,
    #[serde(default)]
    pub flags: SyncFlags,
    pub attributes: Option<NoteAttributes>,
    pub restrictions: Option<NoteRestrictions>,
    pub limits: Option<NoteLimits>,
    /// Ordered tag local ids.
    #[serde(default)]
    pub tag_local_ids: Vec<LocalId>,
    /// Ordered resources.
    #[serde(default)]
    pub resources: Vec<Resource>,
}

impl Note {
    pub fn new(notebook_local_id: impl Into<LocalId>) -> Self {
        Self {
            local_id: new_local_id(),
            guid: None,
            notebook_local_id: notebook_local_id.into(),
            notebook_guid: None,
            update_sequence_num: None,
            title: None,
            content: None,
            created_at: None,
            updated_at: None,
            deleted_at: None,
            is_active: true,
            flags: SyncFlags::default(),
            attributes: None,
            restrictions: None,
            limits: None,
            tag_local_ids: Vec::new(),
            resources: Vec::new(),
        }
    }

    /// Assigns `index_in_note` and `note_local_id` from list position.
    pub fn normalize_resources(&mut self) {
        for (index, resource) in self.resources.iter_mut().enumerate() {
            resource.index_in_note = index as i32;
            resource.note_local_id.clone_from(&self.local_id);
        }
    }
}

/// Search projections derived from ENML content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentSummary {
    /// Markup-free text used by full-text search.
    pub plain_text: String,
    pub contains_finished_todo: bool,
    pub contains_unfinished_todo: bool,
    pub contains_encryption: bool,
}

impl ContentSummary {
    /// Derives search projections from an ENML document.
    ///
    /// Encrypted blocks are excluded from the plain text.
    pub fn from_enml(content: &str) -> Self {
        let mut contains_finished_todo = false;
        let mut contains_unfinished_todo = false;
        for caps in EN_TODO_RE.captures_iter(content) {
            let attributes = caps.get(1).map_or("", |m| m.as_str());
            if CHECKED_TRUE_RE.is_match(attributes) {
                contains_finished_todo = true;
            } else {
                contains_unfinished_todo = true;
            }
        }

        let without_crypt = EN_CRYPT_BLOCK_RE.replace_all(content, " ");
        let without_tags = XML_TAG_RE.replace_all(&without_crypt, " ");
        let decoded = decode_basic_entities(&without_tags);
        let plain_text = WHITESPACE_RE.replace_all(&decoded, " ").trim().to_string();

        Self {
            plain_text,
            contains_finished_todo,
            contains_unfinished_todo,
            contains_encryption: EN_CRYPT_RE.is_match(content),
        }
    }
}

fn decode_basic_entities(value: &str) -> String {
    value
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
