//! Wire-format validation collaborator.
//!
//! # Responsibility
//! - Reject entities that the sync service would refuse, before any SQL runs.
//! - Report the offending field and a stable reason.
//!
//! # Invariants
//! - Validators are pure: they never touch storage.
//! - Limits come from one constant table.

use crate::error::{StorageError, StorageResult};
use crate::model::note::Note;
use crate::model::notebook::Notebook;
use crate::model::resource::{Resource, ResourceBody};
use crate::model::tag::Tag;
use once_cell::sync::Lazy;
use regex::Regex;

/// Field limits mirrored from the sync service's data model.
pub mod limits {
    pub const GUID_LEN_MAX: usize = 36;
    pub const NOTE_TITLE_LEN_MIN: usize = 1;
    pub const NOTE_TITLE_LEN_MAX: usize = 255;
    pub const NOTEBOOK_NAME_LEN_MIN: usize = 1;
    pub const NOTEBOOK_NAME_LEN_MAX: usize = 100;
    pub const TAG_NAME_LEN_MIN: usize = 1;
    pub const TAG_NAME_LEN_MAX: usize = 100;
    pub const NOTE_CONTENT_LEN_MIN: usize = 0;
    pub const NOTE_CONTENT_LEN_MAX: usize = 5 * 1024 * 1024;
    pub const NOTE_TAGS_MAX: usize = 100;
    pub const NOTE_RESOURCES_MAX: usize = 1000;
    pub const MIME_LEN_MIN: usize = 3;
    pub const MIME_LEN_MAX: usize = 255;
    pub const HASH_LEN: usize = 16;
    pub const RESOURCE_SIZE_MAX: i32 = 200 * 1024 * 1024;
    pub const ATTRIBUTE_LEN_MAX: usize = 4096;
}

static GUID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9.\-_]{1,36}$").expect("valid guid regex"));
static MIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z]+/[A-Za-z0-9._+\-]+$").expect("valid mime regex")
});

/// Validation collaborator invoked before every put/update.
pub trait EntityValidator: Send + Sync {
    fn validate_notebook(&self, notebook: &Notebook) -> StorageResult<()>;
    fn validate_tag(&self, tag: &Tag) -> StorageResult<()>;
    /// Validates note fields; resources are validated separately.
    fn validate_note(&self, note: &Note) -> StorageResult<()>;
    fn validate_resource(&self, resource: &Resource) -> StorageResult<()>;
}

/// Default validator enforcing the service's field rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct WireFormatValidator;

impl EntityValidator for WireFormatValidator {
    fn validate_notebook(&self, notebook: &Notebook) -> StorageResult<()> {
        require_local_id("notebook.local_id", &notebook.local_id)?;
        validate_guid("notebook.guid", notebook.guid.as_deref())?;
        validate_name(
            "notebook.name",
            &notebook.name,
            limits::NOTEBOOK_NAME_LEN_MIN,
            limits::NOTEBOOK_NAME_LEN_MAX,
        )
    }

    fn validate_tag(&self, tag: &Tag) -> StorageResult<()> {
        require_local_id("tag.local_id", &tag.local_id)?;
        validate_guid("tag.guid", tag.guid.as_deref())?;
        validate_name(
            "tag.name",
            &tag.name,
            limits::TAG_NAME_LEN_MIN,
            limits::TAG_NAME_LEN_MAX,
        )?;
        if tag.name.contains(',') {
            return Err(StorageError::validation("tag.name", "must not contain commas"));
        }
        if tag.parent_local_id.as_deref() == Some(tag.local_id.as_str()) {
            return Err(StorageError::validation(
                "tag.parent_local_id",
                "tag cannot be its own parent",
            ));
        }
        Ok(())
    }

    fn validate_note(&self, note: &Note) -> StorageResult<()> {
        if note.local_id.trim().is_empty() && note.guid.is_none() {
            return Err(StorageError::validation(
                "note.local_id",
                "local id and guid are both absent",
            ));
        }
        validate_guid("note.guid", note.guid.as_deref())?;
        validate_guid("note.notebook_guid", note.notebook_guid.as_deref())?;
        if note.notebook_local_id.trim().is_empty() && note.notebook_guid.is_none() {
            return Err(StorageError::validation(
                "note.notebook_local_id",
                "note must reference a notebook",
            ));
        }
        if let Some(title) = note.title.as_deref() {
            validate_name(
                "note.title",
                title,
                limits::NOTE_TITLE_LEN_MIN,
                limits::NOTE_TITLE_LEN_MAX,
            )?;
        }
        if let Some(content) = note.content.as_deref() {
            let len = content.len();
            if !(limits::NOTE_CONTENT_LEN_MIN..=limits::NOTE_CONTENT_LEN_MAX).contains(&len) {
                return Err(StorageError::validation(
                    "note.content",
                    format!("length {len} is out of range"),
                ));
            }
        }
        if note.tag_local_ids.len() > limits::NOTE_TAGS_MAX {
            return Err(StorageError::validation("note.tag_local_ids", "too many tags"));
        }
        if note.resources.len() > limits::NOTE_RESOURCES_MAX {
            return Err(StorageError::validation("note.resources", "too many resources"));
        }
        if let Some(attributes) = note.attributes.as_ref() {
            for (field, value) in [
                ("note.attributes.author", attributes.author.as_deref()),
                ("note.attributes.source", attributes.source.as_deref()),
                ("note.attributes.source_url", attributes.source_url.as_deref()),
                (
                    "note.attributes.source_application",
                    attributes.source_application.as_deref(),
                ),
                ("note.attributes.place_name", attributes.place_name.as_deref()),
                (
                    "note.attributes.content_class",
                    attributes.content_class.as_deref(),
                ),
            ] {
                if value.is_some_and(|value| value.len() > limits::ATTRIBUTE_LEN_MAX) {
                    return Err(StorageError::validation(field, "value is too long"));
                }
            }
        }
        Ok(())
    }

    fn validate_resource(&self, resource: &Resource) -> StorageResult<()> {
        require_local_id("resource.local_id", &resource.local_id)?;
        require_local_id("resource.note_local_id", &resource.note_local_id)?;
        validate_guid("resource.guid", resource.guid.as_deref())?;
        if let Some(mime) = resource.mime.as_deref() {
            if !(limits::MIME_LEN_MIN..=limits::MIME_LEN_MAX).contains(&mime.len())
                || !MIME_RE.is_match(mime)
            {
                return Err(StorageError::validation(
                    "resource.mime",
                    format!("`{mime}` is not a valid mime type"),
                ));
            }
        }
        validate_body("resource.data", resource.data.as_ref())?;
        validate_body("resource.recognition", resource.recognition.as_ref())?;
        validate_body("resource.alternate_data", resource.alternate_data.as_ref())
    }
}

fn require_local_id(field: &str, value: &str) -> StorageResult<()> {
    if value.trim().is_empty() {
        return Err(StorageError::validation(field, "must not be empty"));
    }
    Ok(())
}

fn validate_guid(field: &str, guid: Option<&str>) -> StorageResult<()> {
    match guid {
        Some(value) if value.len() > limits::GUID_LEN_MAX || !GUID_RE.is_match(value) => Err(
            StorageError::validation(field, format!("`{value}` is not a valid guid")),
        ),
        _ => Ok(()),
    }
}

fn validate_name(field: &str, value: &str, min: usize, max: usize) -> StorageResult<()> {
    let len = value.chars().count();
    if len < min || len > max {
        return Err(StorageError::validation(
            field,
            format!("length {len} is outside {min}..={max}"),
        ));
    }
    if value.trim() != value {
        return Err(StorageError::validation(
            field,
            "must not start or end with whitespace",
        ));
    }
    Ok(())
}

fn validate_body(field: &str, body: Option<&ResourceBody>) -> StorageResult<()> {
    let Some(body) = body else {
        return Ok(());
    };
    if let Some(hash) = body.hash.as_ref() {
        if hash.len() != limits::HASH_LEN {
            return Err(StorageError::validation(
                format!("{field}.hash"),
                format!("hash must be {} bytes", limits::HASH_LEN),
            ));
        }
    }
    if let Some(size) = body.size {
        if !(0..=limits::RESOURCE_SIZE_MAX).contains(&size) {
            return Err(StorageError::validation(
                format!("{field}.size"),
                format!("size {size} is out of range"),
            ));
        }
        if let Some(bytes) = body.body.as_ref() {
            if bytes.len() != size as usize {
                return Err(StorageError::validation(
                    format!("{field}.size"),
                    format!("declared size {size} differs from body length {}", bytes.len()),
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{EntityValidator, WireFormatValidator};
    use crate::error::StorageError;
    use crate::model::note::Note;
    use crate::model::resource::{Resource, ResourceBody};
    use crate::model::tag::Tag;

    fn field_of(err: StorageError) -> String {
        match err {
            StorageError::ValidationFailed { field, .. } => field,
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn note_without_local_id_and_guid_is_rejected() {
        let mut note = Note::new("nb");
        note.local_id.clear();
        let err = WireFormatValidator.validate_note(&note).unwrap_err();
        assert_eq!(field_of(err), "note.local_id");

        note.guid = Some("0f1e2d3c-aaaa-bbbb-cccc-000000000001".to_string());
        WireFormatValidator.validate_note(&note).unwrap();
    }

    #[test]
    fn title_with_surrounding_whitespace_is_rejected() {
        let mut note = Note::new("nb");
        note.title = Some(" padded ".to_string());
        let err = WireFormatValidator.validate_note(&note).unwrap_err();
        assert_eq!(field_of(err), "note.title");
    }

    #[test]
    fn tag_name_with_comma_is_rejected() {
        let err = WireFormatValidator
            .validate_tag(&Tag::new("a,b"))
            .unwrap_err();
        assert_eq!(field_of(err), "tag.name");
    }

    #[test]
    fn resource_body_size_must_match_bytes() {
        let mut resource = Resource::new("note", "image/png");
        resource.data = Some(ResourceBody {
            size: Some(10),
            hash: Some(vec![0; 16]),
            body: Some(vec![1, 2, 3]),
        });
        let err = WireFormatValidator.validate_resource(&resource).unwrap_err();
        assert_eq!(field_of(err), "resource.data.size");
    }

    #[test]
    fn resource_mime_shape_is_checked() {
        let resource = Resource::new("note", "not a mime");
        let err = WireFormatValidator.validate_resource(&resource).unwrap_err();
        assert_eq!(field_of(err), "resource.mime");
    }
}
