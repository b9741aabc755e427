//! Resource rows.
//!
//! # Responsibility
//! - Map `resources` rows to [`Resource`] and back.
//! - Track which blob version each stored body references.
//!
//! # Invariants
//! - Data and alternate-data bytes never live in the row; only their version
//!   ids do. Recognition bytes live in the row.
//! - Every write here runs inside a caller-owned transaction.

use crate::blob::BlobStore;
use crate::error::StorageResult;
use crate::model::resource::{BodyKind, Resource, ResourceAttributes, ResourceBody};
use crate::model::LocalId;
use rusqlite::{params, Connection, OptionalExtension, Row};

const RESOURCE_COLUMNS: &str = "local_id, guid, note_local_id, index_in_note, update_sequence_num,
    is_dirty, is_local_only, mime, width, height,
    data_size, data_hash, data_body_version_id,
    recognition_size, recognition_hash, recognition_body,
    alternate_data_size, alternate_data_hash, alternate_data_body_version_id,
    source_url, file_name, is_attachment, attribute_timestamp, camera_make";

/// Blob versions referenced by one resource row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BodyVersions {
    pub data: Option<String>,
    pub alternate_data: Option<String>,
}

impl BodyVersions {
    pub fn get(&self, kind: BodyKind) -> Option<&str> {
        match kind {
            BodyKind::Data => self.data.as_deref(),
            BodyKind::AlternateData => self.alternate_data.as_deref(),
        }
    }

    pub fn set(&mut self, kind: BodyKind, version: Option<String>) {
        match kind {
            BodyKind::Data => self.data = version,
            BodyKind::AlternateData => self.alternate_data = version,
        }
    }
}

/// A resource as persisted: metadata plus the blob versions it points to.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredResource {
    pub resource: Resource,
    pub versions: BodyVersions,
}

/// Repository over the `resources` table.
pub struct SqliteResourceRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteResourceRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// One resource by local id. Recognition bytes are read only when
    /// `with_binary_data` is set.
    pub fn find(&self, local_id: &str, with_binary_data: bool) -> StorageResult<Option<StoredResource>> {
        let sql = format!("SELECT {RESOURCE_COLUMNS} FROM resources WHERE local_id = ?1;");
        let stored = self
            .conn
            .query_row(&sql, [local_id], |row| map_resource_row(row, with_binary_data))
            .optional()?;
        Ok(stored)
    }

    /// Resources of one note in `index_in_note` order.
    pub fn list_for_note(
        &self,
        note_local_id: &str,
        with_binary_data: bool,
    ) -> StorageResult<Vec<StoredResource>> {
        let sql = format!(
            "SELECT {RESOURCE_COLUMNS} FROM resources WHERE note_local_id = ?1 ORDER BY index_in_note ASC, local_id ASC;"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([note_local_id])?;
        let mut resources = Vec::new();
        while let Some(row) = rows.next()? {
            resources.push(map_resource_row(row, with_binary_data)?);
        }
        Ok(resources)
    }

    /// Local ids of a note's resources.
    pub fn local_ids_for_note(&self, note_local_id: &str) -> StorageResult<Vec<LocalId>> {
        let mut stmt = self.conn.prepare(
            "SELECT local_id FROM resources WHERE note_local_id = ?1 ORDER BY index_in_note ASC;",
        )?;
        let ids = stmt
            .query_map([note_local_id], |row| row.get(0))?
            .collect::<Result<Vec<LocalId>, _>>()?;
        Ok(ids)
    }

    /// Local id of the note holding resource `local_id`.
    pub fn owner_note(&self, local_id: &str) -> StorageResult<Option<LocalId>> {
        let owner = self
            .conn
            .query_row(
                "SELECT note_local_id FROM resources WHERE local_id = ?1;",
                [local_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(owner)
    }

    pub fn count_for_note(&self, note_local_id: &str) -> StorageResult<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM resources WHERE note_local_id = ?1;",
            [note_local_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Inserts or overwrites one resource row.
    ///
    /// With `write_recognition_body` unset an existing row keeps its
    /// recognition bytes.
    pub fn upsert(
        &self,
        resource: &Resource,
        versions: &BodyVersions,
        write_recognition_body: bool,
    ) -> StorageResult<()> {
        let recognition_body_update = if write_recognition_body {
            "recognition_body = excluded.recognition_body,"
        } else {
            ""
        };
        let sql = format!(
            "INSERT INTO resources ({RESOURCE_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                     ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24)
             ON CONFLICT(local_id) DO UPDATE SET
                guid = excluded.guid,
                note_local_id = excluded.note_local_id,
                index_in_note = excluded.index_in_note,
                update_sequence_num = excluded.update_sequence_num,
                is_dirty = excluded.is_dirty,
                is_local_only = excluded.is_local_only,
                mime = excluded.mime,
                width = excluded.width,
                height = excluded.height,
                data_size = excluded.data_size,
                data_hash = excluded.data_hash,
                data_body_version_id = excluded.data_body_version_id,
                recognition_size = excluded.recognition_size,
                recognition_hash = excluded.recognition_hash,
                {recognition_body_update}
                alternate_data_size = excluded.alternate_data_size,
                alternate_data_hash = excluded.alternate_data_hash,
                alternate_data_body_version_id = excluded.alternate_data_body_version_id,
                source_url = excluded.source_url,
                file_name = excluded.file_name,
                is_attachment = excluded.is_attachment,
                attribute_timestamp = excluded.attribute_timestamp,
                camera_make = excluded.camera_make;"
        );

        let data = resource.data.as_ref();
        let recognition = resource.recognition.as_ref();
        let alternate = resource.alternate_data.as_ref();
        let attributes = resource.attributes.clone().unwrap_or_default();
        self.conn.execute(
            &sql,
            params![
                resource.local_id,
                resource.guid,
                resource.note_local_id,
                resource.index_in_note,
                resource.update_sequence_num,
                resource.is_dirty,
                resource.is_local_only,
                resource.mime,
                resource.width,
                resource.height,
                data.and_then(|body| body.size),
                data.and_then(|body| body.hash.clone()),
                versions.data,
                recognition.and_then(|body| body.size),
                recognition.and_then(|body| body.hash.clone()),
                recognition.and_then(|body| body.body.clone()),
                alternate.and_then(|body| body.size),
                alternate.and_then(|body| body.hash.clone()),
                versions.alternate_data,
                attributes.source_url,
                attributes.file_name,
                attributes.is_attachment,
                attributes.timestamp,
                attributes.camera_make,
            ],
        )?;
        Ok(())
    }

    /// Rewrites only the position column.
    pub fn update_index(&self, local_id: &str, index_in_note: i32) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE resources SET index_in_note = ?2 WHERE local_id = ?1;",
            params![local_id, index_in_note],
        )?;
        Ok(())
    }

    /// Shifts every resource positioned after `removed_index` one slot down.
    pub fn close_index_gap(&self, note_local_id: &str, removed_index: i32) -> StorageResult<usize> {
        let changed = self.conn.execute(
            "UPDATE resources SET index_in_note = index_in_note - 1
             WHERE note_local_id = ?1 AND index_in_note > ?2;",
            params![note_local_id, removed_index],
        )?;
        Ok(changed)
    }

    /// Deletes one row and returns whether it existed.
    pub fn delete(&self, local_id: &str) -> StorageResult<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM resources WHERE local_id = ?1;", [local_id])?;
        Ok(changed > 0)
    }
}

/// Loads data and alternate-data bytes from the blob store into `stored`.
///
/// The caller holds the blob read lock.
pub fn load_blob_bodies(store: &BlobStore, stored: &mut StoredResource) -> StorageResult<()> {
    for kind in BodyKind::ALL {
        let Some(version) = stored.versions.get(kind).map(str::to_string) else {
            continue;
        };
        let bytes = store.read_body(
            &stored.resource.note_local_id,
            &stored.resource.local_id,
            kind,
            &version,
        )?;
        let resource = &mut stored.resource;
        match kind {
            BodyKind::Data => resource.data.get_or_insert_with(ResourceBody::default).body = Some(bytes),
            BodyKind::AlternateData => {
                resource
                    .alternate_data
                    .get_or_insert_with(ResourceBody::default)
                    .body = Some(bytes)
            }
        }
    }
    Ok(())
}

fn map_resource_row(row: &Row<'_>, with_binary_data: bool) -> rusqlite::Result<StoredResource> {
    let data_version: Option<String> = row.get("data_body_version_id")?;
    let alternate_version: Option<String> = row.get("alternate_data_body_version_id")?;

    let data = body_from_row(row, "data_size", "data_hash", data_version.is_some())?;
    let alternate_data = body_from_row(
        row,
        "alternate_data_size",
        "alternate_data_hash",
        alternate_version.is_some(),
    )?;
    let mut recognition = body_from_row(row, "recognition_size", "recognition_hash", false)?;
    if with_binary_data {
        let bytes: Option<Vec<u8>> = row.get("recognition_body")?;
        if let Some(bytes) = bytes {
            recognition.get_or_insert_with(ResourceBody::default).body = Some(bytes);
        }
    }

    let attributes = ResourceAttributes {
        source_url: row.get("source_url")?,
        file_name: row.get("file_name")?,
        is_attachment: row.get("is_attachment")?,
        timestamp: row.get("attribute_timestamp")?,
        camera_make: row.get("camera_make")?,
    };

    Ok(StoredResource {
        resource: Resource {
            local_id: row.get("local_id")?,
            guid: row.get("guid")?,
            note_local_id: row.get("note_local_id")?,
            index_in_note: row.get("index_in_note")?,
            update_sequence_num: row.get("update_sequence_num")?,
            is_dirty: row.get("is_dirty")?,
            is_local_only: row.get("is_local_only")?,
            mime: row.get("mime")?,
            width: row.get("width")?,
            height: row.get("height")?,
            data,
            recognition,
            alternate_data,
            attributes: (!attributes.is_empty()).then_some(attributes),
        },
        versions: BodyVersions {
            data: data_version,
            alternate_data: alternate_version,
        },
    })
}

fn body_from_row(
    row: &Row<'_>,
    size_column: &str,
    hash_column: &str,
    has_stored_bytes: bool,
) -> rusqlite::Result<Option<ResourceBody>> {
    let size: Option<i32> = row.get(size_column)?;
    let hash: Option<Vec<u8>> = row.get(hash_column)?;
    if size.is_none() && hash.is_none() && !has_stored_bytes {
        return Ok(None);
    }
    Ok(Some(ResourceBody {
        size,
        hash,
        body: None,
    }))
}
