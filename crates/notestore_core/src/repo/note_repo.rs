//! Note rows, their sub-records and tag links.
//!
//! # Responsibility
//! - Map `notes`, `note_restrictions`, `note_limits` and `note_tags` rows
//!   to [`Note`] and back.
//! - Store the ENML-derived search projections next to the content.
//!
//! # Invariants
//! - Writes go through `INSERT ... ON CONFLICT DO UPDATE`, so the row id
//!   behind the full-text index stays stable across puts.
//! - `note_tags.tag_index` preserves the caller's tag order.
//! - Resources are not handled here; see `resource_repo` and the blob
//!   reconciler.

use crate::error::StorageResult;
use crate::model::note::{ContentSummary, Note, NoteAttributes, NoteLimits, NoteRestrictions};
use crate::model::{LocalId, SyncFlags};
use crate::query::{
    compile_count, compile_list, ListFilters, ListOptions, ListOrder, ListedEntity, SqlFragment,
};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

/// Order fields for note lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteListOrder {
    ByCreated,
    ByUpdated,
    ByDeleted,
    ByTitle,
    ByUpdateSequenceNumber,
}

impl ListOrder for NoteListOrder {
    fn column(self) -> &'static str {
        match self {
            Self::ByCreated => "notes.created_at",
            Self::ByUpdated => "notes.updated_at",
            Self::ByDeleted => "notes.deleted_at",
            Self::ByTitle => "notes.title",
            Self::ByUpdateSequenceNumber => "notes.update_sequence_num",
        }
    }
}

pub struct NoteEntity;

impl ListedEntity for NoteEntity {
    type Order = NoteListOrder;
    const TABLE: &'static str = "notes";
    const SELECT_COLUMNS: &'static str = "notes.local_id, notes.guid, notes.notebook_local_id,
        (SELECT guid FROM notebooks WHERE notebooks.local_id = notes.notebook_local_id) AS notebook_guid,
        notes.update_sequence_num, notes.title, notes.content,
        notes.created_at, notes.updated_at, notes.deleted_at, notes.is_active,
        notes.is_dirty, notes.is_local_only, notes.is_favorited,
        notes.subject_date, notes.latitude, notes.longitude, notes.altitude,
        notes.author, notes.source, notes.source_url, notes.source_application,
        notes.place_name, notes.content_class,
        notes.reminder_order, notes.reminder_time, notes.reminder_done_time,
        note_restrictions.note_local_id AS restrictions_owner,
        note_restrictions.no_update_title, note_restrictions.no_update_content,
        note_restrictions.no_email, note_restrictions.no_share, note_restrictions.no_share_publicly,
        note_limits.note_local_id AS limits_owner,
        note_limits.note_resource_count_max, note_limits.upload_limit,
        note_limits.resource_size_max, note_limits.note_size_max, note_limits.uploaded";
    const JOINS: &'static str = " LEFT JOIN note_restrictions ON note_restrictions.note_local_id = notes.local_id LEFT JOIN note_limits ON note_limits.note_local_id = notes.local_id";
}

pub struct SqliteNoteRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteNoteRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Inserts or overwrites the note row with its restrictions and limits.
    /// Tags and resources are left alone.
    pub fn upsert(&self, note: &Note) -> StorageResult<()> {
        let summary = note.content.as_deref().map(ContentSummary::from_enml);
        let attributes = note.attributes.clone().unwrap_or_default();
        self.conn.execute(
            "INSERT INTO notes (
                local_id, guid, notebook_local_id, update_sequence_num, title, content,
                content_text, content_length, created_at, updated_at, deleted_at, is_active,
                is_dirty, is_local_only, is_favorited,
                contains_finished_todo, contains_unfinished_todo, contains_encryption,
                subject_date, latitude, longitude, altitude, author, source, source_url,
                source_application, place_name, content_class,
                reminder_order, reminder_time, reminder_done_time
             )
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                     ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30, ?31)
             ON CONFLICT(local_id) DO UPDATE SET
                guid = excluded.guid,
                notebook_local_id = excluded.notebook_local_id,
                update_sequence_num = excluded.update_sequence_num,
                title = excluded.title,
                content = excluded.content,
                content_text = excluded.content_text,
                content_length = excluded.content_length,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                deleted_at = excluded.deleted_at,
                is_active = excluded.is_active,
                is_dirty = excluded.is_dirty,
                is_local_only = excluded.is_local_only,
                is_favorited = excluded.is_favorited,
                contains_finished_todo = excluded.contains_finished_todo,
                contains_unfinished_todo = excluded.contains_unfinished_todo,
                contains_encryption = excluded.contains_encryption,
                subject_date = excluded.subject_date,
                latitude = excluded.latitude,
                longitude = excluded.longitude,
                altitude = excluded.altitude,
                author = excluded.author,
                source = excluded.source,
                source_url = excluded.source_url,
                source_application = excluded.source_application,
                place_name = excluded.place_name,
                content_class = excluded.content_class,
                reminder_order = excluded.reminder_order,
                reminder_time = excluded.reminder_time,
                reminder_done_time = excluded.reminder_done_time;",
            params![
                note.local_id,
                note.guid,
                note.notebook_local_id,
                note.update_sequence_num,
                note.title,
                note.content,
                summary.as_ref().map(|summary| summary.plain_text.clone()),
                note.content.as_ref().map(|content| content.len() as i64),
                note.created_at,
                note.updated_at,
                note.deleted_at,
                note.is_active,
                note.flags.is_dirty,
                note.flags.is_local_only,
                note.flags.is_favorited,
                summary.as_ref().map(|summary| summary.contains_finished_todo),
                summary.as_ref().map(|summary| summary.contains_unfinished_todo),
                summary.as_ref().map(|summary| summary.contains_encryption),
                attributes.subject_date,
                attributes.latitude,
                attributes.longitude,
                attributes.altitude,
                attributes.author,
                attributes.source,
                attributes.source_url,
                attributes.source_application,
                attributes.place_name,
                attributes.content_class,
                attributes.reminder_order,
                attributes.reminder_time,
                attributes.reminder_done_time,
            ],
        )?;

        self.replace_restrictions(&note.local_id, note.restrictions.as_ref())?;
        self.replace_limits(&note.local_id, note.limits.as_ref())
    }

    /// Replaces the whole tag set, keeping `tag_local_ids` order.
    pub fn replace_tags(&self, note_local_id: &str, tag_local_ids: &[LocalId]) -> StorageResult<()> {
        self.conn.execute(
            "DELETE FROM note_tags WHERE note_local_id = ?1;",
            [note_local_id],
        )?;
        let mut insert = self.conn.prepare(
            "INSERT OR IGNORE INTO note_tags (note_local_id, tag_local_id, tag_index)
             VALUES (?1, ?2, ?3);",
        )?;
        for (index, tag_local_id) in tag_local_ids.iter().enumerate() {
            insert.execute(params![note_local_id, tag_local_id, index as i64])?;
        }
        Ok(())
    }

    pub fn tag_local_ids(&self, note_local_id: &str) -> StorageResult<Vec<LocalId>> {
        let mut stmt = self.conn.prepare(
            "SELECT tag_local_id FROM note_tags WHERE note_local_id = ?1 ORDER BY tag_index ASC;",
        )?;
        let ids = stmt
            .query_map([note_local_id], |row| row.get(0))?
            .collect::<Result<Vec<LocalId>, _>>()?;
        Ok(ids)
    }

    /// Note with its tags, without resources.
    pub fn find_by_local_id(&self, local_id: &str) -> StorageResult<Option<Note>> {
        self.find_where("notes.local_id = ?1", local_id)
    }

    pub fn find_by_guid(&self, guid: &str) -> StorageResult<Option<Note>> {
        self.find_where("notes.guid = ?1", guid)
    }

    pub fn local_id_by_guid(&self, guid: &str) -> StorageResult<Option<LocalId>> {
        let local_id = self
            .conn
            .query_row("SELECT local_id FROM notes WHERE guid = ?1;", [guid], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(local_id)
    }

    pub fn exists(&self, local_id: &str) -> StorageResult<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM notes WHERE local_id = ?1);",
            [local_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Lists notes; `extra` narrows the set (one notebook, one tag).
    pub fn list(
        &self,
        options: &ListOptions<NoteListOrder>,
        extra: Option<SqlFragment>,
    ) -> StorageResult<Vec<Note>> {
        let (sql, values) = compile_list::<NoteEntity>(options, extra).into_parts();
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(values))?;
        let mut notes = Vec::new();
        while let Some(row) = rows.next()? {
            notes.push(map_note_row(row)?);
        }
        for note in &mut notes {
            note.tag_local_ids = self.tag_local_ids(&note.local_id)?;
        }
        Ok(notes)
    }

    pub fn count(&self, filters: &ListFilters, extra: Option<SqlFragment>) -> StorageResult<i64> {
        let (sql, values) = compile_count::<NoteEntity>(filters, extra).into_parts();
        let count = self
            .conn
            .query_row(&sql, params_from_iter(values), |row| row.get(0))?;
        Ok(count)
    }

    /// Runs a compiled statement selecting note local ids.
    pub fn query_local_ids(&self, statement: SqlFragment) -> StorageResult<Vec<LocalId>> {
        let (sql, values) = statement.into_parts();
        let mut stmt = self.conn.prepare(&sql)?;
        let ids = stmt
            .query_map(params_from_iter(values), |row| row.get(0))?
            .collect::<Result<Vec<LocalId>, _>>()?;
        Ok(ids)
    }

    /// Deletes one note; tag links, sub-records and resource rows cascade.
    pub fn delete(&self, local_id: &str) -> StorageResult<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM notes WHERE local_id = ?1;", [local_id])?;
        Ok(changed > 0)
    }

    fn find_where(&self, condition: &str, value: &str) -> StorageResult<Option<Note>> {
        let sql = format!(
            "SELECT {} FROM notes{} WHERE {condition};",
            NoteEntity::SELECT_COLUMNS,
            NoteEntity::JOINS
        );
        let note = self.conn.query_row(&sql, [value], map_note_row).optional()?;
        match note {
            Some(mut note) => {
                note.tag_local_ids = self.tag_local_ids(&note.local_id)?;
                Ok(Some(note))
            }
            None => Ok(None),
        }
    }

    fn replace_restrictions(
        &self,
        note_local_id: &str,
        restrictions: Option<&NoteRestrictions>,
    ) -> StorageResult<()> {
        self.conn.execute(
            "DELETE FROM note_restrictions WHERE note_local_id = ?1;",
            [note_local_id],
        )?;
        if let Some(restrictions) = restrictions {
            self.conn.execute(
                "INSERT INTO note_restrictions (
                    note_local_id, no_update_title, no_update_content, no_email, no_share,
                    no_share_publicly
                 )
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
                params![
                    note_local_id,
                    restrictions.no_update_title,
                    restrictions.no_update_content,
                    restrictions.no_email,
                    restrictions.no_share,
                    restrictions.no_share_publicly,
                ],
            )?;
        }
        Ok(())
    }

    fn replace_limits(&self, note_local_id: &str, limits: Option<&NoteLimits>) -> StorageResult<()> {
        self.conn.execute(
            "DELETE FROM note_limits WHERE note_local_id = ?1;",
            [note_local_id],
        )?;
        if let Some(limits) = limits {
            self.conn.execute(
                "INSERT INTO note_limits (
                    note_local_id, note_resource_count_max, upload_limit, resource_size_max,
                    note_size_max, uploaded
                 )
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
                params![
                    note_local_id,
                    limits.note_resource_count_max,
                    limits.upload_limit,
                    limits.resource_size_max,
                    limits.note_size_max,
                    limits.uploaded,
                ],
            )?;
        }
        Ok(())
    }
}

fn map_note_row(row: &Row<'_>) -> rusqlite::Result<Note> {
    let attributes = NoteAttributes {
        subject_date: row.get("subject_date")?,
        latitude: row.get("latitude")?,
        longitude: row.get("longitude")?,
        altitude: row.get("altitude")?,
        author: row.get("author")?,
        source: row.get("source")?,
        source_url: row.get("source_url")?,
        source_application: row.get("source_application")?,
        place_name: row.get("place_name")?,
        content_class: row.get("content_class")?,
        reminder_order: row.get("reminder_order")?,
        reminder_time: row.get("reminder_time")?,
        reminder_done_time: row.get("reminder_done_time")?,
    };

    let restrictions_owner: Option<String> = row.get("restrictions_owner")?;
    let restrictions = match restrictions_owner {
        Some(_) => Some(NoteRestrictions {
            no_update_title: row.get("no_update_title")?,
            no_update_content: row.get("no_update_content")?,
            no_email: row.get("no_email")?,
            no_share: row.get("no_share")?,
            no_share_publicly: row.get("no_share_publicly")?,
        }),
        None => None,
    };

    let limits_owner: Option<String> = row.get("limits_owner")?;
    let limits = match limits_owner {
        Some(_) => Some(NoteLimits {
            note_resource_count_max: row.get("note_resource_count_max")?,
            upload_limit: row.get("upload_limit")?,
            resource_size_max: row.get("resource_size_max")?,
            note_size_max: row.get("note_size_max")?,
            uploaded: row.get("uploaded")?,
        }),
        None => None,
    };

    Ok(Note {
        local_id: row.get("local_id")?,
        guid: row.get("guid")?,
        notebook_local_id: row.get("notebook_local_id")?,
        notebook_guid: row.get("notebook_guid")?,
        update_sequence_num: row.get("update_sequence_num")?,
        title: row.get("title")?,
        content: row.get("content")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        deleted_at: row.get("deleted_at")?,
        is_active: row.get("is_active")?,
        flags: SyncFlags {
            is_dirty: row.get("is_dirty")?,
            is_local_only: row.get("is_local_only")?,
            is_favorited: row.get("is_favorited")?,
        },
        attributes: (!attributes.is_empty()).then_some(attributes),
        restrictions,
        limits,
        tag_local_ids: Vec::new(),
        resources: Vec::new(),
    })
}
