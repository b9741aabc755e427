//! Tag rows and the note-tag links.
//!
//! # Invariants
//! - `name_lower` mirrors `name` and is unique.
//! - Deleting a tag deletes its whole subtree through the parent foreign key.

use crate::error::StorageResult;
use crate::model::tag::Tag;
use crate::model::{LocalId, SyncFlags};
use crate::query::{
    compile_count, compile_list, ListFilters, ListOptions, ListOrder, ListedEntity, SqlFragment,
};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

/// Order fields for tag lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagListOrder {
    ByName,
    ByUpdateSequenceNumber,
}

impl ListOrder for TagListOrder {
    fn column(self) -> &'static str {
        match self {
            Self::ByName => "tags.name_lower",
            Self::ByUpdateSequenceNumber => "tags.update_sequence_num",
        }
    }
}

pub struct TagEntity;

impl ListedEntity for TagEntity {
    type Order = TagListOrder;
    const TABLE: &'static str = "tags";
    const SELECT_COLUMNS: &'static str = "tags.local_id, tags.guid, tags.name, tags.parent_local_id,
        tags.update_sequence_num, tags.is_dirty, tags.is_local_only, tags.is_favorited";
    const JOINS: &'static str = "";
}

pub struct SqliteTagRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteTagRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    pub fn upsert(&self, tag: &Tag) -> StorageResult<()> {
        self.conn.execute(
            "INSERT INTO tags (
                local_id, guid, name, name_lower, parent_local_id, update_sequence_num,
                is_dirty, is_local_only, is_favorited
             )
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(local_id) DO UPDATE SET
                guid = excluded.guid,
                name = excluded.name,
                name_lower = excluded.name_lower,
                parent_local_id = excluded.parent_local_id,
                update_sequence_num = excluded.update_sequence_num,
                is_dirty = excluded.is_dirty,
                is_local_only = excluded.is_local_only,
                is_favorited = excluded.is_favorited;",
            params![
                tag.local_id,
                tag.guid,
                tag.name,
                tag.name.to_lowercase(),
                tag.parent_local_id,
                tag.update_sequence_num,
                tag.flags.is_dirty,
                tag.flags.is_local_only,
                tag.flags.is_favorited,
            ],
        )?;
        Ok(())
    }

    pub fn find_by_local_id(&self, local_id: &str) -> StorageResult<Option<Tag>> {
        self.find_where("tags.local_id = ?1", local_id)
    }

    pub fn find_by_guid(&self, guid: &str) -> StorageResult<Option<Tag>> {
        self.find_where("tags.guid = ?1", guid)
    }

    pub fn find_by_name(&self, name: &str) -> StorageResult<Option<Tag>> {
        self.find_where("tags.name_lower = ?1", &name.to_lowercase())
    }

    pub fn list(&self, options: &ListOptions<TagListOrder>) -> StorageResult<Vec<Tag>> {
        self.query_tags(compile_list::<TagEntity>(options, None))
    }

    /// Tags linked to one note, in the note's tag order.
    pub fn list_per_note(&self, note_local_id: &str) -> StorageResult<Vec<Tag>> {
        let statement = SqlFragment::with_param(
            format!(
                "SELECT {} FROM tags
                 INNER JOIN note_tags ON note_tags.tag_local_id = tags.local_id
                 WHERE note_tags.note_local_id = ?
                 ORDER BY note_tags.tag_index ASC",
                TagEntity::SELECT_COLUMNS
            ),
            note_local_id.to_string(),
        );
        self.query_tags(statement)
    }

    pub fn count(&self, filters: &ListFilters) -> StorageResult<i64> {
        let (sql, values) = compile_count::<TagEntity>(filters, None).into_parts();
        let count = self
            .conn
            .query_row(&sql, params_from_iter(values), |row| row.get(0))?;
        Ok(count)
    }

    /// Local ids of every tag below `local_id`, nearest first.
    pub fn descendant_local_ids(&self, local_id: &str) -> StorageResult<Vec<LocalId>> {
        let mut stmt = self.conn.prepare(
            "WITH RECURSIVE subtree(local_id, depth) AS (
                SELECT local_id, 1 FROM tags WHERE parent_local_id = ?1
                UNION ALL
                SELECT tags.local_id, subtree.depth + 1
                FROM tags
                INNER JOIN subtree ON tags.parent_local_id = subtree.local_id
             )
             SELECT local_id FROM subtree ORDER BY depth ASC, local_id ASC;",
        )?;
        let ids = stmt
            .query_map([local_id], |row| row.get(0))?
            .collect::<Result<Vec<LocalId>, _>>()?;
        Ok(ids)
    }

    pub fn local_id_by_guid(&self, guid: &str) -> StorageResult<Option<LocalId>> {
        let local_id = self
            .conn
            .query_row("SELECT local_id FROM tags WHERE guid = ?1;", [guid], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(local_id)
    }

    pub fn delete(&self, local_id: &str) -> StorageResult<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM tags WHERE local_id = ?1;", [local_id])?;
        Ok(changed > 0)
    }

    fn find_where(&self, condition: &str, value: &str) -> StorageResult<Option<Tag>> {
        let sql = format!(
            "SELECT {} FROM tags WHERE {condition};",
            TagEntity::SELECT_COLUMNS
        );
        let tag = self
            .conn
            .query_row(&sql, [value], map_tag_row)
            .optional()?;
        Ok(tag)
    }

    fn query_tags(&self, statement: SqlFragment) -> StorageResult<Vec<Tag>> {
        let (sql, values) = statement.into_parts();
        let mut stmt = self.conn.prepare(&sql)?;
        let tags = stmt
            .query_map(params_from_iter(values), map_tag_row)?
            .collect::<Result<Vec<Tag>, _>>()?;
        Ok(tags)
    }
}

fn map_tag_row(row: &Row<'_>) -> rusqlite::Result<Tag> {
    Ok(Tag {
        local_id: row.get("local_id")?,
        guid: row.get("guid")?,
        name: row.get("name")?,
        parent_local_id: row.get("parent_local_id")?,
        update_sequence_num: row.get("update_sequence_num")?,
        flags: SyncFlags {
            is_dirty: row.get("is_dirty")?,
            is_local_only: row.get("is_local_only")?,
            is_favorited: row.get("is_favorited")?,
        },
    })
}
