//! Notebook rows and their restrictions.
//!
//! # Invariants
//! - `name_lower` mirrors `name` and is unique, so name lookups are
//!   case-insensitive.
//! - At most one notebook carries `is_default = 1`.

use crate::error::StorageResult;
use crate::model::notebook::{Notebook, NotebookRestrictions};
use crate::model::{LocalId, SyncFlags};
use crate::query::{compile_count, compile_list, ListFilters, ListOptions, ListOrder, ListedEntity};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, ToSql};

/// Order fields for notebook lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotebookListOrder {
    ByName,
    ByCreated,
    ByUpdated,
    ByUpdateSequenceNumber,
}

impl ListOrder for NotebookListOrder {
    fn column(self) -> &'static str {
        match self {
            Self::ByName => "notebooks.name_lower",
            Self::ByCreated => "notebooks.created_at",
            Self::ByUpdated => "notebooks.updated_at",
            Self::ByUpdateSequenceNumber => "notebooks.update_sequence_num",
        }
    }
}

/// Listing layout of the `notebooks` table.
pub struct NotebookEntity;

impl ListedEntity for NotebookEntity {
    type Order = NotebookListOrder;
    const TABLE: &'static str = "notebooks";
    const SELECT_COLUMNS: &'static str = "notebooks.local_id, notebooks.guid, notebooks.name,
        notebooks.update_sequence_num, notebooks.created_at, notebooks.updated_at,
        notebooks.is_default, notebooks.is_dirty, notebooks.is_local_only, notebooks.is_favorited,
        notebook_restrictions.notebook_local_id AS restrictions_owner,
        notebook_restrictions.no_read_notes, notebook_restrictions.no_create_notes,
        notebook_restrictions.no_update_notes, notebook_restrictions.no_expunge_notes,
        notebook_restrictions.no_create_tags, notebook_restrictions.no_update_tags";
    const JOINS: &'static str = " LEFT JOIN notebook_restrictions ON notebook_restrictions.notebook_local_id = notebooks.local_id";
}

pub struct SqliteNotebookRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteNotebookRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Inserts or overwrites one notebook and its restrictions.
    pub fn upsert(&self, notebook: &Notebook) -> StorageResult<()> {
        if notebook.is_default {
            self.conn.execute(
                "UPDATE notebooks SET is_default = 0 WHERE is_default = 1 AND local_id <> ?1;",
                [&notebook.local_id],
            )?;
        }

        self.conn.execute(
            "INSERT INTO notebooks (
                local_id, guid, name, name_lower, update_sequence_num, created_at, updated_at,
                is_default, is_dirty, is_local_only, is_favorited
             )
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(local_id) DO UPDATE SET
                guid = excluded.guid,
                name = excluded.name,
                name_lower = excluded.name_lower,
                update_sequence_num = excluded.update_sequence_num,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                is_default = excluded.is_default,
                is_dirty = excluded.is_dirty,
                is_local_only = excluded.is_local_only,
                is_favorited = excluded.is_favorited;",
            params![
                notebook.local_id,
                notebook.guid,
                notebook.name,
                notebook.name.to_lowercase(),
                notebook.update_sequence_num,
                notebook.created_at,
                notebook.updated_at,
                notebook.is_default,
                notebook.flags.is_dirty,
                notebook.flags.is_local_only,
                notebook.flags.is_favorited,
            ],
        )?;

        self.conn.execute(
            "DELETE FROM notebook_restrictions WHERE notebook_local_id = ?1;",
            [&notebook.local_id],
        )?;
        if let Some(restrictions) = notebook.restrictions.as_ref() {
            self.conn.execute(
                "INSERT INTO notebook_restrictions (
                    notebook_local_id, no_read_notes, no_create_notes, no_update_notes,
                    no_expunge_notes, no_create_tags, no_update_tags
                 )
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
                params![
                    notebook.local_id,
                    restrictions.no_read_notes,
                    restrictions.no_create_notes,
                    restrictions.no_update_notes,
                    restrictions.no_expunge_notes,
                    restrictions.no_create_tags,
                    restrictions.no_update_tags,
                ],
            )?;
        }
        Ok(())
    }

    pub fn find_by_local_id(&self, local_id: &str) -> StorageResult<Option<Notebook>> {
        self.find_where("notebooks.local_id = ?1", local_id)
    }

    pub fn find_by_guid(&self, guid: &str) -> StorageResult<Option<Notebook>> {
        self.find_where("notebooks.guid = ?1", guid)
    }

    pub fn find_by_name(&self, name: &str) -> StorageResult<Option<Notebook>> {
        self.find_where("notebooks.name_lower = ?1", name.to_lowercase())
    }

    pub fn find_default(&self) -> StorageResult<Option<Notebook>> {
        self.find_where("notebooks.is_default = ?1", 1_i64)
    }

    pub fn local_id_by_guid(&self, guid: &str) -> StorageResult<Option<LocalId>> {
        let local_id = self
            .conn
            .query_row(
                "SELECT local_id FROM notebooks WHERE guid = ?1;",
                [guid],
                |row| row.get(0),
            )
            .optional()?;
        Ok(local_id)
    }

    pub fn list(&self, options: &ListOptions<NotebookListOrder>) -> StorageResult<Vec<Notebook>> {
        let (sql, values) = compile_list::<NotebookEntity>(options, None).into_parts();
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(values))?;
        let mut notebooks = Vec::new();
        while let Some(row) = rows.next()? {
            notebooks.push(map_notebook_row(row)?);
        }
        Ok(notebooks)
    }

    pub fn count(&self, filters: &ListFilters) -> StorageResult<i64> {
        let (sql, values) = compile_count::<NotebookEntity>(filters, None).into_parts();
        let count = self
            .conn
            .query_row(&sql, params_from_iter(values), |row| row.get(0))?;
        Ok(count)
    }

    /// Local ids of the notes stored in one notebook.
    pub fn note_local_ids(&self, notebook_local_id: &str) -> StorageResult<Vec<LocalId>> {
        let mut stmt = self.conn.prepare(
            "SELECT local_id FROM notes WHERE notebook_local_id = ?1 ORDER BY id ASC;",
        )?;
        let ids = stmt
            .query_map([notebook_local_id], |row| row.get(0))?
            .collect::<Result<Vec<LocalId>, _>>()?;
        Ok(ids)
    }

    /// Deletes one notebook; notes, resources and tag links cascade.
    pub fn delete(&self, local_id: &str) -> StorageResult<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM notebooks WHERE local_id = ?1;", [local_id])?;
        Ok(changed > 0)
    }

    fn find_where<P: ToSql>(&self, condition: &str, value: P) -> StorageResult<Option<Notebook>> {
        let sql = format!(
            "SELECT {} FROM notebooks{} WHERE {condition};",
            NotebookEntity::SELECT_COLUMNS,
            NotebookEntity::JOINS
        );
        let notebook = self
            .conn
            .query_row(&sql, [value], map_notebook_row)
            .optional()?;
        Ok(notebook)
    }
}

fn map_notebook_row(row: &Row<'_>) -> rusqlite::Result<Notebook> {
    let restrictions_owner: Option<String> = row.get("restrictions_owner")?;
    let restrictions = match restrictions_owner {
        Some(_) => Some(NotebookRestrictions {
            no_read_notes: row.get("no_read_notes")?,
            no_create_notes: row.get("no_create_notes")?,
            no_update_notes: row.get("no_update_notes")?,
            no_expunge_notes: row.get("no_expunge_notes")?,
            no_create_tags: row.get("no_create_tags")?,
            no_update_tags: row.get("no_update_tags")?,
        }),
        None => None,
    };

    Ok(Notebook {
        local_id: row.get("local_id")?,
        guid: row.get("guid")?,
        name: row.get("name")?,
        update_sequence_num: row.get("update_sequence_num")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        is_default: row.get("is_default")?,
        flags: SyncFlags {
            is_dirty: row.get("is_dirty")?,
            is_local_only: row.get("is_local_only")?,
            is_favorited: row.get("is_favorited")?,
        },
        restrictions,
    })
}
