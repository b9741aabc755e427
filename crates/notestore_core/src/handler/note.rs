//! Note handler.
//!
//! # Responsibility
//! - Store notes together with their tag links and resources.
//! - Answer list, count and search requests.
//!
//! # Invariants
//! - A put or update touches note row, tag links and resource rows in one
//!   transaction; body files written for it survive only if that transaction
//!   commits.
//! - Search queries are compiled before any note row is read.

use super::{read_in_transaction, HandlerContext};
use crate::blob::{partial_update, BlobStore, BlobWriteSet};
use crate::db::{Transaction, TransactionMode};
use crate::error::{StorageError, StorageResult};
use crate::model::note::Note;
use crate::model::resource::Resource;
use crate::model::{new_local_id, LocalId};
use crate::notify::{deliver, StorageEvent};
use crate::query::{ListFilters, ListOptions, SqlFragment};
use crate::repo::resource_repo::load_blob_bodies;
use crate::repo::{
    NoteListOrder, SqliteNoteRepository, SqliteNotebookRepository, SqliteResourceRepository,
};
use crate::search::{self, NoteSearchQuery};
use crate::task::TaskFuture;
use crate::validation::EntityValidator;
use log::info;
use rusqlite::Connection;
use std::sync::{Arc, Weak};

/// What to load alongside each note.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchNoteOptions {
    pub with_resource_metadata: bool,
    /// Implies metadata.
    pub with_resource_binary_data: bool,
}

impl FetchNoteOptions {
    pub fn metadata() -> Self {
        Self {
            with_resource_metadata: true,
            with_resource_binary_data: false,
        }
    }

    pub fn full() -> Self {
        Self {
            with_resource_metadata: true,
            with_resource_binary_data: true,
        }
    }

    fn wants_resources(self) -> bool {
        self.with_resource_metadata || self.with_resource_binary_data
    }
}

/// Which parts of an existing note an update rewrites.
///
/// Note fields are always rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateNoteOptions {
    pub update_resource_metadata: bool,
    /// Ignored unless `update_resource_metadata` is set.
    pub update_resource_binary_data: bool,
    pub update_tags: bool,
}

impl Default for UpdateNoteOptions {
    fn default() -> Self {
        Self {
            update_resource_metadata: true,
            update_resource_binary_data: true,
            update_tags: true,
        }
    }
}

pub struct NoteHandler {
    ctx: Arc<HandlerContext>,
    this: Weak<NoteHandler>,
}

impl NoteHandler {
    pub(crate) fn new(ctx: Arc<HandlerContext>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            ctx,
            this: this.clone(),
        })
    }

    /// Inserts or fully replaces a note with its tags and resources.
    ///
    /// A note without a local id is matched by guid, or given a fresh local
    /// id. A note without a notebook local id is attached to the notebook
    /// named by `notebook_guid`, which must exist.
    pub fn put(&self, mut note: Note) -> TaskFuture<Note> {
        if !note.local_id.trim().is_empty() {
            note.normalize_resources();
        }
        if let Err(err) = validate_note_tree(self.ctx.validator.as_ref(), &note) {
            return TaskFuture::ready(Err(err));
        }
        let ctx = Arc::clone(&self.ctx);
        self.ctx
            .scheduler
            .submit_write("note_put", self.this.clone(), move |conn| {
                let _blob_guard = ctx.blobs.write_lock();
                let tx = Transaction::begin(conn, TransactionMode::Immediate)?;
                resolve_identity(&tx, &mut note)?;
                note.normalize_resources();

                let notes = SqliteNoteRepository::new(&tx);
                notes.upsert(&note)?;
                notes.replace_tags(&note.local_id, &note.tag_local_ids)?;
                let writes = reconcile_resources(&tx, &ctx, &note, true)?;
                writes.finish(&ctx.blobs, tx.commit())?;

                deliver(ctx.notifier.as_ref(), StorageEvent::NotePut(note.clone()));
                Ok(note)
            })
    }

    /// Rewrites an existing note; `options` picks which sub-records follow.
    ///
    /// Fails with `InvalidArgument` when the note is not stored yet.
    pub fn update(&self, mut note: Note, options: UpdateNoteOptions) -> TaskFuture<Note> {
        if !note.local_id.trim().is_empty() {
            note.normalize_resources();
        }
        let validated = if options.update_resource_metadata {
            validate_note_tree(self.ctx.validator.as_ref(), &note)
        } else {
            self.ctx.validator.validate_note(&note)
        };
        if let Err(err) = validated {
            return TaskFuture::ready(Err(err));
        }
        let ctx = Arc::clone(&self.ctx);
        self.ctx
            .scheduler
            .submit_write("note_update", self.this.clone(), move |conn| {
                let _blob_guard = ctx.blobs.write_lock();
                let tx = Transaction::begin(conn, TransactionMode::Immediate)?;
                resolve_identity(&tx, &mut note)?;

                let notes = SqliteNoteRepository::new(&tx);
                if !notes.exists(&note.local_id)? {
                    return Err(StorageError::InvalidArgument(format!(
                        "note `{}` does not exist",
                        note.local_id
                    )));
                }
                notes.upsert(&note)?;
                if options.update_tags {
                    notes.replace_tags(&note.local_id, &note.tag_local_ids)?;
                }
                let writes = if options.update_resource_metadata {
                    note.normalize_resources();
                    reconcile_resources(&tx, &ctx, &note, options.update_resource_binary_data)?
                } else {
                    BlobWriteSet::new()
                };
                writes.finish(&ctx.blobs, tx.commit())?;

                deliver(ctx.notifier.as_ref(), StorageEvent::NoteUpdated(note.clone()));
                Ok(note)
            })
    }

    pub fn find_by_local_id(
        &self,
        local_id: &str,
        options: FetchNoteOptions,
    ) -> TaskFuture<Option<Note>> {
        let local_id = local_id.to_string();
        let ctx = Arc::clone(&self.ctx);
        self.ctx
            .scheduler
            .submit_read("note_find_by_local_id", self.this.clone(), move |conn| {
                let _blob_guard = options.with_resource_binary_data.then(|| ctx.blobs.read_lock());
                read_in_transaction(conn, |tx| {
                    let note = SqliteNoteRepository::new(tx).find_by_local_id(&local_id)?;
                    note.map(|note| attach_resources(tx, &ctx.blobs, note, options))
                        .transpose()
                })
            })
    }

    pub fn find_by_guid(&self, guid: &str, options: FetchNoteOptions) -> TaskFuture<Option<Note>> {
        let guid = guid.to_string();
        let ctx = Arc::clone(&self.ctx);
        self.ctx
            .scheduler
            .submit_read("note_find_by_guid", self.this.clone(), move |conn| {
                let _blob_guard = options.with_resource_binary_data.then(|| ctx.blobs.read_lock());
                read_in_transaction(conn, |tx| {
                    let note = SqliteNoteRepository::new(tx).find_by_guid(&guid)?;
                    note.map(|note| attach_resources(tx, &ctx.blobs, note, options))
                        .transpose()
                })
            })
    }

    pub fn list(
        &self,
        options: ListOptions<NoteListOrder>,
        fetch: FetchNoteOptions,
    ) -> TaskFuture<Vec<Note>> {
        self.list_where("note_list", options, fetch, None)
    }

    pub fn list_per_notebook(
        &self,
        notebook_local_id: &str,
        options: ListOptions<NoteListOrder>,
        fetch: FetchNoteOptions,
    ) -> TaskFuture<Vec<Note>> {
        let scope = in_notebook(notebook_local_id);
        self.list_where("note_list_per_notebook", options, fetch, Some(scope))
    }

    pub fn list_per_tag(
        &self,
        tag_local_id: &str,
        options: ListOptions<NoteListOrder>,
        fetch: FetchNoteOptions,
    ) -> TaskFuture<Vec<Note>> {
        let scope = SqlFragment::with_param(
            "notes.local_id IN (SELECT note_local_id FROM note_tags WHERE tag_local_id = ?)",
            tag_local_id.to_string(),
        );
        self.list_where("note_list_per_tag", options, fetch, Some(scope))
    }

    pub fn count(&self, filters: ListFilters) -> TaskFuture<i64> {
        self.count_where("note_count", filters, None)
    }

    pub fn count_per_notebook(
        &self,
        notebook_local_id: &str,
        filters: ListFilters,
    ) -> TaskFuture<i64> {
        let scope = in_notebook(notebook_local_id);
        self.count_where("note_count_per_notebook", filters, Some(scope))
    }

    /// Deletes a note with its tag links, resources and body files.
    pub fn expunge_by_local_id(&self, local_id: &str) -> TaskFuture<bool> {
        self.expunge(Some(local_id.to_string()), None)
    }

    pub fn expunge_by_guid(&self, guid: &str) -> TaskFuture<bool> {
        self.expunge(None, Some(guid.to_string()))
    }

    /// Local ids of the notes matching `query`, in storage order.
    pub fn query_note_local_ids(&self, query: NoteSearchQuery) -> TaskFuture<Vec<LocalId>> {
        if !query.has_terms() {
            return TaskFuture::ready(Err(StorageError::compiler("search query has no terms")));
        }
        self.ctx
            .scheduler
            .submit_read("note_query_local_ids", self.this.clone(), move |conn| {
                read_in_transaction(conn, |tx| {
                    let statement = search::compile(tx, &query)?;
                    SqliteNoteRepository::new(tx).query_local_ids(statement)
                })
            })
    }

    /// Notes matching `query`, in storage order.
    pub fn query_notes(
        &self,
        query: NoteSearchQuery,
        fetch: FetchNoteOptions,
    ) -> TaskFuture<Vec<Note>> {
        if !query.has_terms() {
            return TaskFuture::ready(Err(StorageError::compiler("search query has no terms")));
        }
        let ctx = Arc::clone(&self.ctx);
        self.ctx
            .scheduler
            .submit_read("note_query_notes", self.this.clone(), move |conn| {
                let _blob_guard = fetch.with_resource_binary_data.then(|| ctx.blobs.read_lock());
                read_in_transaction(conn, |tx| {
                    let statement = search::compile(tx, &query)?;
                    let notes = SqliteNoteRepository::new(tx);
                    let mut found = Vec::new();
                    for local_id in notes.query_local_ids(statement)? {
                        if let Some(note) = notes.find_by_local_id(&local_id)? {
                            found.push(attach_resources(tx, &ctx.blobs, note, fetch)?);
                        }
                    }
                    Ok(found)
                })
            })
    }

    fn list_where(
        &self,
        context: &'static str,
        options: ListOptions<NoteListOrder>,
        fetch: FetchNoteOptions,
        scope: Option<SqlFragment>,
    ) -> TaskFuture<Vec<Note>> {
        let ctx = Arc::clone(&self.ctx);
        self.ctx
            .scheduler
            .submit_read(context, self.this.clone(), move |conn| {
                let _blob_guard = fetch.with_resource_binary_data.then(|| ctx.blobs.read_lock());
                read_in_transaction(conn, |tx| {
                    SqliteNoteRepository::new(tx)
                        .list(&options, scope)?
                        .into_iter()
                        .map(|note| attach_resources(tx, &ctx.blobs, note, fetch))
                        .collect()
                })
            })
    }

    fn count_where(
        &self,
        context: &'static str,
        filters: ListFilters,
        scope: Option<SqlFragment>,
    ) -> TaskFuture<i64> {
        self.ctx
            .scheduler
            .submit_read(context, self.this.clone(), move |conn| {
                read_in_transaction(conn, |tx| SqliteNoteRepository::new(tx).count(&filters, scope))
            })
    }

    fn expunge(&self, local_id: Option<LocalId>, guid: Option<String>) -> TaskFuture<bool> {
        let ctx = Arc::clone(&self.ctx);
        self.ctx
            .scheduler
            .submit_write("note_expunge", self.this.clone(), move |conn| {
                let _blob_guard = ctx.blobs.write_lock();
                let tx = Transaction::begin(conn, TransactionMode::Immediate)?;
                let notes = SqliteNoteRepository::new(&tx);
                let local_id = match (local_id, guid) {
                    (Some(local_id), _) => Some(local_id),
                    (None, Some(guid)) => notes.local_id_by_guid(&guid)?,
                    (None, None) => None,
                };
                let Some(local_id) = local_id else {
                    tx.commit()?;
                    return Ok(false);
                };
                if !notes.delete(&local_id)? {
                    tx.commit()?;
                    return Ok(false);
                }

                let mut writes = BlobWriteSet::new();
                writes.mark_note_removed(&local_id);
                writes.finish(&ctx.blobs, tx.commit())?;

                info!("event=note_expunge module=handler status=ok");
                deliver(ctx.notifier.as_ref(), StorageEvent::NoteExpunged { local_id });
                Ok(true)
            })
    }
}

fn in_notebook(notebook_local_id: &str) -> SqlFragment {
    SqlFragment::with_param("notes.notebook_local_id = ?", notebook_local_id.to_string())
}

fn validate_note_tree(validator: &dyn EntityValidator, note: &Note) -> StorageResult<()> {
    validator.validate_note(note)?;
    if note.local_id.trim().is_empty() {
        // Resources of a guid-only note have no owner yet; reconciliation
        // validates them once the local id is resolved.
        return Ok(());
    }
    note.resources
        .iter()
        .try_for_each(|resource| validator.validate_resource(resource))
}

/// Fills in the local ids a caller may leave empty.
fn resolve_identity(conn: &Connection, note: &mut Note) -> StorageResult<()> {
    if note.local_id.trim().is_empty() {
        let existing = match note.guid.as_deref() {
            Some(guid) => SqliteNoteRepository::new(conn).local_id_by_guid(guid)?,
            None => None,
        };
        note.local_id = existing.unwrap_or_else(new_local_id);
    }
    if note.notebook_local_id.trim().is_empty() {
        let guid = note.notebook_guid.as_deref().ok_or_else(|| {
            StorageError::InvalidArgument("note references no notebook".to_string())
        })?;
        note.notebook_local_id = SqliteNotebookRepository::new(conn)
            .local_id_by_guid(guid)?
            .ok_or_else(|| {
                StorageError::InvalidArgument(format!("notebook with guid `{guid}` does not exist"))
            })?;
    }
    Ok(())
}

fn reconcile_resources(
    conn: &Connection,
    ctx: &HandlerContext,
    note: &Note,
    update_binary_data: bool,
) -> StorageResult<BlobWriteSet> {
    let previous = SqliteResourceRepository::new(conn).list_for_note(&note.local_id, false)?;
    let (_, writes) = partial_update(
        conn,
        &ctx.blobs,
        ctx.validator.as_ref(),
        &note.local_id,
        &previous,
        &note.resources,
        update_binary_data,
    )?;
    Ok(writes)
}

fn attach_resources(
    conn: &Connection,
    blobs: &BlobStore,
    mut note: Note,
    options: FetchNoteOptions,
) -> StorageResult<Note> {
    if !options.wants_resources() {
        return Ok(note);
    }
    let with_binary_data = options.with_resource_binary_data;
    let stored = SqliteResourceRepository::new(conn).list_for_note(&note.local_id, with_binary_data)?;
    note.resources = stored
        .into_iter()
        .map(|mut stored| {
            if with_binary_data {
                load_blob_bodies(blobs, &mut stored)?;
            }
            Ok(stored.resource)
        })
        .collect::<StorageResult<Vec<Resource>>>()?;
    Ok(note)
}
