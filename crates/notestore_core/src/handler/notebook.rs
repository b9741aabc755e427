//! Notebook handler.

use super::{read_in_transaction, write_in_transaction, HandlerContext};
use crate::blob::BlobWriteSet;
use crate::db::{Transaction, TransactionMode};
use crate::model::notebook::Notebook;
use crate::model::LocalId;
use crate::notify::{deliver, StorageEvent};
use crate::query::{ListFilters, ListOptions};
use crate::repo::{NotebookListOrder, SqliteNotebookRepository};
use crate::task::TaskFuture;
use log::info;
use std::sync::{Arc, Weak};

pub struct NotebookHandler {
    ctx: Arc<HandlerContext>,
    this: Weak<NotebookHandler>,
}

impl NotebookHandler {
    pub(crate) fn new(ctx: Arc<HandlerContext>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            ctx,
            this: this.clone(),
        })
    }

    /// Inserts or replaces a notebook. Marking it default clears the flag on
    /// every other notebook.
    pub fn put(&self, notebook: Notebook) -> TaskFuture<Notebook> {
        if let Err(err) = self.ctx.validator.validate_notebook(&notebook) {
            return TaskFuture::ready(Err(err));
        }
        let ctx = Arc::clone(&self.ctx);
        self.ctx
            .scheduler
            .submit_write("notebook_put", self.this.clone(), move |conn| {
                write_in_transaction(conn, TransactionMode::Immediate, |tx| {
                    SqliteNotebookRepository::new(tx).upsert(&notebook)
                })?;
                deliver(ctx.notifier.as_ref(), StorageEvent::NotebookPut(notebook.clone()));
                Ok(notebook)
            })
    }

    pub fn find_by_local_id(&self, local_id: &str) -> TaskFuture<Option<Notebook>> {
        let local_id = local_id.to_string();
        self.ctx
            .scheduler
            .submit_read("notebook_find_by_local_id", self.this.clone(), move |conn| {
                read_in_transaction(conn, |tx| {
                    SqliteNotebookRepository::new(tx).find_by_local_id(&local_id)
                })
            })
    }

    pub fn find_by_guid(&self, guid: &str) -> TaskFuture<Option<Notebook>> {
        let guid = guid.to_string();
        self.ctx
            .scheduler
            .submit_read("notebook_find_by_guid", self.this.clone(), move |conn| {
                read_in_transaction(conn, |tx| SqliteNotebookRepository::new(tx).find_by_guid(&guid))
            })
    }

    /// Case-insensitive name lookup.
    pub fn find_by_name(&self, name: &str) -> TaskFuture<Option<Notebook>> {
        let name = name.to_string();
        self.ctx
            .scheduler
            .submit_read("notebook_find_by_name", self.this.clone(), move |conn| {
                read_in_transaction(conn, |tx| SqliteNotebookRepository::new(tx).find_by_name(&name))
            })
    }

    pub fn find_default(&self) -> TaskFuture<Option<Notebook>> {
        self.ctx
            .scheduler
            .submit_read("notebook_find_default", self.this.clone(), |conn| {
                read_in_transaction(conn, |tx| SqliteNotebookRepository::new(tx).find_default())
            })
    }

    pub fn list(&self, options: ListOptions<NotebookListOrder>) -> TaskFuture<Vec<Notebook>> {
        self.ctx
            .scheduler
            .submit_read("notebook_list", self.this.clone(), move |conn| {
                read_in_transaction(conn, |tx| SqliteNotebookRepository::new(tx).list(&options))
            })
    }

    pub fn count(&self, filters: ListFilters) -> TaskFuture<i64> {
        self.ctx
            .scheduler
            .submit_read("notebook_count", self.this.clone(), move |conn| {
                read_in_transaction(conn, |tx| SqliteNotebookRepository::new(tx).count(&filters))
            })
    }

    /// Deletes a notebook with all of its notes.
    ///
    /// Resolves to the local ids of the expunged notes, or `None` when the
    /// notebook does not exist. Note bodies are removed after the commit.
    pub fn expunge_by_local_id(&self, local_id: &str) -> TaskFuture<Option<Vec<LocalId>>> {
        self.expunge(NotebookKey::LocalId(local_id.to_string()))
    }

    pub fn expunge_by_guid(&self, guid: &str) -> TaskFuture<Option<Vec<LocalId>>> {
        self.expunge(NotebookKey::Guid(guid.to_string()))
    }

    fn expunge(&self, key: NotebookKey) -> TaskFuture<Option<Vec<LocalId>>> {
        let ctx = Arc::clone(&self.ctx);
        self.ctx
            .scheduler
            .submit_write("notebook_expunge", self.this.clone(), move |conn| {
                let _blob_guard = ctx.blobs.write_lock();
                let tx = Transaction::begin(conn, TransactionMode::Exclusive)?;
                let repo = SqliteNotebookRepository::new(&tx);
                let local_id = match key {
                    NotebookKey::LocalId(local_id) => Some(local_id),
                    NotebookKey::Guid(guid) => repo.local_id_by_guid(&guid)?,
                };
                let Some(local_id) = local_id else {
                    tx.commit()?;
                    return Ok(None);
                };

                let note_local_ids = repo.note_local_ids(&local_id)?;
                if !repo.delete(&local_id)? {
                    tx.commit()?;
                    return Ok(None);
                }

                let mut writes = BlobWriteSet::new();
                for note_local_id in &note_local_ids {
                    writes.mark_note_removed(note_local_id);
                }
                writes.finish(&ctx.blobs, tx.commit())?;

                info!(
                    "event=notebook_expunge module=handler status=ok notes={}",
                    note_local_ids.len()
                );
                deliver(
                    ctx.notifier.as_ref(),
                    StorageEvent::NotebookExpunged {
                        local_id,
                        expunged_note_local_ids: note_local_ids.clone(),
                    },
                );
                Ok(Some(note_local_ids))
            })
    }
}

enum NotebookKey {
    LocalId(LocalId),
    Guid(String),
}
