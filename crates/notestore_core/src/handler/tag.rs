//! Tag handler.

use super::{read_in_transaction, write_in_transaction, HandlerContext};
use crate::db::{Transaction, TransactionMode};
use crate::model::tag::Tag;
use crate::model::LocalId;
use crate::notify::{deliver, StorageEvent};
use crate::query::{ListFilters, ListOptions};
use crate::repo::{SqliteTagRepository, TagListOrder};
use crate::task::TaskFuture;
use log::info;
use std::sync::{Arc, Weak};

pub struct TagHandler {
    ctx: Arc<HandlerContext>,
    this: Weak<TagHandler>,
}

impl TagHandler {
    pub(crate) fn new(ctx: Arc<HandlerContext>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            ctx,
            this: this.clone(),
        })
    }

    /// Inserts or replaces a tag. The parent, when set, must already exist.
    pub fn put(&self, tag: Tag) -> TaskFuture<Tag> {
        if let Err(err) = self.ctx.validator.validate_tag(&tag) {
            return TaskFuture::ready(Err(err));
        }
        let ctx = Arc::clone(&self.ctx);
        self.ctx
            .scheduler
            .submit_write("tag_put", self.this.clone(), move |conn| {
                write_in_transaction(conn, TransactionMode::Immediate, |tx| {
                    SqliteTagRepository::new(tx).upsert(&tag)
                })?;
                deliver(ctx.notifier.as_ref(), StorageEvent::TagPut(tag.clone()));
                Ok(tag)
            })
    }

    pub fn find_by_local_id(&self, local_id: &str) -> TaskFuture<Option<Tag>> {
        let local_id = local_id.to_string();
        self.ctx
            .scheduler
            .submit_read("tag_find_by_local_id", self.this.clone(), move |conn| {
                read_in_transaction(conn, |tx| SqliteTagRepository::new(tx).find_by_local_id(&local_id))
            })
    }

    pub fn find_by_guid(&self, guid: &str) -> TaskFuture<Option<Tag>> {
        let guid = guid.to_string();
        self.ctx
            .scheduler
            .submit_read("tag_find_by_guid", self.this.clone(), move |conn| {
                read_in_transaction(conn, |tx| SqliteTagRepository::new(tx).find_by_guid(&guid))
            })
    }

    /// Case-insensitive name lookup.
    pub fn find_by_name(&self, name: &str) -> TaskFuture<Option<Tag>> {
        let name = name.to_string();
        self.ctx
            .scheduler
            .submit_read("tag_find_by_name", self.this.clone(), move |conn| {
                read_in_transaction(conn, |tx| SqliteTagRepository::new(tx).find_by_name(&name))
            })
    }

    pub fn list(&self, options: ListOptions<TagListOrder>) -> TaskFuture<Vec<Tag>> {
        self.ctx
            .scheduler
            .submit_read("tag_list", self.this.clone(), move |conn| {
                read_in_transaction(conn, |tx| SqliteTagRepository::new(tx).list(&options))
            })
    }

    /// Tags of one note in the note's order.
    pub fn list_per_note(&self, note_local_id: &str) -> TaskFuture<Vec<Tag>> {
        let note_local_id = note_local_id.to_string();
        self.ctx
            .scheduler
            .submit_read("tag_list_per_note", self.this.clone(), move |conn| {
                read_in_transaction(conn, |tx| {
                    SqliteTagRepository::new(tx).list_per_note(&note_local_id)
                })
            })
    }

    pub fn count(&self, filters: ListFilters) -> TaskFuture<i64> {
        self.ctx
            .scheduler
            .submit_read("tag_count", self.this.clone(), move |conn| {
                read_in_transaction(conn, |tx| SqliteTagRepository::new(tx).count(&filters))
            })
    }

    /// Deletes a tag together with its descendants.
    ///
    /// Resolves to the local ids of the descendants removed with it, or
    /// `None` when the tag does not exist.
    pub fn expunge_by_local_id(&self, local_id: &str) -> TaskFuture<Option<Vec<LocalId>>> {
        self.expunge(Some(local_id.to_string()), None)
    }

    pub fn expunge_by_guid(&self, guid: &str) -> TaskFuture<Option<Vec<LocalId>>> {
        self.expunge(None, Some(guid.to_string()))
    }

    fn expunge(
        &self,
        local_id: Option<LocalId>,
        guid: Option<String>,
    ) -> TaskFuture<Option<Vec<LocalId>>> {
        let ctx = Arc::clone(&self.ctx);
        self.ctx
            .scheduler
            .submit_write("tag_expunge", self.this.clone(), move |conn| {
                let tx = Transaction::begin(conn, TransactionMode::Immediate)?;
                let repo = SqliteTagRepository::new(&tx);
                let local_id = match (local_id, guid) {
                    (Some(local_id), _) => Some(local_id),
                    (None, Some(guid)) => repo.local_id_by_guid(&guid)?,
                    (None, None) => None,
                };
                let Some(local_id) = local_id else {
                    tx.commit()?;
                    return Ok(None);
                };

                let children = repo.descendant_local_ids(&local_id)?;
                if !repo.delete(&local_id)? {
                    tx.commit()?;
                    return Ok(None);
                }
                tx.commit()?;

                info!(
                    "event=tag_expunge module=handler status=ok children={}",
                    children.len()
                );
                deliver(
                    ctx.notifier.as_ref(),
                    StorageEvent::TagExpunged {
                        local_id,
                        expunged_child_local_ids: children.clone(),
                    },
                );
                Ok(Some(children))
            })
    }
}
