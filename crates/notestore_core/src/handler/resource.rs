//! Resource handler.
//!
//! Resources are written through their owning note; this handler only reads,
//! counts and expunges them individually.

use super::{read_in_transaction, HandlerContext};
use crate::blob::BlobWriteSet;
use crate::db::{Transaction, TransactionMode};
use crate::model::resource::Resource;
use crate::notify::{deliver, StorageEvent};
use crate::repo::resource_repo::load_blob_bodies;
use crate::repo::SqliteResourceRepository;
use crate::task::TaskFuture;
use log::info;
use std::sync::{Arc, Weak};

pub struct ResourceHandler {
    ctx: Arc<HandlerContext>,
    this: Weak<ResourceHandler>,
}

impl ResourceHandler {
    pub(crate) fn new(ctx: Arc<HandlerContext>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            ctx,
            this: this.clone(),
        })
    }

    /// One resource; body bytes are loaded only with `with_binary_data`.
    pub fn find_by_local_id(
        &self,
        local_id: &str,
        with_binary_data: bool,
    ) -> TaskFuture<Option<Resource>> {
        let local_id = local_id.to_string();
        let ctx = Arc::clone(&self.ctx);
        self.ctx
            .scheduler
            .submit_read("resource_find_by_local_id", self.this.clone(), move |conn| {
                let _blob_guard = with_binary_data.then(|| ctx.blobs.read_lock());
                read_in_transaction(conn, |tx| {
                    let repo = SqliteResourceRepository::new(tx);
                    let Some(mut stored) = repo.find(&local_id, with_binary_data)? else {
                        return Ok(None);
                    };
                    if with_binary_data {
                        load_blob_bodies(&ctx.blobs, &mut stored)?;
                    }
                    Ok(Some(stored.resource))
                })
            })
    }

    pub fn count_per_note(&self, note_local_id: &str) -> TaskFuture<i64> {
        let note_local_id = note_local_id.to_string();
        self.ctx
            .scheduler
            .submit_read("resource_count_per_note", self.this.clone(), move |conn| {
                read_in_transaction(conn, |tx| {
                    SqliteResourceRepository::new(tx).count_for_note(&note_local_id)
                })
            })
    }

    /// Deletes one resource and closes the gap in its note's ordering.
    pub fn expunge_by_local_id(&self, local_id: &str) -> TaskFuture<bool> {
        let local_id = local_id.to_string();
        let ctx = Arc::clone(&self.ctx);
        self.ctx
            .scheduler
            .submit_write("resource_expunge", self.this.clone(), move |conn| {
                let _blob_guard = ctx.blobs.write_lock();
                let tx = Transaction::begin(conn, TransactionMode::Immediate)?;
                let repo = SqliteResourceRepository::new(&tx);
                let Some(stored) = repo.find(&local_id, false)? else {
                    tx.commit()?;
                    return Ok(false);
                };
                let note_local_id = stored.resource.note_local_id.clone();

                repo.delete(&local_id)?;
                repo.close_index_gap(&note_local_id, stored.resource.index_in_note)?;

                let mut writes = BlobWriteSet::new();
                writes.mark_resource_removed(&note_local_id, &local_id);
                writes.finish(&ctx.blobs, tx.commit())?;

                info!("event=resource_expunge module=handler status=ok");
                deliver(
                    ctx.notifier.as_ref(),
                    StorageEvent::ResourceExpunged {
                        local_id,
                        note_local_id,
                    },
                );
                Ok(true)
            })
    }
}
