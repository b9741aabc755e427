//! Local storage entry point.
//!
//! # Responsibility
//! - Wire pool, scheduler, blob store and collaborators into one instance.
//! - Hand out the per-entity handlers.
//!
//! # Invariants
//! - All handlers of one instance share one scheduler and one blob root.
//! - Dropping the instance drains queued tasks; tasks whose handler is gone
//!   resolve `HandlerDestroyed`.

use crate::blob::BlobStore;
use crate::config::StorageConfig;
use crate::db::ConnectionPool;
use crate::error::StorageResult;
use crate::handler::{HandlerContext, NoteHandler, NotebookHandler, ResourceHandler, TagHandler};
use crate::notify::{NoopNotifier, StorageNotifier};
use crate::task::TaskScheduler;
use crate::validation::{EntityValidator, WireFormatValidator};
use log::info;
use std::sync::Arc;
use std::time::Duration;

/// One opened storage directory.
pub struct LocalStorage {
    config: StorageConfig,
    ctx: Arc<HandlerContext>,
    notebooks: Arc<NotebookHandler>,
    tags: Arc<TagHandler>,
    notes: Arc<NoteHandler>,
    resources: Arc<ResourceHandler>,
}

impl LocalStorage {
    /// Opens storage with the default validator and no notifier.
    pub fn open(config: StorageConfig) -> StorageResult<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: StorageConfig) -> LocalStorageBuilder {
        LocalStorageBuilder::new(config)
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn notebooks(&self) -> Arc<NotebookHandler> {
        Arc::clone(&self.notebooks)
    }

    pub fn tags(&self) -> Arc<TagHandler> {
        Arc::clone(&self.tags)
    }

    pub fn notes(&self) -> Arc<NoteHandler> {
        Arc::clone(&self.notes)
    }

    pub fn resources(&self) -> Arc<ResourceHandler> {
        Arc::clone(&self.resources)
    }

    /// Stops accepting tasks and waits for queued ones to settle.
    pub fn shutdown(&self) {
        self.ctx.scheduler.shutdown();
        info!("event=storage_shutdown module=storage status=ok");
    }
}

/// Builder for [`LocalStorage`] with pluggable collaborators.
pub struct LocalStorageBuilder {
    config: StorageConfig,
    validator: Arc<dyn EntityValidator>,
    notifier: Arc<dyn StorageNotifier>,
}

impl LocalStorageBuilder {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            validator: Arc::new(WireFormatValidator),
            notifier: Arc::new(NoopNotifier),
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn EntityValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn StorageNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Creates directories, migrates the schema and starts the workers.
    ///
    /// # Errors
    /// - `Configuration` for invalid settings or unusable directories.
    /// - `Database` when the database file cannot be opened or migrated.
    pub fn build(self) -> StorageResult<LocalStorage> {
        let config = self.config;
        config.validate()?;
        config.ensure_storage_dir()?;

        let pool = Arc::new(ConnectionPool::open(
            config.database_path(),
            Duration::from_millis(config.busy_timeout_ms),
        )?);
        // The migrating connection belongs to this thread, which never runs tasks.
        pool.release_current_thread();

        let blobs = BlobStore::open(config.blob_root())?;
        let scheduler = TaskScheduler::new(pool, config.read_workers)?;
        let ctx = Arc::new(HandlerContext {
            scheduler,
            blobs,
            validator: self.validator,
            notifier: self.notifier,
        });

        info!(
            "event=storage_open module=storage status=ok read_workers={}",
            config.read_workers
        );
        Ok(LocalStorage {
            notebooks: NotebookHandler::new(Arc::clone(&ctx)),
            tags: TagHandler::new(Arc::clone(&ctx)),
            notes: NoteHandler::new(Arc::clone(&ctx)),
            resources: ResourceHandler::new(Arc::clone(&ctx)),
            ctx,
            config,
        })
    }
}
