//! Versioned body files.
//!
//! Layout: `<root>/<note local id>/<resource local id>/<body kind>/<version id>.dat`.
//! Callers never build these paths themselves.
//!
//! # Invariants
//! - Body writes go to a temporary file first and are renamed into place.
//! - Mutating methods expect the caller to hold [`BlobStore::write_lock`];
//!   reading methods expect [`BlobStore::read_lock`].

use crate::error::{StorageError, StorageResult};
use crate::model::resource::BodyKind;
use log::{debug, warn};
use once_cell::sync::Lazy;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

const BODY_FILE_EXTENSION: &str = "dat";
const TEMP_FILE_SUFFIX: &str = ".tmp";

/// Process-wide lock over every blob area. Body writes straddle a
/// transaction boundary that the database lock cannot cover, so it is taken
/// exclusively for any body write and shared for any body read.
static BLOB_LOCK: Lazy<RwLock<()>> = Lazy::new(|| RwLock::new(()));

/// Root of the resource body tree.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Opens (and creates when missing) the body tree under `root`.
    pub fn open(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|err| {
            StorageError::Configuration(format!(
                "cannot create blob dir `{}`: {err}",
                root.display()
            ))
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn read_lock(&self) -> RwLockReadGuard<'static, ()> {
        BLOB_LOCK.read()
    }

    pub fn write_lock(&self) -> RwLockWriteGuard<'static, ()> {
        BLOB_LOCK.write()
    }

    pub fn note_dir(&self, note_local_id: &str) -> StorageResult<PathBuf> {
        Ok(self.root.join(path_component(note_local_id)?))
    }

    pub fn resource_dir(
        &self,
        note_local_id: &str,
        resource_local_id: &str,
    ) -> StorageResult<PathBuf> {
        Ok(self
            .note_dir(note_local_id)?
            .join(path_component(resource_local_id)?))
    }

    pub fn body_dir(
        &self,
        note_local_id: &str,
        resource_local_id: &str,
        kind: BodyKind,
    ) -> StorageResult<PathBuf> {
        Ok(self
            .resource_dir(note_local_id, resource_local_id)?
            .join(kind.dir_name()))
    }

    pub fn body_path(
        &self,
        note_local_id: &str,
        resource_local_id: &str,
        kind: BodyKind,
        version_id: &str,
    ) -> StorageResult<PathBuf> {
        Ok(self
            .body_dir(note_local_id, resource_local_id, kind)?
            .join(format!(
                "{}.{BODY_FILE_EXTENSION}",
                path_component(version_id)?
            )))
    }

    /// Writes `bytes` as a new version and returns `(version_id, path)`.
    pub fn write_body(
        &self,
        note_local_id: &str,
        resource_local_id: &str,
        kind: BodyKind,
        bytes: &[u8],
    ) -> StorageResult<(String, PathBuf)> {
        let version_id = Uuid::new_v4().to_string();
        let dir = self.body_dir(note_local_id, resource_local_id, kind)?;
        fs::create_dir_all(&dir).map_err(|err| StorageError::blob_io(&dir, err))?;

        let path = self.body_path(note_local_id, resource_local_id, kind, &version_id)?;
        let mut temp_name = path.clone().into_os_string();
        temp_name.push(TEMP_FILE_SUFFIX);
        let temp_path = PathBuf::from(temp_name);

        let write_result = File::create(&temp_path)
            .and_then(|mut file| {
                file.write_all(bytes)?;
                file.sync_all()
            })
            .and_then(|()| fs::rename(&temp_path, &path));
        if let Err(err) = write_result {
            let _ = fs::remove_file(&temp_path);
            return Err(StorageError::blob_io(&path, err));
        }

        debug!(
            "event=blob_write module=blob status=ok kind={} bytes={}",
            kind.dir_name(),
            bytes.len()
        );
        Ok((version_id, path))
    }

    pub fn read_body(
        &self,
        note_local_id: &str,
        resource_local_id: &str,
        kind: BodyKind,
        version_id: &str,
    ) -> StorageResult<Vec<u8>> {
        let path = self.body_path(note_local_id, resource_local_id, kind, version_id)?;
        fs::read(&path).map_err(|err| StorageError::blob_io(&path, err))
    }

    /// Version ids currently on disk for one body, sorted.
    pub fn list_versions(
        &self,
        note_local_id: &str,
        resource_local_id: &str,
        kind: BodyKind,
    ) -> StorageResult<Vec<String>> {
        let dir = self.body_dir(note_local_id, resource_local_id, kind)?;
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StorageError::blob_io(&dir, err)),
        };

        let mut versions = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| StorageError::blob_io(&dir, err))?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(BODY_FILE_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                versions.push(stem.to_string());
            }
        }
        versions.sort();
        Ok(versions)
    }

    /// Removes every version of one body except `keep`. Returns the number
    /// of files removed.
    pub fn remove_versions_except(
        &self,
        note_local_id: &str,
        resource_local_id: &str,
        kind: BodyKind,
        keep: Option<&str>,
    ) -> StorageResult<usize> {
        let mut removed = 0;
        for version in self.list_versions(note_local_id, resource_local_id, kind)? {
            if Some(version.as_str()) == keep {
                continue;
            }
            let path = self.body_path(note_local_id, resource_local_id, kind, &version)?;
            remove_file_if_exists(&path)?;
            removed += 1;
        }
        Ok(removed)
    }

    pub fn remove_resource(&self, note_local_id: &str, resource_local_id: &str) -> StorageResult<()> {
        remove_dir_if_exists(&self.resource_dir(note_local_id, resource_local_id)?)
    }

    pub fn remove_note(&self, note_local_id: &str) -> StorageResult<()> {
        remove_dir_if_exists(&self.note_dir(note_local_id)?)
    }
}

/// File-side effects of one write transaction.
///
/// Collects files written ahead of the commit and files that become stale
/// once the commit succeeds; [`BlobWriteSet::finish`] settles both sides.
#[derive(Debug, Default)]
pub struct BlobWriteSet {
    written: Vec<PathBuf>,
    stale: Vec<StaleBlob>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum StaleBlob {
    Versions {
        note_local_id: String,
        resource_local_id: String,
        kind: BodyKind,
        keep: Option<String>,
    },
    Resource {
        note_local_id: String,
        resource_local_id: String,
    },
    Note {
        note_local_id: String,
    },
}

impl BlobWriteSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_written(&mut self, path: PathBuf) {
        self.written.push(path);
    }

    /// After commit, drop every version of this body other than `keep`.
    pub fn mark_stale_versions(
        &mut self,
        note_local_id: &str,
        resource_local_id: &str,
        kind: BodyKind,
        keep: Option<String>,
    ) {
        self.stale.push(StaleBlob::Versions {
            note_local_id: note_local_id.to_string(),
            resource_local_id: resource_local_id.to_string(),
            kind,
            keep,
        });
    }

    pub fn mark_resource_removed(&mut self, note_local_id: &str, resource_local_id: &str) {
        self.stale.push(StaleBlob::Resource {
            note_local_id: note_local_id.to_string(),
            resource_local_id: resource_local_id.to_string(),
        });
    }

    pub fn mark_note_removed(&mut self, note_local_id: &str) {
        self.stale.push(StaleBlob::Note {
            note_local_id: note_local_id.to_string(),
        });
    }

    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    pub fn is_empty(&self) -> bool {
        self.written.is_empty() && self.stale.is_empty()
    }

    /// Settles file state against the commit outcome and returns it.
    ///
    /// - Commit failed: files written for this transaction are deleted.
    /// - Commit succeeded: stale files are deleted. Cleanup failures are
    ///   logged; the committed rows stay authoritative.
    pub fn finish(self, store: &BlobStore, commit: StorageResult<()>) -> StorageResult<()> {
        match commit {
            Ok(()) => {
                self.remove_stale(store);
                Ok(())
            }
            Err(err) => {
                self.discard_written();
                Err(err)
            }
        }
    }

    /// Deletes the files written ahead of a commit that did not happen.
    pub fn discard_written(self) {
        for path in &self.written {
            if let Err(err) = remove_file_if_exists(path) {
                warn!(
                    "event=blob_discard module=blob status=error error={}",
                    err
                );
            }
        }
        if !self.written.is_empty() {
            debug!(
                "event=blob_discard module=blob status=ok files={}",
                self.written.len()
            );
        }
    }

    fn remove_stale(self, store: &BlobStore) {
        for stale in &self.stale {
            let result = match stale {
                StaleBlob::Versions {
                    note_local_id,
                    resource_local_id,
                    kind,
                    keep,
                } => store
                    .remove_versions_except(
                        note_local_id,
                        resource_local_id,
                        *kind,
                        keep.as_deref(),
                    )
                    .map(|_| ()),
                StaleBlob::Resource {
                    note_local_id,
                    resource_local_id,
                } => store.remove_resource(note_local_id, resource_local_id),
                StaleBlob::Note { note_local_id } => store.remove_note(note_local_id),
            };
            if let Err(err) = result {
                warn!(
                    "event=blob_cleanup module=blob status=error error={}",
                    err
                );
            }
        }
    }
}

fn path_component(value: &str) -> StorageResult<&str> {
    let valid = !value.is_empty()
        && value != "."
        && value != ".."
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'));
    if valid {
        Ok(value)
    } else {
        Err(StorageError::InvalidArgument(format!(
            "`{value}` cannot be used as a blob path component"
        )))
    }
}

fn remove_file_if_exists(path: &Path) -> StorageResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(StorageError::blob_io(path, err)),
    }
}

fn remove_dir_if_exists(path: &Path) -> StorageResult<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(StorageError::blob_io(path, err)),
    }
}
