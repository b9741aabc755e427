//! Resource list reconciliation.
//!
//! # Responsibility
//! - Classify a note's resources as unchanged, updated, added or removed by
//!   comparing metadata only.
//! - Apply the difference with the fewest row and file writes.
//!
//! # Invariants
//! - New body files are written before the row referencing them.
//! - Stale files are only scheduled here; [`BlobWriteSet::finish`] removes
//!   them once the enclosing transaction has committed.
//! - `index_in_note` stays dense and 0-based.
//! - A resource never moves to another note.

use super::store::{BlobStore, BlobWriteSet};
use crate::error::{StorageError, StorageResult};
use crate::model::resource::{BodyKind, Resource};
use crate::model::LocalId;
use crate::repo::resource_repo::{BodyVersions, SqliteResourceRepository, StoredResource};
use crate::validation::EntityValidator;
use log::debug;
use rusqlite::Connection;
use std::collections::{HashMap, HashSet};

/// Position change of a resource whose row is otherwise untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMove {
    pub local_id: LocalId,
    pub from: i32,
    pub to: i32,
}

/// Classification of an updated resource list against the stored one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceDiff {
    /// New resources, `index_in_note` set to their list position.
    pub added: Vec<Resource>,
    /// Resources whose metadata changed, `index_in_note` set to their list
    /// position.
    pub updated: Vec<Resource>,
    pub removed: Vec<LocalId>,
    /// Unchanged resources that only moved.
    pub index_moves: Vec<IndexMove>,
    pub unchanged: Vec<LocalId>,
    /// First list position whose occupant differs from the stored list.
    pub first_changed_index: Option<usize>,
}

impl ResourceDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.updated.is_empty()
            && self.removed.is_empty()
            && self.index_moves.is_empty()
    }

    /// Same resources with the same metadata, only in another order.
    pub fn is_reorder_only(&self) -> bool {
        self.added.is_empty()
            && self.updated.is_empty()
            && self.removed.is_empty()
            && !self.index_moves.is_empty()
    }
}

/// Compares two resource lists ignoring body bytes.
///
/// `previous` is taken in `index_in_note` order; positions in `updated`
/// become the new indices.
///
/// # Errors
/// - `InvalidArgument` when `updated` repeats a local id.
pub fn diff_resources(previous: &[Resource], updated: &[Resource]) -> StorageResult<ResourceDiff> {
    let mut seen = HashSet::with_capacity(updated.len());
    for resource in updated {
        if !seen.insert(resource.local_id.as_str()) {
            return Err(StorageError::InvalidArgument(format!(
                "resource `{}` appears twice in the note",
                resource.local_id
            )));
        }
    }

    let mut previous_sorted: Vec<&Resource> = previous.iter().collect();
    previous_sorted.sort_by_key(|resource| resource.index_in_note);
    let previous_by_id: HashMap<&str, &Resource> = previous_sorted
        .iter()
        .map(|resource| (resource.local_id.as_str(), *resource))
        .collect();

    let mut diff = ResourceDiff::default();
    for (position, resource) in updated.iter().enumerate() {
        let to = position as i32;
        let stored_at = previous_sorted
            .get(position)
            .map(|stored| stored.local_id.as_str());
        match previous_by_id.get(resource.local_id.as_str()) {
            None => {
                let mut added = resource.clone();
                added.index_in_note = to;
                diff.added.push(added);
            }
            Some(stored) if !stored.metadata_eq(resource) => {
                let mut changed = resource.clone();
                changed.index_in_note = to;
                diff.updated.push(changed);
            }
            Some(stored) => {
                if stored.index_in_note != to {
                    diff.index_moves.push(IndexMove {
                        local_id: resource.local_id.clone(),
                        from: stored.index_in_note,
                        to,
                    });
                }
                diff.unchanged.push(resource.local_id.clone());
            }
        }
        let same_occupant = stored_at == Some(resource.local_id.as_str())
            && !diff.updated.iter().any(|changed| changed.local_id == resource.local_id);
        if !same_occupant && diff.first_changed_index.is_none() {
            diff.first_changed_index = Some(position);
        }
    }

    for stored in &previous_sorted {
        if !seen.contains(stored.local_id.as_str()) {
            diff.removed.push(stored.local_id.clone());
        }
    }
    if diff.first_changed_index.is_none() && previous_sorted.len() > updated.len() {
        diff.first_changed_index = Some(updated.len());
    }

    Ok(diff)
}

/// Brings a note's stored resources in line with `updated`.
///
/// Runs inside the caller's write transaction and returns the file side
/// effects for the caller to settle with [`BlobWriteSet::finish`] after the
/// commit attempt. With `update_binary_data` unset, updated resources keep
/// the bodies they already reference; added resources always get theirs.
///
/// The caller holds the blob write lock.
pub fn partial_update(
    conn: &Connection,
    store: &BlobStore,
    validator: &dyn EntityValidator,
    note_local_id: &str,
    previous: &[StoredResource],
    updated: &[Resource],
    update_binary_data: bool,
) -> StorageResult<(ResourceDiff, BlobWriteSet)> {
    let previous_resources: Vec<Resource> =
        previous.iter().map(|stored| stored.resource.clone()).collect();
    let mut diff = diff_resources(&previous_resources, updated)?;
    if update_binary_data {
        promote_missing_bodies(&mut diff, previous, updated);
    }

    let repo = SqliteResourceRepository::new(conn);
    let mut writes = BlobWriteSet::new();

    if diff.is_empty() {
        return Ok((diff, writes));
    }

    if diff.is_reorder_only() {
        for index_move in &diff.index_moves {
            repo.update_index(&index_move.local_id, index_move.to)?;
        }
        debug!(
            "event=resource_reconcile module=blob status=ok path=reorder moves={}",
            diff.index_moves.len()
        );
        return Ok((diff, writes));
    }

    for resource in diff.added.iter_mut().chain(diff.updated.iter_mut()) {
        resource.note_local_id = note_local_id.to_string();
        validator.validate_resource(resource)?;
    }

    for resource in &diff.added {
        if let Some(owner) = repo.owner_note(&resource.local_id)? {
            return Err(StorageError::InvalidArgument(format!(
                "resource `{}` already belongs to note `{owner}`",
                resource.local_id
            )));
        }
    }

    for local_id in &diff.removed {
        repo.delete(local_id)?;
        writes.mark_resource_removed(note_local_id, local_id);
    }

    for index_move in &diff.index_moves {
        repo.update_index(&index_move.local_id, index_move.to)?;
    }

    let previous_versions: HashMap<&str, &BodyVersions> = previous
        .iter()
        .map(|stored| (stored.resource.local_id.as_str(), &stored.versions))
        .collect();

    let result = write_changed(
        &repo,
        store,
        &mut writes,
        note_local_id,
        &diff,
        &previous_versions,
        update_binary_data,
    );
    if let Err(err) = result {
        writes.discard_written();
        return Err(err);
    }

    debug!(
        "event=resource_reconcile module=blob status=ok path=full added={} updated={} removed={} moves={}",
        diff.added.len(),
        diff.updated.len(),
        diff.removed.len(),
        diff.index_moves.len()
    );
    Ok((diff, writes))
}

fn write_changed(
    repo: &SqliteResourceRepository<'_>,
    store: &BlobStore,
    writes: &mut BlobWriteSet,
    note_local_id: &str,
    diff: &ResourceDiff,
    previous_versions: &HashMap<&str, &BodyVersions>,
    update_binary_data: bool,
) -> StorageResult<()> {
    let changed = diff
        .added
        .iter()
        .map(|resource| (resource, true))
        .chain(diff.updated.iter().map(|resource| (resource, false)));

    for (resource, is_new) in changed {
        let write_bodies = is_new || update_binary_data;
        let mut versions = BodyVersions::default();
        for kind in BodyKind::ALL {
            let previous = previous_versions
                .get(resource.local_id.as_str())
                .and_then(|versions| versions.get(kind))
                .map(str::to_string);
            let body = resource.body(kind);
            let version = match body.and_then(|body| body.body.as_deref()) {
                Some(bytes) if write_bodies => {
                    let (version, path) =
                        store.write_body(note_local_id, &resource.local_id, kind, bytes)?;
                    writes.record_written(path);
                    Some(version)
                }
                _ if body.is_none() => None,
                _ => previous,
            };
            if !is_new {
                writes.mark_stale_versions(note_local_id, &resource.local_id, kind, version.clone());
            }
            versions.set(kind, version);
        }
        repo.upsert(resource, &versions, write_bodies)?;
    }
    Ok(())
}

/// Moves unchanged resources that carry bytes for a body with no stored
/// version into `updated`, so the bytes get written.
fn promote_missing_bodies(diff: &mut ResourceDiff, previous: &[StoredResource], updated: &[Resource]) {
    let versions: HashMap<&str, &BodyVersions> = previous
        .iter()
        .map(|stored| (stored.resource.local_id.as_str(), &stored.versions))
        .collect();

    let mut promoted = Vec::new();
    for (position, resource) in updated.iter().enumerate() {
        if !diff.unchanged.contains(&resource.local_id) {
            continue;
        }
        let Some(stored) = versions.get(resource.local_id.as_str()) else {
            continue;
        };
        let needs_write = BodyKind::ALL.iter().any(|kind| {
            resource.body(*kind).is_some_and(|body| body.body.is_some())
                && stored.get(*kind).is_none()
        });
        if needs_write {
            let mut changed = resource.clone();
            changed.index_in_note = position as i32;
            promoted.push(changed);
        }
    }

    for resource in promoted {
        diff.unchanged.retain(|local_id| *local_id != resource.local_id);
        diff.index_moves
            .retain(|index_move| index_move.local_id != resource.local_id);
        diff.updated.push(resource);
    }
}

#[cfg(test)]
mod tests {
    use super::{diff_resources, partial_update, IndexMove};
    use crate::blob::BlobStore;
    use crate::db::open_db_in_memory;
    use crate::error::StorageError;
    use crate::model::resource::{BodyKind, Resource, ResourceBody};
    use crate::repo::resource_repo::SqliteResourceRepository;
    use crate::validation::WireFormatValidator;
    use rusqlite::Connection;

    fn resource(local_id: &str, index: i32) -> Resource {
        let mut resource = Resource::new("note-1", "image/png");
        resource.local_id = local_id.to_string();
        resource.index_in_note = index;
        resource
    }

    fn with_bytes(mut resource: Resource, bytes: &[u8], hash_seed: u8) -> Resource {
        resource.data = Some(ResourceBody {
            size: Some(bytes.len() as i32),
            hash: Some(vec![hash_seed; 16]),
            body: Some(bytes.to_vec()),
        });
        resource
    }

    fn setup() -> (Connection, tempfile::TempDir, BlobStore) {
        let conn = open_db_in_memory().unwrap();
        conn.execute_batch(
            "INSERT INTO notebooks (local_id, name, name_lower) VALUES ('nb', 'Inbox', 'inbox');
             INSERT INTO notes (local_id, notebook_local_id) VALUES ('note-1', 'nb');",
        )
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(dir.path().join("resources")).unwrap();
        (conn, dir, store)
    }

    fn stored(conn: &Connection) -> Vec<crate::repo::resource_repo::StoredResource> {
        SqliteResourceRepository::new(conn)
            .list_for_note("note-1", false)
            .unwrap()
    }

    #[test]
    fn duplicate_local_ids_are_rejected() {
        let err = diff_resources(&[], &[resource("a", 0), resource("a", 1)]).unwrap_err();
        assert!(matches!(err, StorageError::InvalidArgument(_)));
    }

    #[test]
    fn removal_in_the_middle_moves_only_the_tail() {
        let previous = vec![resource("a", 0), resource("b", 1), resource("c", 2)];
        let updated = vec![resource("a", 0), resource("c", 2)];
        let diff = diff_resources(&previous, &updated).unwrap();
        assert_eq!(diff.removed, vec!["b".to_string()]);
        assert_eq!(
            diff.index_moves,
            vec![IndexMove {
                local_id: "c".to_string(),
                from: 2,
                to: 1
            }]
        );
        assert!(diff.added.is_empty());
        assert!(diff.updated.is_empty());
        assert_eq!(diff.first_changed_index, Some(1));
    }

    #[test]
    fn swapped_resources_are_reorder_only() {
        let previous = vec![resource("a", 0), resource("b", 1)];
        let updated = vec![resource("b", 1), resource("a", 0)];
        let diff = diff_resources(&previous, &updated).unwrap();
        assert!(diff.is_reorder_only());
        assert_eq!(diff.index_moves.len(), 2);
        assert_eq!(diff.first_changed_index, Some(0));
    }

    #[test]
    fn metadata_change_classifies_as_updated() {
        let previous = vec![with_bytes(resource("a", 0), b"one", 1)];
        let updated = vec![with_bytes(resource("a", 0), b"two", 2)];
        let diff = diff_resources(&previous, &updated).unwrap();
        assert_eq!(diff.updated.len(), 1);
        assert!(diff.unchanged.is_empty());
    }

    #[test]
    fn removal_rewrites_no_surviving_body() {
        let (conn, _dir, store) = setup();
        let initial = vec![
            with_bytes(resource("a", 0), b"aaa", 1),
            with_bytes(resource("b", 1), b"bbb", 2),
            with_bytes(resource("c", 2), b"ccc", 3),
        ];
        let (_, writes) = partial_update(
            &conn,
            &store,
            &WireFormatValidator,
            "note-1",
            &[],
            &initial,
            true,
        )
        .unwrap();
        writes.finish(&store, Ok(())).unwrap();

        let before = stored(&conn);
        let a_versions = store.list_versions("note-1", "a", BodyKind::Data).unwrap();
        let c_versions = store.list_versions("note-1", "c", BodyKind::Data).unwrap();

        let updated = vec![initial[0].clone(), initial[2].clone()];
        let (diff, writes) = partial_update(
            &conn,
            &store,
            &WireFormatValidator,
            "note-1",
            &before,
            &updated,
            true,
        )
        .unwrap();
        assert!(writes.written().is_empty());
        writes.finish(&store, Ok(())).unwrap();

        assert_eq!(diff.removed, vec!["b".to_string()]);
        assert_eq!(diff.index_moves.len(), 1);
        let after = stored(&conn);
        let ids: Vec<(&str, i32)> = after
            .iter()
            .map(|stored| (stored.resource.local_id.as_str(), stored.resource.index_in_note))
            .collect();
        assert_eq!(ids, vec![("a", 0), ("c", 1)]);
        assert_eq!(after[0].versions, before[0].versions);
        assert_eq!(after[1].versions, before[2].versions);
        assert_eq!(store.list_versions("note-1", "a", BodyKind::Data).unwrap(), a_versions);
        assert_eq!(store.list_versions("note-1", "c", BodyKind::Data).unwrap(), c_versions);
        assert!(!store.resource_dir("note-1", "b").unwrap().exists());
    }

    #[test]
    fn metadata_only_update_keeps_stored_body() {
        let (conn, _dir, store) = setup();
        let initial = vec![with_bytes(resource("a", 0), b"aaa", 1)];
        let (_, writes) =
            partial_update(&conn, &store, &WireFormatValidator, "note-1", &[], &initial, true)
                .unwrap();
        writes.finish(&store, Ok(())).unwrap();
        let before = stored(&conn);

        let mut renamed = initial[0].clone();
        renamed.width = Some(640);
        let (diff, writes) = partial_update(
            &conn,
            &store,
            &WireFormatValidator,
            "note-1",
            &before,
            &[renamed],
            false,
        )
        .unwrap();
        assert_eq!(diff.updated.len(), 1);
        assert!(writes.written().is_empty());
        writes.finish(&store, Ok(())).unwrap();

        let after = stored(&conn);
        assert_eq!(after[0].resource.width, Some(640));
        assert_eq!(after[0].versions, before[0].versions);
        assert_eq!(
            store.list_versions("note-1", "a", BodyKind::Data).unwrap().len(),
            1
        );
    }

    #[test]
    fn invalid_resource_fails_before_rows_change() {
        let (conn, _dir, store) = setup();
        let initial = vec![resource("a", 0), resource("b", 1)];
        let (_, writes) =
            partial_update(&conn, &store, &WireFormatValidator, "note-1", &[], &initial, true)
                .unwrap();
        writes.finish(&store, Ok(())).unwrap();
        let before = stored(&conn);

        let mut broken = resource("c", 0);
        broken.mime = Some("nonsense".to_string());
        let err = partial_update(
            &conn,
            &store,
            &WireFormatValidator,
            "note-1",
            &before,
            &[broken],
            true,
        )
        .unwrap_err();
        assert!(matches!(err, StorageError::ValidationFailed { .. }));
        assert_eq!(stored(&conn).len(), 2);
    }
}
