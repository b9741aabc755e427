use notestore_core::blob::BlobStore;
use notestore_core::{
    BodyKind, FetchNoteOptions, LocalStorage, Note, Notebook, Resource, ResourceBody,
    StorageConfig, StorageError, UpdateNoteOptions,
};

fn open_storage() -> (tempfile::TempDir, LocalStorage) {
    let dir = tempfile::tempdir().unwrap();
    let storage = LocalStorage::open(StorageConfig::new(dir.path())).unwrap();
    (dir, storage)
}

fn blobs(storage: &LocalStorage) -> BlobStore {
    BlobStore::open(storage.config().blob_root()).unwrap()
}

fn body(bytes: &[u8], seed: u8) -> ResourceBody {
    ResourceBody {
        size: Some(bytes.len() as i32),
        hash: Some(vec![seed; 16]),
        body: Some(bytes.to_vec()),
    }
}

fn image(note: &Note, local_id: &str, bytes: &[u8], seed: u8) -> Resource {
    let mut resource = Resource::new(note.local_id.clone(), "image/png");
    resource.local_id = local_id.to_string();
    resource.data = Some(body(bytes, seed));
    resource
}

fn note_with_resources(storage: &LocalStorage) -> Note {
    let notebook = storage
        .notebooks()
        .put(Notebook::new("Media"))
        .wait()
        .unwrap();
    let mut note = Note::new(notebook.local_id);
    note.title = Some("Album".to_string());
    note.resources = vec![
        image(&note, "res-a", b"aaaa", 1),
        image(&note, "res-b", b"bbbb", 2),
        image(&note, "res-c", b"cccc", 3),
    ];
    storage.notes().put(note).wait().unwrap()
}

fn versions(storage: &LocalStorage, note: &Note, resource_local_id: &str) -> Vec<String> {
    blobs(storage)
        .list_versions(&note.local_id, resource_local_id, BodyKind::Data)
        .unwrap()
}

fn load(storage: &LocalStorage, note: &Note, options: FetchNoteOptions) -> Note {
    storage
        .notes()
        .find_by_local_id(&note.local_id, options)
        .wait()
        .unwrap()
        .unwrap()
}

#[test]
fn put_writes_one_body_version_per_resource() {
    let (_dir, storage) = open_storage();
    let note = note_with_resources(&storage);

    for local_id in ["res-a", "res-b", "res-c"] {
        assert_eq!(versions(&storage, &note, local_id).len(), 1);
    }

    let full = load(&storage, &note, FetchNoteOptions::full());
    let bytes: Vec<_> = full
        .resources
        .iter()
        .map(|resource| resource.data.as_ref().unwrap().body.clone().unwrap())
        .collect();
    assert_eq!(bytes, vec![b"aaaa".to_vec(), b"bbbb".to_vec(), b"cccc".to_vec()]);

    let metadata_only = load(&storage, &note, FetchNoteOptions::metadata());
    assert_eq!(metadata_only.resources.len(), 3);
    assert!(metadata_only
        .resources
        .iter()
        .all(|resource| resource.data.as_ref().unwrap().body.is_none()));
    assert_eq!(metadata_only.resources[1].data.as_ref().unwrap().size, Some(4));

    let bare = load(&storage, &note, FetchNoteOptions::default());
    assert!(bare.resources.is_empty());
}

#[test]
fn dropping_a_resource_removes_only_its_files() {
    let (_dir, storage) = open_storage();
    let mut note = note_with_resources(&storage);
    let before_a = versions(&storage, &note, "res-a");
    let before_c = versions(&storage, &note, "res-c");

    note.resources.remove(1);
    storage
        .notes()
        .update(note.clone(), UpdateNoteOptions::default())
        .wait()
        .unwrap();

    assert!(versions(&storage, &note, "res-b").is_empty());
    assert_eq!(versions(&storage, &note, "res-a"), before_a);
    assert_eq!(versions(&storage, &note, "res-c"), before_c);

    let stored = load(&storage, &note, FetchNoteOptions::metadata());
    let order: Vec<_> = stored
        .resources
        .iter()
        .map(|resource| (resource.local_id.as_str(), resource.index_in_note))
        .collect();
    assert_eq!(order, vec![("res-a", 0), ("res-c", 1)]);
}

#[test]
fn reordering_keeps_body_versions() {
    let (_dir, storage) = open_storage();
    let mut note = note_with_resources(&storage);
    let before: Vec<_> = ["res-a", "res-b", "res-c"]
        .iter()
        .map(|id| versions(&storage, &note, id))
        .collect();

    note.resources.reverse();
    storage
        .notes()
        .update(note.clone(), UpdateNoteOptions::default())
        .wait()
        .unwrap();

    let after: Vec<_> = ["res-a", "res-b", "res-c"]
        .iter()
        .map(|id| versions(&storage, &note, id))
        .collect();
    assert_eq!(before, after);

    let stored = load(&storage, &note, FetchNoteOptions::metadata());
    let ids: Vec<_> = stored.resources.iter().map(|r| r.local_id.as_str()).collect();
    assert_eq!(ids, vec!["res-c", "res-b", "res-a"]);
}

#[test]
fn new_bytes_replace_the_previous_version() {
    let (_dir, storage) = open_storage();
    let mut note = note_with_resources(&storage);
    let old = versions(&storage, &note, "res-a");

    note.resources[0].data = Some(body(b"AAAAAA", 9));
    storage
        .notes()
        .update(note.clone(), UpdateNoteOptions::default())
        .wait()
        .unwrap();

    let new = versions(&storage, &note, "res-a");
    assert_eq!(new.len(), 1);
    assert_ne!(new, old);

    let full = load(&storage, &note, FetchNoteOptions::full());
    assert_eq!(
        full.resources[0].data.as_ref().unwrap().body.as_deref(),
        Some(&b"AAAAAA"[..])
    );
}

#[test]
fn metadata_only_update_keeps_stored_bytes() {
    let (_dir, storage) = open_storage();
    let mut note = note_with_resources(&storage);
    let old = versions(&storage, &note, "res-b");

    note.resources[1].width = Some(640);
    note.resources[1].data.as_mut().unwrap().body = None;
    let options = UpdateNoteOptions {
        update_resource_binary_data: false,
        ..UpdateNoteOptions::default()
    };
    storage.notes().update(note.clone(), options).wait().unwrap();

    assert_eq!(versions(&storage, &note, "res-b"), old);
    let full = load(&storage, &note, FetchNoteOptions::full());
    assert_eq!(full.resources[1].width, Some(640));
    assert_eq!(
        full.resources[1].data.as_ref().unwrap().body.as_deref(),
        Some(&b"bbbb"[..])
    );
}

#[test]
fn failed_update_leaves_only_previous_versions() {
    let (_dir, storage) = open_storage();
    let mut note = note_with_resources(&storage);

    let mut other = Note::new(note.notebook_local_id.clone());
    other.title = Some("Other".to_string());
    let mut taken = image(&other, "res-taken", b"zz", 7);
    taken.guid = Some("shared-guid".to_string());
    other.resources = vec![taken];
    storage.notes().put(other).wait().unwrap();

    let old_a = versions(&storage, &note, "res-a");
    note.title = Some("Should not stick".to_string());
    note.resources[0].data = Some(body(b"new-bytes", 5));
    let mut clash = image(&note, "res-d", b"dddd", 4);
    clash.guid = Some("shared-guid".to_string());
    note.resources.push(clash);

    let err = storage
        .notes()
        .update(note.clone(), UpdateNoteOptions::default())
        .wait()
        .unwrap_err();
    assert!(matches!(err, StorageError::Database { .. }));

    assert_eq!(versions(&storage, &note, "res-a"), old_a);
    assert!(versions(&storage, &note, "res-d").is_empty());
    let stored = load(&storage, &note, FetchNoteOptions::full());
    assert_eq!(stored.title.as_deref(), Some("Album"));
    assert_eq!(stored.resources.len(), 3);
    assert_eq!(
        stored.resources[0].data.as_ref().unwrap().body.as_deref(),
        Some(&b"aaaa"[..])
    );
}

#[test]
fn invalid_resource_rejects_the_whole_put() {
    let (_dir, storage) = open_storage();
    let notebook = storage
        .notebooks()
        .put(Notebook::new("Media"))
        .wait()
        .unwrap();
    let mut note = Note::new(notebook.local_id);
    let mut broken = image(&note, "res-x", b"abc", 1);
    broken.data.as_mut().unwrap().size = Some(99);
    note.resources = vec![broken];

    let err = storage.notes().put(note.clone()).wait().unwrap_err();
    assert!(matches!(err, StorageError::ValidationFailed { .. }));
    assert!(versions(&storage, &note, "res-x").is_empty());
}

#[test]
fn resource_handler_finds_counts_and_expunges() {
    let (_dir, storage) = open_storage();
    let note = note_with_resources(&storage);
    let resources = storage.resources();

    assert_eq!(resources.count_per_note(&note.local_id).wait().unwrap(), 3);
    let found = resources.find_by_local_id("res-b", true).wait().unwrap().unwrap();
    assert_eq!(found.data.unwrap().body.as_deref(), Some(&b"bbbb"[..]));
    let without = resources.find_by_local_id("res-b", false).wait().unwrap().unwrap();
    assert!(without.data.unwrap().body.is_none());

    assert!(resources.expunge_by_local_id("res-a").wait().unwrap());
    assert!(!resources.expunge_by_local_id("res-a").wait().unwrap());
    assert!(versions(&storage, &note, "res-a").is_empty());

    let stored = load(&storage, &note, FetchNoteOptions::metadata());
    let order: Vec<_> = stored
        .resources
        .iter()
        .map(|resource| (resource.local_id.as_str(), resource.index_in_note))
        .collect();
    assert_eq!(order, vec![("res-b", 0), ("res-c", 1)]);
}

#[test]
fn expunging_note_removes_its_body_tree() {
    let (_dir, storage) = open_storage();
    let note = note_with_resources(&storage);
    let note_dir = blobs(&storage).note_dir(&note.local_id).unwrap();
    assert!(note_dir.exists());

    assert!(storage.notes().expunge_by_local_id(&note.local_id).wait().unwrap());
    assert!(!note_dir.exists());
    assert_eq!(
        storage.resources().count_per_note(&note.local_id).wait().unwrap(),
        0
    );
}

#[test]
fn resource_owned_by_another_note_is_rejected() {
    let (_dir, storage) = open_storage();
    let album = note_with_resources(&storage);
    let before_b = versions(&storage, &album, "res-b");

    let mut thief = Note::new(album.notebook_local_id.clone());
    thief.resources = vec![image(&thief, "res-b", b"stolen", 8)];
    let err = storage.notes().put(thief.clone()).wait().unwrap_err();
    assert!(matches!(err, StorageError::InvalidArgument(_)));

    assert!(storage
        .notes()
        .find_by_local_id(&thief.local_id, FetchNoteOptions::default())
        .wait()
        .unwrap()
        .is_none());
    assert!(versions(&storage, &thief, "res-b").is_empty());
    assert_eq!(versions(&storage, &album, "res-b"), before_b);

    let stored = load(&storage, &album, FetchNoteOptions::metadata());
    let order: Vec<_> = stored
        .resources
        .iter()
        .map(|resource| (resource.local_id.as_str(), resource.index_in_note))
        .collect();
    assert_eq!(order, vec![("res-a", 0), ("res-b", 1), ("res-c", 2)]);
}

#[test]
fn guid_only_note_with_resources_can_be_stored() {
    let (_dir, storage) = open_storage();
    let notebook = storage
        .notebooks()
        .put(Notebook::new("Synced"))
        .wait()
        .unwrap();

    let mut note = Note::new(notebook.local_id);
    note.local_id = String::new();
    note.guid = Some("note-guid-1".to_string());
    let mut resource = image(&note, "res-synced", b"synced", 6);
    resource.note_local_id = String::new();
    note.resources = vec![resource];

    let stored = storage.notes().put(note).wait().unwrap();
    assert!(!stored.local_id.is_empty());
    assert_eq!(stored.resources[0].note_local_id, stored.local_id);
    assert_eq!(versions(&storage, &stored, "res-synced").len(), 1);

    let mut again = stored.clone();
    again.local_id = String::new();
    again.resources[0].note_local_id = String::new();
    let matched = storage.notes().put(again).wait().unwrap();
    assert_eq!(matched.local_id, stored.local_id);

    let found = storage
        .notes()
        .find_by_guid("note-guid-1", FetchNoteOptions::full())
        .wait()
        .unwrap()
        .unwrap();
    assert_eq!(found.local_id, stored.local_id);
    assert_eq!(
        found.resources[0].data.as_ref().unwrap().body.as_deref(),
        Some(&b"synced"[..])
    );
}

#[test]
fn guid_only_note_with_invalid_resource_is_rejected() {
    let (_dir, storage) = open_storage();
    let notebook = storage
        .notebooks()
        .put(Notebook::new("Synced"))
        .wait()
        .unwrap();

    let mut note = Note::new(notebook.local_id);
    note.local_id = String::new();
    note.guid = Some("note-guid-2".to_string());
    let mut broken = image(&note, "res-broken", b"abc", 1);
    broken.data.as_mut().unwrap().size = Some(99);
    note.resources = vec![broken];

    let err = storage.notes().put(note).wait().unwrap_err();
    assert!(matches!(err, StorageError::ValidationFailed { .. }));
    assert!(storage
        .notes()
        .find_by_guid("note-guid-2", FetchNoteOptions::default())
        .wait()
        .unwrap()
        .is_none());
}

#[test]
fn failed_commit_discards_new_versions() {
    let (_dir, storage) = open_storage();
    let mut note = note_with_resources(&storage);
    let old_a = versions(&storage, &note, "res-a");

    // A deferred foreign key violation surfaces only when the write commits.
    let conn = rusqlite::Connection::open(storage.config().database_path()).unwrap();
    conn.execute_batch(
        "CREATE TABLE commit_parent (id TEXT PRIMARY KEY);
         CREATE TABLE commit_guard (
             parent_id TEXT REFERENCES commit_parent(id) DEFERRABLE INITIALLY DEFERRED
         );
         CREATE TRIGGER notes_fail_commit AFTER UPDATE ON notes
         WHEN NEW.title = 'Commit fails'
         BEGIN
             INSERT INTO commit_guard (parent_id) VALUES ('missing');
         END;",
    )
    .unwrap();
    drop(conn);

    note.title = Some("Commit fails".to_string());
    note.resources[0].data = Some(body(b"never-committed", 5));
    let err = storage
        .notes()
        .update(note.clone(), UpdateNoteOptions::default())
        .wait()
        .unwrap_err();
    assert!(matches!(
        err,
        StorageError::Database {
            code: Some(rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY),
            ..
        }
    ));

    assert_eq!(versions(&storage, &note, "res-a"), old_a);
    let stored = load(&storage, &note, FetchNoteOptions::full());
    assert_eq!(stored.title.as_deref(), Some("Album"));
    assert_eq!(
        stored.resources[0].data.as_ref().unwrap().body.as_deref(),
        Some(&b"aaaa"[..])
    );
}
