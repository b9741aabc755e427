use notestore_core::{
    ChannelNotifier, FetchNoteOptions, ListFilters, ListOptions, LocalStorage, Note,
    NoteListOrder, Notebook, NotebookListOrder, OrderDirection, StorageConfig, StorageError,
    StorageEvent, Tag, TriState, UpdateNoteOptions,
};
use std::sync::{mpsc, Arc};

fn open_storage() -> (tempfile::TempDir, LocalStorage) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = StorageConfig::new(dir.path());
    config.read_workers = 2;
    let storage = LocalStorage::open(config).unwrap();
    (dir, storage)
}

fn put_notebook(storage: &LocalStorage, name: &str) -> Notebook {
    storage.notebooks().put(Notebook::new(name)).wait().unwrap()
}

fn put_tag(storage: &LocalStorage, name: &str) -> Tag {
    storage.tags().put(Tag::new(name)).wait().unwrap()
}

fn note_in(notebook: &Notebook, title: &str, content: &str) -> Note {
    let mut note = Note::new(notebook.local_id.clone());
    note.title = Some(title.to_string());
    note.content = Some(format!("<en-note>{content}</en-note>"));
    note
}

#[test]
fn put_then_find_round_trips_note_with_tags() {
    let (_dir, storage) = open_storage();
    let notebook = put_notebook(&storage, "Inbox");
    let first = put_tag(&storage, "first");
    let second = put_tag(&storage, "second");

    let mut note = note_in(&notebook, "Plan", "buy milk");
    note.created_at = Some(1_700_000_000_000);
    note.tag_local_ids = vec![second.local_id.clone(), first.local_id.clone()];
    let stored = storage.notes().put(note.clone()).wait().unwrap();

    let found = storage
        .notes()
        .find_by_local_id(&stored.local_id, FetchNoteOptions::default())
        .wait()
        .unwrap()
        .unwrap();
    assert_eq!(found, stored);
    assert_eq!(
        found.tag_local_ids,
        vec![second.local_id.clone(), first.local_id.clone()]
    );

    let tags = storage.tags().list_per_note(&stored.local_id).wait().unwrap();
    let names: Vec<_> = tags.iter().map(|tag| tag.name.as_str()).collect();
    assert_eq!(names, vec!["second", "first"]);
}

#[test]
fn putting_the_same_note_twice_is_idempotent() {
    let (_dir, storage) = open_storage();
    let notebook = put_notebook(&storage, "Inbox");
    let note = note_in(&notebook, "Same", "text");

    storage.notes().put(note.clone()).wait().unwrap();
    storage.notes().put(note.clone()).wait().unwrap();

    assert_eq!(storage.notes().count(ListFilters::default()).wait().unwrap(), 1);
    let found = storage
        .notes()
        .find_by_local_id(&note.local_id, FetchNoteOptions::default())
        .wait()
        .unwrap();
    assert_eq!(found, Some(note));
}

#[test]
fn note_by_guid_attaches_to_notebook_by_guid() {
    let (_dir, storage) = open_storage();
    let mut notebook = Notebook::new("Synced");
    notebook.guid = Some("nb-guid".to_string());
    storage.notebooks().put(notebook.clone()).wait().unwrap();

    let mut note = Note::new("");
    note.local_id = String::new();
    note.guid = Some("note-guid".to_string());
    note.notebook_guid = Some("nb-guid".to_string());
    note.title = Some("From server".to_string());
    let stored = storage.notes().put(note).wait().unwrap();

    assert!(!stored.local_id.is_empty());
    assert_eq!(stored.notebook_local_id, notebook.local_id);

    let mut again = stored.clone();
    again.local_id = String::new();
    again.title = Some("Renamed".to_string());
    let restored = storage.notes().put(again).wait().unwrap();
    assert_eq!(restored.local_id, stored.local_id);

    let found = storage
        .notes()
        .find_by_guid("note-guid", FetchNoteOptions::default())
        .wait()
        .unwrap()
        .unwrap();
    assert_eq!(found.title.as_deref(), Some("Renamed"));
}

#[test]
fn note_in_unknown_notebook_guid_is_rejected() {
    let (_dir, storage) = open_storage();
    let mut note = Note::new("");
    note.notebook_guid = Some("missing".to_string());

    let err = storage.notes().put(note).wait().unwrap_err();
    assert!(matches!(err, StorageError::InvalidArgument(_)));
}

#[test]
fn invalid_note_fails_before_reaching_storage() {
    let (_dir, storage) = open_storage();
    let notebook = put_notebook(&storage, "Inbox");
    let mut note = note_in(&notebook, "x", "y");
    note.title = Some("  padded  ".to_string());

    let err = storage.notes().put(note).wait().unwrap_err();
    assert!(matches!(err, StorageError::ValidationFailed { .. }));
    assert_eq!(storage.notes().count(ListFilters::default()).wait().unwrap(), 0);
}

#[test]
fn update_of_missing_note_is_rejected() {
    let (_dir, storage) = open_storage();
    let notebook = put_notebook(&storage, "Inbox");
    let note = note_in(&notebook, "Ghost", "nothing");

    let err = storage
        .notes()
        .update(note, UpdateNoteOptions::default())
        .wait()
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidArgument(_)));
}

#[test]
fn update_without_tags_keeps_existing_links() {
    let (_dir, storage) = open_storage();
    let notebook = put_notebook(&storage, "Inbox");
    let tag = put_tag(&storage, "keep");
    let mut note = note_in(&notebook, "Tagged", "body");
    note.tag_local_ids = vec![tag.local_id.clone()];
    let mut stored = storage.notes().put(note).wait().unwrap();

    stored.title = Some("Retitled".to_string());
    stored.tag_local_ids.clear();
    let options = UpdateNoteOptions {
        update_tags: false,
        ..UpdateNoteOptions::default()
    };
    storage.notes().update(stored.clone(), options).wait().unwrap();

    let found = storage
        .notes()
        .find_by_local_id(&stored.local_id, FetchNoteOptions::default())
        .wait()
        .unwrap()
        .unwrap();
    assert_eq!(found.title.as_deref(), Some("Retitled"));
    assert_eq!(found.tag_local_ids, vec![tag.local_id]);
}

#[test]
fn only_one_notebook_stays_default() {
    let (_dir, storage) = open_storage();
    let mut first = Notebook::new("First");
    first.is_default = true;
    storage.notebooks().put(first.clone()).wait().unwrap();
    let mut second = Notebook::new("Second");
    second.is_default = true;
    storage.notebooks().put(second.clone()).wait().unwrap();

    let default = storage.notebooks().find_default().wait().unwrap().unwrap();
    assert_eq!(default.local_id, second.local_id);
    let first = storage
        .notebooks()
        .find_by_local_id(&first.local_id)
        .wait()
        .unwrap()
        .unwrap();
    assert!(!first.is_default);
}

#[test]
fn notebook_name_lookup_ignores_case() {
    let (_dir, storage) = open_storage();
    let notebook = put_notebook(&storage, "Travel Plans");

    let found = storage
        .notebooks()
        .find_by_name("travel plans")
        .wait()
        .unwrap()
        .unwrap();
    assert_eq!(found.local_id, notebook.local_id);
}

#[test]
fn notebook_list_honors_order_and_pagination() {
    let (_dir, storage) = open_storage();
    for name in ["Charlie", "alpha", "Bravo"] {
        put_notebook(&storage, name);
    }

    let mut options = ListOptions::ordered(NotebookListOrder::ByName, OrderDirection::Ascending);
    options.limit = Some(2);
    let names: Vec<_> = storage
        .notebooks()
        .list(options)
        .wait()
        .unwrap()
        .into_iter()
        .map(|notebook| notebook.name)
        .collect();
    assert_eq!(names, vec!["alpha", "Bravo"]);
}

#[test]
fn note_lists_scope_by_notebook_and_tag() {
    let (_dir, storage) = open_storage();
    let work = put_notebook(&storage, "Work");
    let home = put_notebook(&storage, "Home");
    let urgent = put_tag(&storage, "urgent");

    let mut report = note_in(&work, "Report", "q3");
    report.created_at = Some(2);
    report.tag_local_ids = vec![urgent.local_id.clone()];
    let mut memo = note_in(&work, "Memo", "team");
    memo.created_at = Some(1);
    let mut chores = note_in(&home, "Chores", "laundry");
    chores.tag_local_ids = vec![urgent.local_id.clone()];
    for note in [&report, &memo, &chores] {
        storage.notes().put(note.clone()).wait().unwrap();
    }

    let by_created = ListOptions::ordered(NoteListOrder::ByCreated, OrderDirection::Ascending);
    let in_work: Vec<_> = storage
        .notes()
        .list_per_notebook(&work.local_id, by_created, FetchNoteOptions::default())
        .wait()
        .unwrap()
        .into_iter()
        .map(|note| note.local_id)
        .collect();
    assert_eq!(in_work, vec![memo.local_id.clone(), report.local_id.clone()]);

    let tagged = storage
        .notes()
        .list_per_tag(&urgent.local_id, ListOptions::default(), FetchNoteOptions::default())
        .wait()
        .unwrap();
    assert_eq!(tagged.len(), 2);

    assert_eq!(
        storage
            .notes()
            .count_per_notebook(&home.local_id, ListFilters::default())
            .wait()
            .unwrap(),
        1
    );
}

#[test]
fn dirty_filter_counts_only_dirty_notes() {
    let (_dir, storage) = open_storage();
    let notebook = put_notebook(&storage, "Inbox");
    let mut dirty = note_in(&notebook, "Dirty", "a");
    dirty.flags.is_dirty = true;
    let clean = note_in(&notebook, "Clean", "b");
    storage.notes().put(dirty).wait().unwrap();
    storage.notes().put(clean).wait().unwrap();

    let filters = ListFilters {
        locally_modified: TriState::Include,
        ..ListFilters::default()
    };
    assert_eq!(storage.notes().count(filters).wait().unwrap(), 1);
}

#[test]
fn expunging_notebook_removes_its_notes() {
    let (_dir, storage) = open_storage();
    let doomed = put_notebook(&storage, "Doomed");
    let kept = put_notebook(&storage, "Kept");
    let gone = storage
        .notes()
        .put(note_in(&doomed, "Gone", "x"))
        .wait()
        .unwrap();
    storage.notes().put(note_in(&kept, "Stays", "y")).wait().unwrap();

    let expunged = storage
        .notebooks()
        .expunge_by_local_id(&doomed.local_id)
        .wait()
        .unwrap();
    assert_eq!(expunged, Some(vec![gone.local_id.clone()]));
    assert_eq!(storage.notes().count(ListFilters::default()).wait().unwrap(), 1);
    assert!(storage
        .notes()
        .find_by_local_id(&gone.local_id, FetchNoteOptions::default())
        .wait()
        .unwrap()
        .is_none());

    let again = storage
        .notebooks()
        .expunge_by_local_id(&doomed.local_id)
        .wait()
        .unwrap();
    assert_eq!(again, None);
}

#[test]
fn expunging_tag_removes_descendants_and_links() {
    let (_dir, storage) = open_storage();
    let notebook = put_notebook(&storage, "Inbox");
    let parent = put_tag(&storage, "parent");
    let mut child = Tag::new("child");
    child.parent_local_id = Some(parent.local_id.clone());
    let child = storage.tags().put(child).wait().unwrap();
    let mut grandchild = Tag::new("grandchild");
    grandchild.parent_local_id = Some(child.local_id.clone());
    let grandchild = storage.tags().put(grandchild).wait().unwrap();

    let mut note = note_in(&notebook, "Tagged", "z");
    note.tag_local_ids = vec![grandchild.local_id.clone()];
    let note = storage.notes().put(note).wait().unwrap();

    let children = storage
        .tags()
        .expunge_by_local_id(&parent.local_id)
        .wait()
        .unwrap();
    assert_eq!(
        children,
        Some(vec![child.local_id.clone(), grandchild.local_id.clone()])
    );
    assert_eq!(storage.tags().count(ListFilters::default()).wait().unwrap(), 0);

    let found = storage
        .notes()
        .find_by_local_id(&note.local_id, FetchNoteOptions::default())
        .wait()
        .unwrap()
        .unwrap();
    assert!(found.tag_local_ids.is_empty());
}

#[test]
fn expunge_note_by_guid_reports_missing_notes() {
    let (_dir, storage) = open_storage();
    let notebook = put_notebook(&storage, "Inbox");
    let mut note = note_in(&notebook, "Synced", "a");
    note.guid = Some("g-1".to_string());
    storage.notes().put(note).wait().unwrap();

    assert!(storage.notes().expunge_by_guid("g-1").wait().unwrap());
    assert!(!storage.notes().expunge_by_guid("g-1").wait().unwrap());
}

#[test]
fn notifier_sees_committed_changes_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let (sender, events) = mpsc::channel();
    let storage = LocalStorage::builder(StorageConfig::new(dir.path()))
        .with_notifier(Arc::new(ChannelNotifier::new(sender)))
        .build()
        .unwrap();

    let notebook = put_notebook(&storage, "Inbox");
    let note = storage
        .notes()
        .put(note_in(&notebook, "Hello", "world"))
        .wait()
        .unwrap();
    storage.notes().expunge_by_local_id(&note.local_id).wait().unwrap();

    assert_eq!(events.recv().unwrap(), StorageEvent::NotebookPut(notebook));
    assert_eq!(events.recv().unwrap(), StorageEvent::NotePut(note.clone()));
    assert_eq!(
        events.recv().unwrap(),
        StorageEvent::NoteExpunged {
            local_id: note.local_id
        }
    );
}

#[test]
fn failed_write_emits_no_event() {
    let dir = tempfile::tempdir().unwrap();
    let (sender, events) = mpsc::channel();
    let storage = LocalStorage::builder(StorageConfig::new(dir.path()))
        .with_notifier(Arc::new(ChannelNotifier::new(sender)))
        .build()
        .unwrap();

    let mut orphan = Note::new("no-such-notebook");
    orphan.title = Some("Orphan".to_string());
    let err = storage.notes().put(orphan).wait().unwrap_err();
    assert!(matches!(err, StorageError::Database { .. }));
    assert!(events.try_recv().is_err());
}

#[test]
fn dropped_storage_resolves_pending_reads() {
    let (_dir, storage) = open_storage();
    let notebooks = storage.notebooks();
    let pending = notebooks.count(ListFilters::default());
    drop(storage);

    match pending.wait() {
        Ok(count) => assert_eq!(count, 0),
        Err(err) => assert!(matches!(
            err,
            StorageError::HandlerDestroyed | StorageError::Canceled
        )),
    }
}
