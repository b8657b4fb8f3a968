//! Tests for the archive file system tree

use super::*;
use crate::core::entry::{BasicEntry, BasicEntryFactory};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

fn factory() -> SharedFactory<BasicEntry> {
    Arc::new(BasicEntryFactory)
}

fn empty_fs() -> ArchiveFileSystem<BasicEntry> {
    ArchiveFileSystem::new_empty(factory()).unwrap()
}

fn parents() -> MknodOptions {
    MknodOptions::new().create_parents(true)
}

fn link(fs: &mut ArchiveFileSystem<BasicEntry>, path: &str, entry_type: EntryType) -> Result<()> {
    fs.mknod(path, entry_type, parents(), None)?.run().map(|_| ())
}

/// Records every callback and optionally vetoes
#[derive(Default)]
struct RecordingListener {
    before: AtomicUsize,
    after: AtomicUsize,
    veto: Mutex<Option<String>>,
}

impl TouchListener for RecordingListener {
    fn before_touch(&self, _event: &TouchEvent) -> std::result::Result<(), Veto> {
        self.before.fetch_add(1, Ordering::SeqCst);
        match self.veto.lock().as_ref() {
            Some(reason) => Err(Veto::new(reason.clone())),
            None => Ok(()),
        }
    }

    fn after_touch(&self, _event: &TouchEvent) {
        self.after.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_new_empty_is_touched_root_only() {
    let fs = empty_fs();
    assert!(fs.is_touched());
    assert_eq!(fs.len(), 1);

    let root = fs.entry("/").unwrap();
    assert!(root.is_directory());
    assert_eq!(root.members(), Some(&[][..]));
    for access in AccessType::ALL {
        assert_ne!(root.time(access), UNKNOWN);
    }
    fs.check_consistency().unwrap();
}

#[test]
fn test_nested_link_and_unlink_scenario() {
    let mut fs = empty_fs();

    link(&mut fs, "/a/b/c.txt", EntryType::File).unwrap();
    assert!(fs.entry("/a").unwrap().is_directory());
    assert!(fs.entry("/a/b").unwrap().is_directory());
    assert!(fs.entry("/a/b/c.txt").unwrap().is_file());
    assert_eq!(fs.len(), 4);
    fs.check_consistency().unwrap();

    fs.unlink("/a/b/c.txt").unwrap();
    fs.unlink("/a/b").unwrap();
    fs.unlink("/a").unwrap();

    assert_eq!(fs.len(), 1);
    assert!(fs.entry("/").unwrap().members().unwrap().is_empty());
    fs.check_consistency().unwrap();
}

#[test]
fn test_exclusive_link_twice_fails() {
    let mut fs = empty_fs();
    let options = MknodOptions::new().exclusive(true);

    fs.mknod("/x", EntryType::File, options, None)
        .unwrap()
        .run()
        .unwrap();
    let err = fs.mknod("/x", EntryType::File, options, None).err().unwrap();

    assert!(matches!(err, ArchiveFsError::EntryExists { ref path } if path == "/x"));
}

#[test]
fn test_non_exclusive_link_replaces_file() {
    let mut fs = empty_fs();
    link(&mut fs, "/x", EntryType::File).unwrap();

    let template = BasicEntry::file("t").with_time(AccessType::Write, 1234);
    fs.mknod("/x", EntryType::File, MknodOptions::new(), Some(&template))
        .unwrap()
        .run()
        .unwrap();

    assert_eq!(fs.entry("/x").unwrap().time(AccessType::Write), 1234);
    assert_eq!(fs.len(), 2);
    fs.check_consistency().unwrap();
}

#[test]
fn test_directory_is_never_replaced() {
    let mut fs = empty_fs();
    link(&mut fs, "/d", EntryType::Directory).unwrap();

    let err = fs
        .mknod("/d", EntryType::Directory, MknodOptions::new(), None)
        .err()
        .unwrap();
    assert!(matches!(err, ArchiveFsError::DirectoryExists { .. }));

    let err = fs.mknod("/", EntryType::Directory, parents(), None).err().unwrap();
    assert!(matches!(err, ArchiveFsError::DirectoryExists { .. }));
}

#[test]
fn test_type_mismatch() {
    let mut fs = empty_fs();
    link(&mut fs, "/f", EntryType::File).unwrap();

    let err = fs
        .mknod("/f", EntryType::Directory, MknodOptions::new(), None)
        .err()
        .unwrap();
    assert!(matches!(
        err,
        ArchiveFsError::TypeMismatch {
            existing: EntryType::File,
            requested: EntryType::Directory,
            ..
        }
    ));
}

#[test]
fn test_unsupported_type() {
    let mut fs = empty_fs();
    let err = fs
        .mknod("/link", EntryType::Symlink, parents(), None)
        .err()
        .unwrap();
    assert!(matches!(err, ArchiveFsError::UnsupportedType { .. }));
    assert_eq!(fs.len(), 1);
}

#[test]
fn test_parent_must_be_directory() {
    let mut fs = empty_fs();
    link(&mut fs, "/f", EntryType::File).unwrap();

    let err = fs.mknod("/f/g", EntryType::File, parents(), None).err().unwrap();
    assert!(matches!(err, ArchiveFsError::ParentNotDirectory { ref path } if path == "/f"));
}

#[test]
fn test_missing_parent_without_create_parents() {
    let mut fs = empty_fs();
    let err = fs
        .mknod("/a/b", EntryType::File, MknodOptions::new(), None)
        .err()
        .unwrap();
    assert!(matches!(err, ArchiveFsError::MissingParent { ref path } if path == "/a"));
    assert_eq!(fs.len(), 1);
}

#[test]
fn test_dropped_link_leaves_tree_unchanged() {
    let mut fs = ArchiveFileSystem::from_entries(factory(), Vec::new(), None, false).unwrap();
    assert!(!fs.is_touched());

    {
        let pending = fs.mknod("/a/b/c", EntryType::File, parents(), None).unwrap();
        assert_eq!(
            pending.pending_paths().collect::<Vec<_>>(),
            vec!["/a", "/a/b", "/a/b/c"]
        );
        assert_eq!(pending.target().path(), "/a/b/c");
    }

    assert_eq!(fs.len(), 1);
    assert!(!fs.is_touched());
    assert!(fs.entry("/a").is_none());
}

#[test]
fn test_link_shares_one_timestamp() {
    let mut fs = empty_fs();
    let linked = fs
        .mknod("/a/b/c/d", EntryType::File, parents(), None)
        .unwrap()
        .run()
        .unwrap();

    let now = linked.time(AccessType::Write);
    assert_ne!(now, UNKNOWN);

    // The root had a known time and got a new member.
    assert_eq!(fs.entry("/").unwrap().time(AccessType::Write), now);

    for path in ["/a", "/a/b", "/a/b/c"] {
        assert_eq!(fs.entry(path).unwrap().time(AccessType::Write), now, "{path}");
    }
    fs.check_consistency().unwrap();
}

#[test]
fn test_ghost_parent_time_not_touched_by_link() {
    let entries = vec![BasicEntry::file("ghost/file.txt").with_time(AccessType::Write, 10)];
    let mut fs = ArchiveFileSystem::from_entries(factory(), entries, None, false).unwrap();
    assert_eq!(fs.entry("/ghost").unwrap().time(AccessType::Write), UNKNOWN);

    link(&mut fs, "/ghost/other.txt", EntryType::File).unwrap();
    assert_eq!(fs.entry("/ghost").unwrap().time(AccessType::Write), UNKNOWN);

    fs.unlink("/ghost/file.txt").unwrap();
    assert_eq!(fs.entry("/ghost").unwrap().time(AccessType::Write), UNKNOWN);
}

#[test]
fn test_unlink_updates_known_parent_time() {
    let entries = vec![
        BasicEntry::directory("dir/").with_time(AccessType::Write, 5),
        BasicEntry::file("dir/f").with_time(AccessType::Write, 5),
    ];
    let mut fs = ArchiveFileSystem::from_entries(factory(), entries, None, false).unwrap();

    fs.unlink("/dir/f").unwrap();
    assert!(fs.entry("/dir").unwrap().time(AccessType::Write) > 5);
}

#[test]
fn test_unlink_errors() {
    let mut fs = empty_fs();
    link(&mut fs, "/d/f", EntryType::File).unwrap();

    assert!(matches!(fs.unlink("/"), Err(ArchiveFsError::RootUnlink)));
    assert!(matches!(fs.unlink("/nope"), Err(ArchiveFsError::NotFound { .. })));

    let before = fs.len();
    assert!(matches!(
        fs.unlink("/d"),
        Err(ArchiveFsError::DirectoryNotEmpty { ref path }) if path == "/d"
    ));
    assert_eq!(fs.len(), before);
    assert!(fs.entry("/d/f").is_some());
}

#[test]
fn test_bulk_construction_fixes_ghosts() {
    let entries = vec![
        BasicEntry::file("z/y/x.txt"),
        BasicEntry::file("a.txt"),
        BasicEntry::directory("z/"),
        BasicEntry::file("win\\style\\path.txt"),
        BasicEntry::file("./dots/../dotted.txt"),
    ];
    let fs = ArchiveFileSystem::from_entries(factory(), entries, None, true).unwrap();

    fs.check_consistency().unwrap();
    assert!(!fs.is_touched());
    assert!(fs.entry("/z/y").unwrap().is_directory());
    assert!(fs.entry("/win/style/path.txt").unwrap().is_file());
    assert!(fs.entry("/dotted.txt").unwrap().is_file());
    assert!(fs.entry("/dots").is_none());

    let root = fs.entry("/").unwrap();
    assert_eq!(
        root.members().unwrap(),
        &["a.txt", "dotted.txt", "win", "z"].map(String::from)[..]
    );
}

#[test]
fn test_bulk_construction_shadows_file_with_directory() {
    let entries = vec![BasicEntry::file("a"), BasicEntry::file("a/b")];
    let fs = ArchiveFileSystem::from_entries(factory(), entries, None, false).unwrap();

    assert!(fs.entry("/a").unwrap().is_directory());
    fs.check_consistency().unwrap();
}

#[test]
fn test_root_uses_template() {
    let template = BasicEntry::directory("").with_time(AccessType::Write, 77);
    let entries = vec![BasicEntry::directory("").with_time(AccessType::Write, 1)];
    let fs = ArchiveFileSystem::from_entries(factory(), entries, Some(&template), false).unwrap();

    assert_eq!(fs.len(), 1);
    assert_eq!(fs.entry("/").unwrap().time(AccessType::Write), 77);
}

#[test]
fn test_lookup_returns_copies() {
    let mut fs = empty_fs();
    link(&mut fs, "/f", EntryType::File).unwrap();

    let mut copy = fs.entry("/f").unwrap().into_entry();
    copy.set_time(AccessType::Read, 99);

    assert_eq!(fs.entry("/f").unwrap().time(AccessType::Read), UNKNOWN);
}

#[test]
fn test_set_time() {
    let mut fs = empty_fs();
    link(&mut fs, "/f", EntryType::File).unwrap();

    let supported = fs
        .set_time("/f", [AccessType::Read, AccessType::Create], 500)
        .unwrap();
    assert!(supported);

    let entry = fs.entry("/f").unwrap();
    assert_eq!(entry.time(AccessType::Read), 500);
    assert_eq!(entry.time(AccessType::Create), 500);

    assert!(matches!(
        fs.set_time("/f", [AccessType::Read], -1),
        Err(ArchiveFsError::NegativeTime { .. })
    ));
    assert!(matches!(
        fs.set_time("/missing", [AccessType::Read], 1),
        Err(ArchiveFsError::NotFound { .. })
    ));
}

#[test]
fn test_read_only_rejects_mutation() {
    let entries = vec![BasicEntry::file("f")];
    let mut fs = ArchiveFileSystem::from_entries(factory(), entries, None, true).unwrap();

    assert!(fs.is_read_only());
    assert!(matches!(
        fs.mknod("/g", EntryType::File, parents(), None).err().unwrap(),
        ArchiveFsError::ReadOnlyFileSystem { .. }
    ));
    assert!(matches!(
        fs.unlink("/f"),
        Err(ArchiveFsError::ReadOnlyFileSystem { .. })
    ));
    assert!(!fs.is_touched());
}

#[test]
fn test_read_only_tree_cannot_be_touched() {
    let mut fs = ArchiveFileSystem::from_entries(factory(), Vec::new(), None, true).unwrap();
    let listener = Arc::new(RecordingListener::default());
    fs.add_touch_listener(listener.clone());

    assert!(matches!(
        fs.touch(),
        Err(ArchiveFsError::ReadOnlyFileSystem { ref path }) if path == "/"
    ));
    assert!(!fs.is_touched());
    assert_eq!(listener.before.load(Ordering::SeqCst), 0);
    assert_eq!(listener.after.load(Ordering::SeqCst), 0);
}

#[test]
fn test_touch_is_idempotent() {
    let mut fs = ArchiveFileSystem::from_entries(factory(), Vec::new(), None, false).unwrap();
    let listener = Arc::new(RecordingListener::default());
    fs.add_touch_listener(listener.clone());

    fs.touch().unwrap();
    fs.touch().unwrap();

    assert!(fs.is_touched());
    assert_eq!(listener.before.load(Ordering::SeqCst), 1);
    assert_eq!(listener.after.load(Ordering::SeqCst), 1);

    fs.untouch();
    fs.touch().unwrap();
    assert_eq!(listener.after.load(Ordering::SeqCst), 2);
}

#[test]
fn test_veto_rolls_back_link() {
    let mut fs = ArchiveFileSystem::from_entries(factory(), Vec::new(), None, false).unwrap();
    let listener = Arc::new(RecordingListener::default());
    *listener.veto.lock() = Some("output unavailable".to_string());
    fs.add_touch_listener(listener.clone());

    let err = fs
        .mknod("/a/b", EntryType::File, parents(), None)
        .unwrap()
        .run()
        .err()
        .unwrap();

    assert!(matches!(err, ArchiveFsError::Veto { ref reason } if reason == "output unavailable"));
    assert_eq!(fs.len(), 1);
    assert!(!fs.is_touched());
    assert_eq!(listener.after.load(Ordering::SeqCst), 0);

    *listener.veto.lock() = None;
    link(&mut fs, "/a/b", EntryType::File).unwrap();
    assert_eq!(fs.len(), 3);
}

#[test]
fn test_veto_rolls_back_unlink() {
    let entries = vec![BasicEntry::file("f")];
    let mut fs = ArchiveFileSystem::from_entries(factory(), entries, None, false).unwrap();
    let listener = Arc::new(RecordingListener::default());
    *listener.veto.lock() = Some("busy".to_string());
    fs.add_touch_listener(listener);

    assert!(matches!(fs.unlink("/f"), Err(ArchiveFsError::Veto { .. })));
    assert!(fs.entry("/f").is_some());
    assert!(!fs.is_touched());
}

#[test]
fn test_listener_registration_by_identity() {
    let mut fs = ArchiveFileSystem::from_entries(factory(), Vec::new(), None, false).unwrap();
    let listener: Arc<dyn TouchListener> = Arc::new(RecordingListener::default());
    let other: Arc<dyn TouchListener> = Arc::new(RecordingListener::default());

    fs.add_touch_listener(listener.clone());
    fs.add_touch_listener(listener.clone());
    assert_eq!(fs.listeners.len(), 1);

    assert!(!fs.remove_touch_listener(&other));
    assert!(fs.remove_touch_listener(&listener));
    assert!(fs.listeners.is_empty());
}

#[test]
fn test_sorted_entries() {
    let mut fs = empty_fs();
    link(&mut fs, "/b", EntryType::File).unwrap();
    link(&mut fs, "/a/c", EntryType::File).unwrap();

    let paths: Vec<_> = fs
        .sorted_entries()
        .into_iter()
        .map(|e| e.path().to_string())
        .collect();
    assert_eq!(paths, vec!["/", "/a", "/a/c", "/b"]);
}
