//! In-memory file system tree of one mounted archive
//!
//! The tree maps canonical paths to nodes. Directory nodes carry the set of
//! their member names, and every mutation keeps three invariants:
//!
//! - the root exists and is a directory
//! - the parent of every other node exists and is a directory
//! - a directory's member set names exactly its child nodes
//!
//! The tree is not synchronized. The controller owning it serializes access
//! with one lock per mounted archive.

mod link;
mod touch;

#[cfg(test)]
mod tests;

pub use link::PathLink;
pub use touch::{TouchEvent, TouchListener, Veto};

use crate::core::entry::{
    now_millis, AccessType, ArchiveEntry, Entry, EntryFactory, EntryType, SizeType, UNKNOWN,
};
use crate::core::path::{self, canonicalize, is_root, split, ROOT};
use crate::error::{ArchiveFsError, Result};
use ahash::AHashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Shared entry factory of one archive format
pub type SharedFactory<E> = Arc<dyn EntryFactory<Entry = E>>;

/// Node owned by the tree
#[derive(Debug, Clone)]
pub(crate) struct Node<E> {
    pub(crate) entry: E,
    /// Member names, present for directories only
    pub(crate) members: Option<BTreeSet<String>>,
}

impl<E: ArchiveEntry> Node<E> {
    pub(crate) fn new(entry: E) -> Self {
        let members = match entry.entry_type() {
            EntryType::Directory => Some(BTreeSet::new()),
            _ => None,
        };
        Node { entry, members }
    }

    pub(crate) fn is_directory(&self) -> bool {
        self.members.is_some()
    }

    fn snapshot(&self, path: &str) -> FsEntry<E> {
        FsEntry {
            path: path.to_string(),
            entry: self.entry.clone(),
            members: self
                .members
                .as_ref()
                .map(|members| members.iter().cloned().collect()),
        }
    }
}

/// Snapshot of one tree node
///
/// Snapshots are copies: changing them never affects the tree.
#[derive(Debug, Clone, PartialEq)]
pub struct FsEntry<E> {
    path: String,
    entry: E,
    members: Option<Vec<String>>,
}

impl<E: ArchiveEntry> FsEntry<E> {
    /// Canonical path inside the archive
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Copy of the format-specific entry
    pub fn entry(&self) -> &E {
        &self.entry
    }

    pub fn into_entry(self) -> E {
        self.entry
    }

    /// Sorted member names of a directory
    pub fn members(&self) -> Option<&[String]> {
        self.members.as_deref()
    }

    pub fn is_directory(&self) -> bool {
        self.entry.entry_type() == EntryType::Directory
    }

    pub fn is_file(&self) -> bool {
        self.entry.entry_type() == EntryType::File
    }
}

impl<E: ArchiveEntry> Entry for FsEntry<E> {
    fn name(&self) -> &str {
        &self.path
    }

    fn entry_type(&self) -> EntryType {
        self.entry.entry_type()
    }

    fn size(&self, size_type: SizeType) -> i64 {
        self.entry.size(size_type)
    }

    fn time(&self, access: AccessType) -> i64 {
        self.entry.time(access)
    }
}

/// Options of [`ArchiveFileSystem::mknod`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MknodOptions {
    /// Create missing parent directories
    pub create_parents: bool,
    /// Fail if the entry exists already
    pub exclusive: bool,
}

impl MknodOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_parents(mut self, create_parents: bool) -> Self {
        self.create_parents = create_parents;
        self
    }

    pub fn exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }
}

/// File system tree of one mounted archive
pub struct ArchiveFileSystem<E: ArchiveEntry> {
    factory: SharedFactory<E>,
    nodes: AHashMap<String, Node<E>>,
    touched: bool,
    read_only: bool,
    listeners: Vec<Arc<dyn TouchListener>>,
}

impl<E: ArchiveEntry> ArchiveFileSystem<E> {
    /// Create a tree for a new, empty archive
    ///
    /// The root gets the current time for every access type and the tree
    /// starts out touched: an empty archive is itself worth persisting.
    pub fn new_empty(factory: SharedFactory<E>) -> Result<Self> {
        let mut root = factory.new_entry(ROOT, EntryType::Directory, None)?;
        let now = now_millis();
        for access in AccessType::ALL {
            root.set_time(access, now);
        }

        let mut fs = Self::with_root(factory, root, false);
        if let Err(err) = fs.touch() {
            panic!("fresh archive file system vetoed its initial touch: {err}");
        }

        debug!("Created empty archive file system");
        Ok(fs)
    }

    /// Create a tree from the entries of an existing archive
    ///
    /// Entry names are canonicalized; later duplicates replace earlier ones.
    /// The root is always created from `root_template`, whether or not the
    /// archive lists one. Missing parent directories are synthesized as
    /// ghosts with an unknown write time.
    pub fn from_entries<I>(
        factory: SharedFactory<E>,
        entries: I,
        root_template: Option<&dyn Entry>,
        read_only: bool,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = E>,
    {
        let root = factory.new_entry(ROOT, EntryType::Directory, root_template)?;
        let mut fs = Self::with_root(factory, root.clone(), read_only);

        for entry in entries {
            let path = canonicalize(entry.name())?;
            fs.nodes.insert(path, Node::new(entry));
        }
        fs.nodes.insert(ROOT.to_string(), Node::new(root));

        let mut paths: Vec<String> = fs
            .nodes
            .keys()
            .filter(|path| !is_root(path))
            .cloned()
            .collect();
        paths.sort_unstable();

        let mut ghosts = 0;
        for path in &paths {
            ghosts += fs.fix_parents(path)?;
        }

        debug!(
            entries = paths.len(),
            ghosts, read_only, "Mounted archive file system"
        );
        Ok(fs)
    }

    fn with_root(factory: SharedFactory<E>, root: E, read_only: bool) -> Self {
        let mut nodes = AHashMap::new();
        nodes.insert(ROOT.to_string(), Node::new(root));
        ArchiveFileSystem {
            factory,
            nodes,
            touched: false,
            read_only,
            listeners: Vec::new(),
        }
    }

    /// Link `path` into its parent, synthesizing missing ancestors
    ///
    /// Walks up until an ancestor already lists the member it needs, so each
    /// ancestor chain is fixed only once. Returns the number of ghosts made.
    fn fix_parents(&mut self, path: &str) -> Result<usize> {
        let mut ghosts = 0;
        let mut current = path.to_string();

        while let Some((parent, base)) = split(&current) {
            let (parent, base) = (parent.to_string(), base.to_string());

            if let Some(Node {
                members: Some(members),
                ..
            }) = self.nodes.get_mut(&parent)
            {
                if !members.insert(base) {
                    break;
                }
            } else {
                if let Some(shadowed) = self.nodes.get(&parent) {
                    warn!(
                        path = %parent,
                        entry_type = ?shadowed.entry.entry_type(),
                        "Archive entry shadowed by a directory"
                    );
                }
                let mut ghost = self
                    .factory
                    .new_entry(&parent, EntryType::Directory, None)?;
                ghost.set_time(AccessType::Write, UNKNOWN);

                let mut node = Node::new(ghost);
                if let Some(members) = node.members.as_mut() {
                    members.insert(base);
                }
                trace!(path = %parent, "Synthesized ghost directory");
                self.nodes.insert(parent.clone(), node);
                ghosts += 1;
            }

            current = parent;
        }

        Ok(ghosts)
    }

    /// Whether the tree has been modified since it was mounted or synced
    pub fn is_touched(&self) -> bool {
        self.touched
    }

    /// Whether mutations are rejected
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Number of nodes, including the root
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always `false`: the root is never removed
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Snapshot of the node at `path`
    pub fn entry(&self, path: &str) -> Option<FsEntry<E>> {
        let path = canonicalize(path).ok()?;
        self.nodes.get(&path).map(|node| node.snapshot(&path))
    }

    /// Snapshots of every node, in no particular order
    pub fn iter(&self) -> impl Iterator<Item = FsEntry<E>> + '_ {
        self.nodes.iter().map(|(path, node)| node.snapshot(path))
    }

    /// Snapshots of every node, sorted by path
    pub fn sorted_entries(&self) -> Vec<FsEntry<E>> {
        let mut entries: Vec<_> = self.iter().collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        entries
    }

    /// Prepare the creation of an entry
    ///
    /// Validates the request against the current tree without changing it.
    /// The returned link borrows the tree until it is run or dropped.
    ///
    /// # Errors
    ///
    /// - `UnsupportedType` unless `entry_type` is a file or directory
    /// - `EntryExists` if the entry exists and `exclusive` is set
    /// - `DirectoryExists` if a directory exists at `path`
    /// - `TypeMismatch` if an entry of another type exists at `path`
    /// - `ParentNotDirectory` if an ancestor is not a directory
    /// - `MissingParent` if the parent is missing and `create_parents` is unset
    pub fn mknod(
        &mut self,
        path: &str,
        entry_type: EntryType,
        options: MknodOptions,
        template: Option<&dyn Entry>,
    ) -> Result<PathLink<'_, E>> {
        let path = canonicalize(path)?;
        self.check_writable(&path)?;

        if !matches!(entry_type, EntryType::File | EntryType::Directory) {
            return Err(ArchiveFsError::UnsupportedType { path, entry_type });
        }

        if let Some(existing) = self.nodes.get(&path) {
            let existing = existing.entry.entry_type();
            if options.exclusive {
                return Err(ArchiveFsError::EntryExists { path });
            }
            if existing == EntryType::Directory {
                return Err(ArchiveFsError::DirectoryExists { path });
            }
            if existing != entry_type {
                return Err(ArchiveFsError::TypeMismatch {
                    path,
                    existing,
                    requested: entry_type,
                });
            }
        }

        let target = self.factory.new_entry(&path, entry_type, template)?;
        let mut pending = vec![(path.clone(), target)];
        let mut current = path;

        let anchor = loop {
            let Some(parent) = path::parent(&current) else {
                panic!("archive file system lost its root directory");
            };
            let parent = parent.to_string();

            match self.nodes.get(&parent) {
                Some(node) if node.is_directory() => break parent,
                Some(_) => return Err(ArchiveFsError::ParentNotDirectory { path: parent }),
                None if options.create_parents => {
                    let entry = self
                        .factory
                        .new_entry(&parent, EntryType::Directory, None)?;
                    pending.push((parent.clone(), entry));
                    current = parent;
                }
                None => return Err(ArchiveFsError::MissingParent { path: parent }),
            }
        };

        pending.reverse();
        Ok(PathLink::new(self, anchor, pending))
    }

    /// Remove an entry
    ///
    /// # Errors
    ///
    /// - `RootUnlink` for the root
    /// - `NotFound` if there is no entry at `path`
    /// - `DirectoryNotEmpty` for a directory with members
    /// - `Veto` if a touch listener declines the modification
    pub fn unlink(&mut self, path: &str) -> Result<()> {
        let path = canonicalize(path)?;
        if is_root(&path) {
            return Err(ArchiveFsError::RootUnlink);
        }
        self.check_writable(&path)?;

        match self.nodes.get(&path) {
            None => return Err(ArchiveFsError::NotFound { path }),
            Some(Node {
                members: Some(members),
                ..
            }) if !members.is_empty() => {
                return Err(ArchiveFsError::DirectoryNotEmpty { path });
            }
            Some(_) => {}
        }

        self.touch()?;
        self.nodes.remove(&path);

        let Some((parent_path, base)) = split(&path) else {
            unreachable!("root was rejected above");
        };
        let Some(parent) = self.nodes.get_mut(parent_path) else {
            panic!("parent directory of {path} is missing from the archive file system");
        };
        let unlinked = parent
            .members
            .as_mut()
            .map(|members| members.remove(base))
            .unwrap_or(false);
        if !unlinked {
            panic!("{parent_path} does not list {base} as a member");
        }
        if parent.entry.time(AccessType::Write) != UNKNOWN {
            parent.entry.set_time(AccessType::Write, now_millis());
        }

        debug!(path = %path, "Unlinked entry");
        Ok(())
    }

    /// Set time fields of an entry to the same value
    ///
    /// Returns whether the entry supports every requested field.
    pub fn set_time<I>(&mut self, path: &str, accesses: I, time: i64) -> Result<bool>
    where
        I: IntoIterator<Item = AccessType>,
    {
        let path = canonicalize(path)?;
        if time < 0 {
            return Err(ArchiveFsError::NegativeTime { path, time });
        }
        self.check_writable(&path)?;
        if !self.nodes.contains_key(&path) {
            return Err(ArchiveFsError::NotFound { path });
        }

        self.touch()?;
        let Some(node) = self.nodes.get_mut(&path) else {
            panic!("{path} vanished while setting its time");
        };

        let mut supported = true;
        for access in accesses {
            supported &= node.entry.set_time(access, time);
        }
        Ok(supported)
    }

    /// Mark the tree touched, asking listeners first
    ///
    /// Does nothing if the tree is touched already.
    ///
    /// # Errors
    ///
    /// Returns `ReadOnlyFileSystem` for a read-only tree and `Veto` if a
    /// listener declines; the flag stays unset.
    pub fn touch(&mut self) -> Result<()> {
        self.check_writable(ROOT)?;
        if self.touched {
            return Ok(());
        }

        let listeners = self.listeners.clone();
        let event = TouchEvent {
            entries: self.nodes.len(),
        };

        for listener in &listeners {
            listener.before_touch(&event)?;
        }

        self.touched = true;
        debug!(entries = event.entries, "Archive file system touched");

        for listener in &listeners {
            listener.after_touch(&event);
        }
        Ok(())
    }

    /// Reset the touch flag after the tree has been persisted
    pub fn untouch(&mut self) {
        self.touched = false;
    }

    /// Register a listener; registering the same listener twice is a no-op
    pub fn add_touch_listener(&mut self, listener: Arc<dyn TouchListener>) {
        if !self.listeners.iter().any(|l| same_listener(l, &listener)) {
            self.listeners.push(listener);
        }
    }

    /// Remove a listener by identity, returning whether it was registered
    pub fn remove_touch_listener(&mut self, listener: &Arc<dyn TouchListener>) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|l| !same_listener(l, listener));
        self.listeners.len() != before
    }

    /// Verify the tree invariants, describing the first violation found
    pub fn check_consistency(&self) -> std::result::Result<(), String> {
        match self.nodes.get(ROOT) {
            Some(root) if root.is_directory() => {}
            _ => return Err("root is missing or not a directory".to_string()),
        }

        for (path, node) in &self.nodes {
            if let Some((parent, base)) = split(path) {
                match self.nodes.get(parent) {
                    Some(Node {
                        members: Some(members),
                        ..
                    }) => {
                        if !members.contains(base) {
                            return Err(format!("{parent} does not list member {base}"));
                        }
                    }
                    Some(_) => return Err(format!("parent of {path} is not a directory")),
                    None => return Err(format!("parent of {path} is missing")),
                }
            }

            for member in node.members.iter().flatten() {
                let child = path::join(path, member);
                if !self.nodes.contains_key(&child) {
                    return Err(format!("{path} lists missing member {member}"));
                }
            }
        }
        Ok(())
    }

    fn check_writable(&self, path: &str) -> Result<()> {
        if self.read_only {
            return Err(ArchiveFsError::ReadOnlyFileSystem {
                path: path.to_string(),
            });
        }
        Ok(())
    }
}

fn same_listener(a: &Arc<dyn TouchListener>, b: &Arc<dyn TouchListener>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
