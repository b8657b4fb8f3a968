//! Prepared creation of a tree node

use super::{ArchiveFileSystem, FsEntry, Node};
use crate::core::entry::{now_millis, AccessType, ArchiveEntry, UNKNOWN};
use crate::core::path;
use crate::error::Result;
use tracing::debug;

/// Pending creation of one entry plus its missing ancestor directories
///
/// Built by [`ArchiveFileSystem::mknod`], which has already validated the
/// request. The link holds the tree's mutable borrow, so nothing can change
/// the tree between validation and [`run`](PathLink::run). Dropping the link
/// without running it leaves the tree untouched.
#[must_use = "a path link does nothing unless it is run"]
pub struct PathLink<'a, E: ArchiveEntry> {
    fs: &'a mut ArchiveFileSystem<E>,
    /// Lowest existing ancestor directory
    anchor: String,
    /// New nodes, outermost ancestor first, target last
    pending: Vec<(String, E)>,
}

impl<'a, E: ArchiveEntry> PathLink<'a, E> {
    pub(super) fn new(
        fs: &'a mut ArchiveFileSystem<E>,
        anchor: String,
        pending: Vec<(String, E)>,
    ) -> Self {
        assert!(!pending.is_empty(), "path link without target");
        PathLink {
            fs,
            anchor,
            pending,
        }
    }

    /// Snapshot of the entry this link creates
    pub fn target(&self) -> FsEntry<E> {
        let Some((path, entry)) = self.pending.last() else {
            unreachable!("path link without target");
        };
        Node::new(entry.clone()).snapshot(path)
    }

    /// Paths of every node this link creates, outermost first
    pub fn pending_paths(&self) -> impl Iterator<Item = &str> {
        self.pending.iter().map(|(path, _)| path.as_str())
    }

    /// Commit the link
    ///
    /// Touches the tree, then links every pending node into its parent from
    /// the outermost down to the target. A parent whose member set grows gets
    /// a new write time unless its write time is unknown. Created nodes get a
    /// write time if they have none. All of these share one timestamp.
    ///
    /// # Errors
    ///
    /// Returns `Veto` if a touch listener declines; the tree is unchanged.
    pub fn run(self) -> Result<FsEntry<E>> {
        let PathLink {
            fs,
            anchor,
            pending,
        } = self;

        fs.touch()?;

        let mut now = None;
        let mut stamp = || *now.get_or_insert_with(now_millis);
        let created = pending.len();

        let mut parent_path = anchor;
        for (path, entry) in pending {
            let Some(parent) = fs.nodes.get_mut(&parent_path) else {
                panic!("parent directory {parent_path} vanished during link");
            };
            let Some(members) = parent.members.as_mut() else {
                panic!("parent {parent_path} of {path} is not a directory");
            };

            let added = members.insert(path::base_name(&path).to_string());
            if added && parent.entry.time(AccessType::Write) != UNKNOWN {
                parent.entry.set_time(AccessType::Write, stamp());
            }

            let mut entry = entry;
            if entry.time(AccessType::Write) == UNKNOWN {
                entry.set_time(AccessType::Write, stamp());
            }
            fs.nodes.insert(path.clone(), Node::new(entry));
            parent_path = path;
        }

        let Some(target) = fs.nodes.get(&parent_path) else {
            panic!("linked entry {parent_path} is missing");
        };

        debug!(path = %parent_path, created, "Linked entry");
        Ok(target.snapshot(&parent_path))
    }
}
