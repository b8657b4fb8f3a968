//! In-memory archive
//!
//! Keeps entry content and the persisted entry list in memory. Serves as the
//! reference driver for the controller and for tests: it counts stream opens
//! and can be switched read-only or told to fail writes.

use crate::core::driver::ArchiveDriver;
use crate::core::entry::{
    now_millis, AccessType, BasicEntry, BasicEntryFactory, Entry, EntryFactory, EntryType,
    SizeType,
};
use crate::core::fs::Veto;
use crate::core::path::canonicalize;
use crate::core::socket::{InputSocket, OutputSocket, OutputStream};
use crate::error::Result;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::io::{self, Cursor, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Default)]
struct Stored {
    /// Persisted entry list, `None` until the archive exists
    entries: Option<Vec<BasicEntry>>,
    /// Content by canonical path
    contents: HashMap<String, Vec<u8>>,
}

#[derive(Debug, Default)]
struct Store {
    stored: Mutex<Stored>,
    read_only: AtomicBool,
    fail_writes: AtomicBool,
    reads: AtomicU64,
    raw_reads: AtomicU64,
    writes: AtomicU64,
    syncs: AtomicU64,
}

/// Archive kept in memory
///
/// Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryArchive {
    store: Arc<Store>,
}

impl MemoryArchive {
    /// Create a handle on an archive that does not exist yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file entry with content, creating the archive if needed
    pub fn add_file(&self, name: &str, content: impl Into<Vec<u8>>) -> Result<()> {
        let path = canonicalize(name)?;
        let content = content.into();
        let entry = BasicEntryFactory
            .new_entry(&path, EntryType::File, None)?
            .with_size(SizeType::Data, content.len() as i64)
            .with_time(AccessType::Write, now_millis());

        let mut stored = self.store.stored.lock();
        let entries = stored.entries.get_or_insert_with(Vec::new);
        entries.retain(|existing| existing.name() != entry.name());
        entries.push(entry);
        stored.contents.insert(path, content);
        Ok(())
    }

    /// Add an entry without content, creating the archive if needed
    pub fn add_entry(&self, entry: BasicEntry) {
        let mut stored = self.store.stored.lock();
        stored.entries.get_or_insert_with(Vec::new).push(entry);
    }

    /// Content stored at a canonical path
    pub fn content(&self, path: &str) -> Option<Vec<u8>> {
        self.store.stored.lock().contents.get(path).cloned()
    }

    /// Persisted entry list, `None` if the archive does not exist
    pub fn stored_entries(&self) -> Option<Vec<BasicEntry>> {
        self.store.stored.lock().entries.clone()
    }

    /// Reject output preparation from now on
    pub fn set_read_only(&self, read_only: bool) {
        self.store.read_only.store(read_only, Ordering::SeqCst);
    }

    /// Make every output stream fail on close
    pub fn fail_writes(&self, fail: bool) {
        self.store.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of streams opened for decoded reading
    pub fn reads(&self) -> u64 {
        self.store.reads.load(Ordering::SeqCst)
    }

    /// Number of streams opened for raw reading
    pub fn raw_reads(&self) -> u64 {
        self.store.raw_reads.load(Ordering::SeqCst)
    }

    /// Number of completed output streams
    pub fn writes(&self) -> u64 {
        self.store.writes.load(Ordering::SeqCst)
    }

    /// Number of entry lists persisted
    pub fn syncs(&self) -> u64 {
        self.store.syncs.load(Ordering::SeqCst)
    }
}

impl EntryFactory for MemoryArchive {
    type Entry = BasicEntry;

    fn new_entry(
        &self,
        path: &str,
        entry_type: EntryType,
        template: Option<&dyn Entry>,
    ) -> Result<BasicEntry> {
        BasicEntryFactory.new_entry(path, entry_type, template)
    }
}

impl ArchiveDriver for MemoryArchive {
    fn exists(&self) -> bool {
        self.store.stored.lock().entries.is_some()
    }

    fn load(&self) -> Result<Vec<BasicEntry>> {
        Ok(self.stored_entries().unwrap_or_default())
    }

    fn input_socket(&self, path: &str) -> Arc<dyn InputSocket> {
        Arc::new(MemoryInput {
            store: Arc::clone(&self.store),
            path: path.to_string(),
        })
    }

    fn output_socket(&self, path: &str) -> Arc<dyn OutputSocket> {
        Arc::new(MemoryOutput {
            store: Arc::clone(&self.store),
            path: path.to_string(),
        })
    }

    fn prepare_output(&self) -> std::result::Result<(), Veto> {
        if self.store.read_only.load(Ordering::SeqCst) {
            return Err(Veto::new("archive storage is read-only"));
        }
        Ok(())
    }

    fn sync(&self, entries: Vec<BasicEntry>) -> Result<()> {
        let mut paths = BTreeSet::new();
        for entry in &entries {
            paths.insert(canonicalize(entry.name())?);
        }

        let mut stored = self.store.stored.lock();
        let before = stored.contents.len();
        stored.contents.retain(|path, _| paths.contains(path));
        let pruned = before - stored.contents.len();

        let count = entries.len();
        stored.entries = Some(entries);
        self.store.syncs.fetch_add(1, Ordering::SeqCst);
        info!(entries = count, pruned, "Persisted archive entry list");
        Ok(())
    }
}

struct MemoryInput {
    store: Arc<Store>,
    path: String,
}

impl InputSocket for MemoryInput {
    fn target(&self) -> &str {
        &self.path
    }

    fn stream(&self, peer: Option<&dyn OutputSocket>) -> io::Result<Box<dyn Read + Send>> {
        let content = self.store.stored.lock().contents.get(&self.path).cloned();
        let Some(content) = content else {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no content stored for {}", self.path),
            ));
        };

        let counter = match peer {
            Some(_) => &self.store.raw_reads,
            None => &self.store.reads,
        };
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(Cursor::new(content)))
    }
}

struct MemoryOutput {
    store: Arc<Store>,
    path: String,
}

impl OutputSocket for MemoryOutput {
    fn target(&self) -> &str {
        &self.path
    }

    fn stream(&self, _peer: Option<&dyn InputSocket>) -> io::Result<Box<dyn OutputStream>> {
        Ok(Box::new(MemoryStream {
            store: Arc::clone(&self.store),
            path: self.path.clone(),
            content: Vec::new(),
        }))
    }
}

struct MemoryStream {
    store: Arc<Store>,
    path: String,
    content: Vec<u8>,
}

impl Write for MemoryStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.content.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl OutputStream for MemoryStream {
    fn close(self: Box<Self>) -> io::Result<()> {
        if self.store.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("write of {} failed", self.path),
            ));
        }

        let MemoryStream {
            store,
            path,
            content,
        } = *self;
        debug!(path = %path, bytes = content.len(), "Stored entry content");
        store.stored.lock().contents.insert(path, content);
        store.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_archive_does_not_exist() {
        let archive = MemoryArchive::new();
        assert!(!archive.exists());
        assert!(archive.load().unwrap().is_empty());
    }

    #[test]
    fn test_add_file_creates_archive() {
        let archive = MemoryArchive::new();
        archive.add_file("dir/a.txt", b"hello".to_vec()).unwrap();
        archive.add_file("/dir/a.txt", b"again".to_vec()).unwrap();

        assert!(archive.exists());
        let entries = archive.load().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name(), "dir/a.txt");
        assert_eq!(entries[0].size(SizeType::Data), 5);
        assert_eq!(archive.content("/dir/a.txt").unwrap(), b"again");
    }

    #[test]
    fn test_sockets_count_reads_and_writes() {
        let archive = MemoryArchive::new();
        archive.add_file("a", b"abc".to_vec()).unwrap();

        let input = archive.input_socket("/a");
        let mut content = String::new();
        input.stream(None).unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "abc");
        assert_eq!(archive.reads(), 1);

        let output = archive.output_socket("/b");
        input.stream(Some(output.as_ref())).unwrap();
        assert_eq!(archive.raw_reads(), 1);

        let mut stream = output.stream(None).unwrap();
        stream.write_all(b"written").unwrap();
        assert!(archive.content("/b").is_none());
        stream.close().unwrap();
        assert_eq!(archive.content("/b").unwrap(), b"written");
        assert_eq!(archive.writes(), 1);
    }

    #[test]
    fn test_missing_content() {
        let archive = MemoryArchive::new();
        let err = archive.input_socket("/nothing").stream(None).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_failing_writes_keep_old_content() {
        let archive = MemoryArchive::new();
        archive.add_file("a", b"old".to_vec()).unwrap();
        archive.fail_writes(true);

        let mut stream = archive.output_socket("/a").stream(None).unwrap();
        stream.write_all(b"new").unwrap();
        assert!(stream.close().is_err());
        assert_eq!(archive.content("/a").unwrap(), b"old");
    }

    #[test]
    fn test_read_only_vetoes_output() {
        let archive = MemoryArchive::new();
        assert!(archive.prepare_output().is_ok());
        archive.set_read_only(true);
        assert_eq!(
            archive.prepare_output().unwrap_err().reason(),
            "archive storage is read-only"
        );
    }

    #[test]
    fn test_sync_prunes_unlisted_content() {
        let archive = MemoryArchive::new();
        archive.add_file("keep", b"1".to_vec()).unwrap();
        archive.add_file("drop", b"2".to_vec()).unwrap();

        archive.sync(vec![BasicEntry::file("keep")]).unwrap();
        assert!(archive.content("/keep").is_some());
        assert!(archive.content("/drop").is_none());
        assert_eq!(archive.syncs(), 1);
        assert_eq!(archive.stored_entries().unwrap().len(), 1);
    }
}
