//! Archive entry model
//!
//! Format drivers supply their own entry types; the tree only needs the
//! small surface defined here. [`BasicEntry`] is a format-neutral
//! implementation used by the in-memory driver.

use crate::error::{ArchiveFsError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Value of a size or time field the archive does not record
pub const UNKNOWN: i64 = -1;

/// Entry type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntryType {
    /// Regular file
    File,
    /// Directory
    Directory,
    /// Symbolic link
    Symlink,
    /// Anything else the format can store (devices, pipes, ...)
    Special,
}

/// Access type of a time field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AccessType {
    Create,
    Read,
    Write,
    Execute,
}

impl AccessType {
    /// Every access type
    pub const ALL: [AccessType; 4] = [
        AccessType::Create,
        AccessType::Read,
        AccessType::Write,
        AccessType::Execute,
    ];
}

/// Size type of a size field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SizeType {
    /// Uncompressed content size
    Data,
    /// Bytes occupied in the archive
    Storage,
}

/// Read-only view of an entry
///
/// Any entry can serve as the metadata template of a new entry, even one
/// from an archive of another format.
pub trait Entry {
    /// Entry name as stored by the format
    fn name(&self) -> &str;

    /// Entry type
    fn entry_type(&self) -> EntryType;

    /// Size in bytes, or [`UNKNOWN`]
    fn size(&self, size_type: SizeType) -> i64;

    /// Time in milliseconds since the epoch, or [`UNKNOWN`]
    fn time(&self, access: AccessType) -> i64;
}

/// Mutable, format-specific entry owned by an archive file system
pub trait ArchiveEntry: Entry + Clone + fmt::Debug + Send + Sync + 'static {
    /// Set a size field, returning `false` if the format does not record it
    fn set_size(&mut self, size_type: SizeType, value: i64) -> bool;

    /// Set a time field, returning `false` if the format does not record it
    fn set_time(&mut self, access: AccessType, value: i64) -> bool;
}

/// Creates entries for one archive format
pub trait EntryFactory: Send + Sync {
    /// Entry type produced by this factory
    type Entry: ArchiveEntry;

    /// Create an entry for the canonical `path`
    ///
    /// Metadata other than name and type is copied from `template`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPath` if the format cannot encode the name.
    fn new_entry(
        &self,
        path: &str,
        entry_type: EntryType,
        template: Option<&dyn Entry>,
    ) -> Result<Self::Entry>;
}

/// Format-neutral archive entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicEntry {
    /// Entry name
    pub name: String,

    /// Entry type
    pub entry_type: EntryType,

    /// Size fields (absent = unknown)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sizes: BTreeMap<SizeType, i64>,

    /// Time fields in epoch milliseconds (absent = unknown)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub times: BTreeMap<AccessType, i64>,
}

impl BasicEntry {
    /// Create an entry with unknown sizes and times
    pub fn new(name: impl Into<String>, entry_type: EntryType) -> Self {
        BasicEntry {
            name: name.into(),
            entry_type,
            sizes: BTreeMap::new(),
            times: BTreeMap::new(),
        }
    }

    /// Create a file entry
    pub fn file(name: impl Into<String>) -> Self {
        Self::new(name, EntryType::File)
    }

    /// Create a directory entry
    pub fn directory(name: impl Into<String>) -> Self {
        Self::new(name, EntryType::Directory)
    }

    /// Builder-style time setter
    pub fn with_time(mut self, access: AccessType, value: i64) -> Self {
        self.set_time(access, value);
        self
    }

    /// Builder-style size setter
    pub fn with_size(mut self, size_type: SizeType, value: i64) -> Self {
        self.set_size(size_type, value);
        self
    }

    /// Copy every known size and time from another entry
    fn copy_metadata(&mut self, template: &dyn Entry) {
        for size_type in [SizeType::Data, SizeType::Storage] {
            self.set_size(size_type, template.size(size_type));
        }
        for access in AccessType::ALL {
            self.set_time(access, template.time(access));
        }
    }
}

impl Entry for BasicEntry {
    fn name(&self) -> &str {
        &self.name
    }

    fn entry_type(&self) -> EntryType {
        self.entry_type
    }

    fn size(&self, size_type: SizeType) -> i64 {
        self.sizes.get(&size_type).copied().unwrap_or(UNKNOWN)
    }

    fn time(&self, access: AccessType) -> i64 {
        self.times.get(&access).copied().unwrap_or(UNKNOWN)
    }
}

impl ArchiveEntry for BasicEntry {
    fn set_size(&mut self, size_type: SizeType, value: i64) -> bool {
        if value < 0 {
            self.sizes.remove(&size_type);
        } else {
            self.sizes.insert(size_type, value);
        }
        true
    }

    fn set_time(&mut self, access: AccessType, value: i64) -> bool {
        if value < 0 {
            self.times.remove(&access);
        } else {
            self.times.insert(access, value);
        }
        true
    }
}

/// Factory for [`BasicEntry`]
///
/// Stores names relative to the archive root, with a trailing separator for
/// directories, the way most archive formats do.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicEntryFactory;

impl EntryFactory for BasicEntryFactory {
    type Entry = BasicEntry;

    fn new_entry(
        &self,
        path: &str,
        entry_type: EntryType,
        template: Option<&dyn Entry>,
    ) -> Result<BasicEntry> {
        if path.contains('\0') {
            return Err(ArchiveFsError::InvalidPath(path.replace('\0', "\\0")));
        }

        let mut name = path.trim_start_matches('/').to_string();
        if entry_type == EntryType::Directory && !name.is_empty() {
            name.push('/');
        }

        let mut entry = BasicEntry::new(name, entry_type);
        if let Some(template) = template {
            entry.copy_metadata(template);
        }
        Ok(entry)
    }
}

/// Current time in epoch milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
