//! # archivefs - Archive File System Engine
//!
//! `archivefs` presents the entries of an archive file (ZIP, TAR and the
//! like) as a mutable directory tree:
//!
//! - **File system tree** keyed by canonical paths, with ghost directories
//!   for parents the archive never listed
//! - **Link transactions** that validate first and commit every missing
//!   ancestor together with the target
//! - **Touch notifications** so the owner can prepare output, or veto it,
//!   before the first modification
//! - **Entry caches** buffering content in scratch files with `READ_ONLY`,
//!   `WRITE_THROUGH` and `WRITE_BACK` strategies
//!
//! Archive formats plug in through [`ArchiveDriver`]; [`MemoryArchive`] is
//! the in-memory reference driver.
//!
//! ## Quick Start
//!
//! ```rust
//! use archivefs::{ArchiveController, FsConfig, MemoryArchive, Result};
//! use std::io::Write;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<()> {
//! let archive = MemoryArchive::new();
//! let controller = ArchiveController::new(Arc::new(archive.clone()), FsConfig::default())?;
//!
//! // Parent directories are created on demand
//! let mut output = controller.output("/docs/readme.txt", None, None)?;
//! output.write_all(b"Hello, archive!")?;
//! output.close()?;
//!
//! assert_eq!(controller.list("/docs")?, vec!["readme.txt"]);
//! let content = controller.input("/docs/readme.txt", None)?.read_all()?;
//! assert_eq!(content, b"Hello, archive!");
//!
//! // Write-back content and the entry list reach the archive on sync
//! controller.sync()?;
//! assert_eq!(archive.content("/docs/readme.txt").unwrap(), b"Hello, archive!");
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod error;

pub use crate::core::{
    cache::{CacheInput, CacheOutput, EntryCache},
    config::{CacheStrategy, FsConfig, PoolConfig},
    controller::ArchiveController,
    driver::{ArchiveDriver, DriverRegistry},
    entry::{
        AccessType, ArchiveEntry, BasicEntry, BasicEntryFactory, Entry, EntryFactory, EntryType,
        SizeType, UNKNOWN,
    },
    fs::{ArchiveFileSystem, FsEntry, MknodOptions, PathLink, TouchEvent, TouchListener, Veto},
    memory::MemoryArchive,
    pool::{EntryPool, PoolEntry},
    socket::{InputSocket, OutputSocket, OutputStream},
};
pub use crate::error::{ArchiveFsError, Result};
