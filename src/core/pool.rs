//! Pool of temporary-file scratch entries
//!
//! Every allocation creates a fresh anonymous temporary file; nothing is
//! reused. Releasing an entry deletes its file and reports failures. An entry
//! dropped without release still deletes its file, but logs a warning: that
//! path only exists to catch leaks.

use crate::core::config::PoolConfig;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{trace, warn};

/// Allocator of scratch entries
#[derive(Debug)]
pub struct EntryPool {
    directory: Option<PathBuf>,
    prefix: String,
    live: Arc<AtomicUsize>,
    allocations: AtomicU64,
}

impl EntryPool {
    /// Create a pool allocating in the system temporary directory
    pub fn new() -> Self {
        Self::with_config(&PoolConfig::default())
    }

    /// Create a pool from configuration
    pub fn with_config(config: &PoolConfig) -> Self {
        EntryPool {
            directory: config.directory.clone(),
            prefix: config.prefix.clone(),
            live: Arc::new(AtomicUsize::new(0)),
            allocations: AtomicU64::new(0),
        }
    }

    /// Allocate a new, empty scratch entry
    pub fn allocate(&self) -> io::Result<PoolEntry> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(&self.prefix);
        let file = match &self.directory {
            Some(directory) => builder.tempfile_in(directory)?,
            None => builder.tempfile()?,
        };

        self.live.fetch_add(1, Ordering::SeqCst);
        self.allocations.fetch_add(1, Ordering::Relaxed);
        trace!(path = ?file.path(), "Allocated scratch entry");

        Ok(PoolEntry {
            file: Some(file),
            live: Arc::clone(&self.live),
        })
    }

    /// Number of entries allocated and not yet released or dropped
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Number of allocations over the pool's lifetime
    pub fn allocations(&self) -> u64 {
        self.allocations.load(Ordering::Relaxed)
    }
}

impl Default for EntryPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Scratch entry backed by a temporary file
///
/// Exclusively owned by one cache buffer at a time.
#[derive(Debug)]
pub struct PoolEntry {
    file: Option<NamedTempFile>,
    live: Arc<AtomicUsize>,
}

impl PoolEntry {
    fn file(&self) -> &NamedTempFile {
        match &self.file {
            Some(file) => file,
            None => unreachable!("pool entry used after release"),
        }
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        self.file().path()
    }

    /// Current size in bytes
    pub fn size(&self) -> io::Result<u64> {
        Ok(self.file().as_file().metadata()?.len())
    }

    /// Open an independent handle for reading from the start
    pub fn reader(&self) -> io::Result<File> {
        self.file().reopen()
    }

    /// Open an independent handle for writing, truncating the content
    pub fn writer(&self) -> io::Result<File> {
        let file = self.file().reopen()?;
        file.set_len(0)?;
        Ok(file)
    }

    /// Delete the backing file
    pub fn release(mut self) -> io::Result<()> {
        match self.file.take() {
            Some(file) => {
                self.live.fetch_sub(1, Ordering::SeqCst);
                trace!(path = ?file.path(), "Released scratch entry");
                file.close()
            }
            None => Ok(()),
        }
    }
}

impl Drop for PoolEntry {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            self.live.fetch_sub(1, Ordering::SeqCst);
            warn!(path = ?file.path(), "Scratch entry dropped without release");
        }
    }
}
