//! Controller of one mounted archive
//!
//! Owns the archive's file system tree behind a read/write lock, one entry
//! cache per accessed path and the entry pool backing them. The tree is
//! mounted on first use. Content streams are opened after the tree lock is
//! released, so a long read or write never blocks path lookups.

use crate::core::cache::{CacheInput, CacheOutput, EntryCache};
use crate::core::config::FsConfig;
use crate::core::driver::ArchiveDriver;
use crate::core::entry::{AccessType, Entry, EntryFactory, EntryType};
use crate::core::fs::{
    ArchiveFileSystem, FsEntry, MknodOptions, SharedFactory, TouchEvent, TouchListener, Veto,
};
use crate::core::path::{canonicalize, ROOT};
use crate::core::pool::EntryPool;
use crate::core::socket::{InputSocket, OutputSocket};
use crate::error::{ArchiveFsError, Result};
use parking_lot::{
    MappedRwLockReadGuard, MappedRwLockWriteGuard, Mutex, RwLock, RwLockReadGuard,
    RwLockWriteGuard,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

type Tree<D> = ArchiveFileSystem<<D as EntryFactory>::Entry>;

/// Touch listener preparing the driver for output
struct OutputPreparation<D> {
    driver: Arc<D>,
    sync_pending: AtomicBool,
}

impl<D: ArchiveDriver> TouchListener for OutputPreparation<D> {
    fn before_touch(&self, _event: &TouchEvent) -> std::result::Result<(), Veto> {
        self.driver.prepare_output()
    }

    fn after_touch(&self, event: &TouchEvent) {
        self.sync_pending.store(true, Ordering::SeqCst);
        debug!(entries = event.entries, "Archive sync pending");
    }
}

/// Controller of one mounted archive
pub struct ArchiveController<D: ArchiveDriver> {
    driver: Arc<D>,
    config: FsConfig,
    pool: Arc<EntryPool>,
    tree: RwLock<Option<Tree<D>>>,
    caches: Mutex<HashMap<String, EntryCache>>,
    listener: Arc<OutputPreparation<D>>,
}

impl<D: ArchiveDriver> ArchiveController<D> {
    /// Create a controller; nothing is read until the first operation
    pub fn new(driver: Arc<D>, config: FsConfig) -> Result<Self> {
        config.validate()?;
        let pool = Arc::new(EntryPool::with_config(&config.pool));
        let listener = Arc::new(OutputPreparation {
            driver: Arc::clone(&driver),
            sync_pending: AtomicBool::new(false),
        });

        Ok(ArchiveController {
            driver,
            config,
            pool,
            tree: RwLock::new(None),
            caches: Mutex::new(HashMap::new()),
            listener,
        })
    }

    pub fn driver(&self) -> &Arc<D> {
        &self.driver
    }

    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    /// Entry pool shared by every cache of this archive
    pub fn pool(&self) -> &Arc<EntryPool> {
        &self.pool
    }

    /// Whether the tree has been mounted
    pub fn is_mounted(&self) -> bool {
        self.tree.read().is_some()
    }

    /// Whether the archive has changes that [`sync`](Self::sync) would persist
    pub fn is_sync_pending(&self) -> bool {
        self.listener.sync_pending.load(Ordering::SeqCst)
    }

    fn mount(&self) -> Result<Tree<D>> {
        let factory: SharedFactory<D::Entry> = self.driver.clone();

        let mut tree = if self.driver.exists() {
            let entries = self.driver.load()?;
            ArchiveFileSystem::from_entries(factory, entries, None, self.config.read_only)?
        } else if self.config.read_only {
            return Err(ArchiveFsError::NotFound {
                path: ROOT.to_string(),
            });
        } else {
            self.driver.prepare_output()?;
            let tree = ArchiveFileSystem::new_empty(factory)?;
            self.listener.sync_pending.store(true, Ordering::SeqCst);
            tree
        };

        let listener: Arc<dyn TouchListener> = self.listener.clone();
        tree.add_touch_listener(listener);
        info!(
            entries = tree.len(),
            read_only = tree.is_read_only(),
            "Mounted archive"
        );
        Ok(tree)
    }

    fn read_tree(&self) -> Result<MappedRwLockReadGuard<'_, Tree<D>>> {
        loop {
            match RwLockReadGuard::try_map(self.tree.read(), Option::as_ref) {
                Ok(tree) => return Ok(tree),
                Err(unmounted) => {
                    drop(unmounted);
                    drop(self.write_tree()?);
                }
            }
        }
    }

    fn write_tree(&self) -> Result<MappedRwLockWriteGuard<'_, Tree<D>>> {
        let mut guard = self.tree.write();
        if guard.is_none() {
            *guard = Some(self.mount()?);
        }
        match RwLockWriteGuard::try_map(guard, Option::as_mut) {
            Ok(tree) => Ok(tree),
            Err(_) => unreachable!("archive tree was mounted above"),
        }
    }

    fn cache(&self, path: &str) -> EntryCache {
        self.caches
            .lock()
            .entry(path.to_string())
            .or_insert_with(|| {
                EntryCache::new(
                    self.config.strategy,
                    Arc::clone(&self.pool),
                    Some(self.driver.input_socket(path)),
                    Some(self.driver.output_socket(path)),
                )
            })
            .clone()
    }

    /// Snapshot of the entry at `path`
    pub fn stat(&self, path: &str) -> Result<Option<FsEntry<D::Entry>>> {
        Ok(self.read_tree()?.entry(path))
    }

    /// Member names of the directory at `path`
    pub fn list(&self, path: &str) -> Result<Vec<String>> {
        let tree = self.read_tree()?;
        let entry = tree.entry(path).ok_or_else(|| ArchiveFsError::NotFound {
            path: path.to_string(),
        })?;

        match entry.members() {
            Some(members) => Ok(members.to_vec()),
            None => Err(ArchiveFsError::TypeMismatch {
                path: entry.path().to_string(),
                existing: entry.entry_type(),
                requested: EntryType::Directory,
            }),
        }
    }

    /// Create an entry, and its parents if configured to
    pub fn mknod(
        &self,
        path: &str,
        entry_type: EntryType,
        exclusive: bool,
        template: Option<&dyn Entry>,
    ) -> Result<FsEntry<D::Entry>> {
        let options = MknodOptions::new()
            .create_parents(self.config.create_parents)
            .exclusive(exclusive);
        let mut tree = self.write_tree()?;
        let link = tree.mknod(path, entry_type, options, template)?;
        link.run()
    }

    /// Remove an entry and discard its cached content
    ///
    /// The cache goes while the tree is still locked, so a file linked
    /// again at the same path starts with a fresh cache.
    pub fn unlink(&self, path: &str) -> Result<()> {
        let path = canonicalize(path)?;
        let mut tree = self.write_tree()?;
        tree.unlink(&path)?;

        let cache = self.caches.lock().remove(&path);
        if let Some(cache) = cache {
            cache.clear()?;
        }
        Ok(())
    }

    /// Set time fields of an entry, returning whether all are supported
    pub fn set_time(&self, path: &str, accesses: &[AccessType], time: i64) -> Result<bool> {
        self.write_tree()?
            .set_time(path, accesses.iter().copied(), time)
    }

    /// Open the content of a file for reading
    ///
    /// Passing the output socket of another archive as `peer` requests the
    /// raw content for a copy between archives of the same format.
    pub fn input(&self, path: &str, peer: Option<&dyn OutputSocket>) -> Result<CacheInput> {
        let path = canonicalize(path)?;
        {
            let tree = self.read_tree()?;
            match tree.entry(&path) {
                None => return Err(ArchiveFsError::NotFound { path }),
                Some(entry) if !entry.is_file() => {
                    return Err(ArchiveFsError::TypeMismatch {
                        path,
                        existing: entry.entry_type(),
                        requested: EntryType::File,
                    })
                }
                Some(_) => {}
            }
        }
        self.cache(&path).open_input(peer)
    }

    /// Open the content of a file for writing, creating the file if needed
    ///
    /// The file is only linked once its output stream is open. If opening
    /// fails, or a listener vetoes the link, the tree is left unchanged.
    pub fn output(
        &self,
        path: &str,
        template: Option<&dyn Entry>,
        peer: Option<&dyn InputSocket>,
    ) -> Result<CacheOutput> {
        if !self.config.strategy.is_writable() {
            return Err(ArchiveFsError::ReadOnlyCache);
        }
        let path = canonicalize(path)?;
        let options = MknodOptions::new().create_parents(self.config.create_parents);

        let mut tree = self.write_tree()?;
        let link = tree.mknod(&path, EntryType::File, options, template)?;
        let output = self.cache(&path).open_output(peer)?;
        link.run()?;
        Ok(output)
    }

    /// Persist pending changes
    ///
    /// Flushes and clears every cache, hands the complete entry list to the
    /// driver and resets the touched state. Caches with open streams are
    /// kept. Operations wait until the sync completes.
    pub fn sync(&self) -> Result<()> {
        let mut guard = self.tree.write();
        let Some(tree) = guard.as_mut() else {
            return Ok(());
        };

        let caches: Vec<EntryCache> = self.caches.lock().values().cloned().collect();
        let mut failure = None;
        for cache in &caches {
            if let Err(err) = cache.flush() {
                warn!(entry = %cache.target(), error = %err, "Failed to flush entry cache");
                failure.get_or_insert(err);
            }
        }
        if let Some(err) = failure {
            return Err(err);
        }

        // Caches with open streams stay, everything else is released
        let mut failure = None;
        self.caches.lock().retain(|_, cache| {
            if let Err(err) = cache.clear() {
                warn!(entry = %cache.target(), error = %err, "Failed to clear entry cache");
                failure.get_or_insert(err);
            }
            cache.buffers() > 0
        });
        if let Some(err) = failure {
            return Err(err);
        }

        if !tree.is_touched() {
            debug!(caches = caches.len(), "Archive unchanged, flushed caches only");
            return Ok(());
        }

        let entries: Vec<D::Entry> = tree
            .sorted_entries()
            .into_iter()
            .map(FsEntry::into_entry)
            .collect();
        let count = entries.len();
        self.driver.sync(entries)?;

        tree.untouch();
        self.listener.sync_pending.store(false, Ordering::SeqCst);
        info!(entries = count, caches = caches.len(), "Synced archive");
        Ok(())
    }
}

impl<D: ArchiveDriver> Drop for ArchiveController<D> {
    fn drop(&mut self) {
        if self.is_sync_pending() {
            warn!("Archive controller dropped with unsynced changes");
        }
    }
}
