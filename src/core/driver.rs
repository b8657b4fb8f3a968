//! Archive drivers and their registry

use crate::core::entry::EntryFactory;
use crate::core::fs::Veto;
use crate::core::socket::{InputSocket, OutputSocket};
use crate::error::{ArchiveFsError, Result};
use regex::RegexBuilder;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::trace;

/// Access to the storage of one archive
///
/// The driver creates entries in its format, enumerates the entries of an
/// existing archive, binds sockets to entry content, and persists the entry
/// list of a modified tree.
pub trait ArchiveDriver: EntryFactory + 'static {
    /// Whether the archive exists in storage
    fn exists(&self) -> bool;

    /// Entries of the existing archive
    fn load(&self) -> Result<Vec<Self::Entry>>;

    /// Socket reading the content at a canonical path
    fn input_socket(&self, path: &str) -> Arc<dyn InputSocket>;

    /// Socket replacing the content at a canonical path
    fn output_socket(&self, path: &str) -> Arc<dyn OutputSocket>;

    /// Get ready to modify the archive
    ///
    /// Called before the tree is touched for the first time. A veto keeps
    /// the tree pristine and fails the triggering operation.
    fn prepare_output(&self) -> std::result::Result<(), Veto>;

    /// Persist the complete entry list of the archive
    fn sync(&self, entries: Vec<Self::Entry>) -> Result<()>;
}

/// Maps file name suffixes to drivers
///
/// A registry without a mapping for a suffix asks its parent, unless the
/// suffix is explicitly mapped to no driver.
pub struct DriverRegistry<D: ?Sized> {
    /// `None` marks a suffix removed from the parent's mappings
    drivers: BTreeMap<String, Option<Arc<D>>>,
    parent: Option<Arc<DriverRegistry<D>>>,
}

impl<D: ?Sized> DriverRegistry<D> {
    /// Create an empty registry
    pub fn new() -> Self {
        DriverRegistry {
            drivers: BTreeMap::new(),
            parent: None,
        }
    }

    /// Create an empty registry delegating to `parent`
    pub fn with_parent(parent: Arc<DriverRegistry<D>>) -> Self {
        DriverRegistry {
            drivers: BTreeMap::new(),
            parent: Some(parent),
        }
    }

    /// Map every suffix of a `|`-separated list to `driver`
    ///
    /// Suffixes are case-insensitive; a leading dot is ignored.
    pub fn register(&mut self, suffixes: &str, driver: Arc<D>) -> Result<()> {
        for suffix in parse_suffixes(suffixes)? {
            trace!(suffix = %suffix, "Registered archive driver");
            self.drivers.insert(suffix, Some(Arc::clone(&driver)));
        }
        Ok(())
    }

    /// Map suffixes to no driver, hiding the parent's mappings
    pub fn register_null(&mut self, suffixes: &str) -> Result<()> {
        for suffix in parse_suffixes(suffixes)? {
            self.drivers.insert(suffix, None);
        }
        Ok(())
    }

    /// Driver for a suffix
    pub fn lookup(&self, suffix: &str) -> Option<Arc<D>> {
        let suffix = normalize_suffix(suffix);
        match self.drivers.get(&suffix) {
            Some(driver) => driver.clone(),
            None => self
                .parent
                .as_ref()
                .and_then(|parent| parent.lookup(&suffix)),
        }
    }

    /// Every suffix mapped to a driver, including inherited ones
    pub fn suffixes(&self) -> BTreeSet<String> {
        let mut suffixes = self
            .parent
            .as_ref()
            .map(|parent| parent.suffixes())
            .unwrap_or_default();

        for (suffix, driver) in &self.drivers {
            if driver.is_some() {
                suffixes.insert(suffix.clone());
            } else {
                suffixes.remove(suffix);
            }
        }
        suffixes
    }

    /// Find the driver for a file name by its suffix
    ///
    /// Prefers the longest matching suffix, so `a.tar.gz` selects `tar.gz`
    /// over `gz`. Returns the matched suffix with the driver.
    pub fn detect(&self, path: &str) -> Option<(String, Arc<D>)> {
        let mut suffixes: Vec<String> = self.suffixes().into_iter().collect();
        if suffixes.is_empty() {
            return None;
        }
        suffixes.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        let alternatives: Vec<String> = suffixes.iter().map(|s| regex::escape(s)).collect();
        let pattern = format!(r"\.({})$", alternatives.join("|"));
        let regex = match RegexBuilder::new(&pattern).case_insensitive(true).build() {
            Ok(regex) => regex,
            Err(err) => unreachable!("escaped suffix pattern failed to compile: {err}"),
        };

        let suffix = normalize_suffix(regex.captures(path)?.get(1)?.as_str());
        let driver = self.lookup(&suffix)?;
        Some((suffix, driver))
    }
}

impl<D: ?Sized> Default for DriverRegistry<D> {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize_suffix(suffix: &str) -> String {
    suffix.trim().trim_start_matches('.').to_lowercase()
}

fn parse_suffixes(list: &str) -> Result<Vec<String>> {
    let mut suffixes = Vec::new();
    for raw in list.split('|') {
        let suffix = normalize_suffix(raw);
        if suffix.is_empty() {
            continue;
        }
        if suffix.contains(|c: char| c == '/' || c == '\\' || c.is_whitespace()) {
            return Err(ArchiveFsError::InvalidSuffix(raw.to_string()));
        }
        suffixes.push(suffix);
    }

    if suffixes.is_empty() {
        return Err(ArchiveFsError::InvalidSuffix(list.to_string()));
    }
    Ok(suffixes)
}
