//! Configuration of mounted archives
//!
//! Loaded from TOML:
//!
//! ```toml
//! strategy = "WRITE_BACK"
//! create_parents = true
//! read_only = false
//!
//! [pool]
//! directory = "/var/tmp"
//! prefix = ".scratch-"
//! ```

use crate::error::{ArchiveFsError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default prefix of scratch file names
pub const DEFAULT_POOL_PREFIX: &str = ".archivefs-";

/// Output policy of an entry cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CacheStrategy {
    /// Writing through the cache is not allowed
    ReadOnly,
    /// Committed writes reach the sink before the commit returns
    WriteThrough,
    /// Committed writes reach the sink on the next flush
    #[default]
    WriteBack,
}

impl CacheStrategy {
    pub fn is_writable(self) -> bool {
        self != CacheStrategy::ReadOnly
    }
}

/// Entry pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Directory for scratch files (system temporary directory if unset)
    pub directory: Option<PathBuf>,

    /// File name prefix of scratch files
    pub prefix: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            directory: None,
            prefix: DEFAULT_POOL_PREFIX.to_string(),
        }
    }
}

impl PoolConfig {
    fn validate(&self) -> Result<()> {
        if self.prefix.is_empty() {
            return Err(ArchiveFsError::Config(
                "pool prefix cannot be empty".to_string(),
            ));
        }
        if self.prefix.contains(|c| c == '/' || c == '\\') {
            return Err(ArchiveFsError::Config(format!(
                "pool prefix '{}' cannot contain a path separator",
                self.prefix
            )));
        }
        Ok(())
    }
}

/// Configuration of one mounted archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    /// Output policy of entry caches
    pub strategy: CacheStrategy,

    /// Scratch storage
    pub pool: PoolConfig,

    /// Create missing parent directories when writing entries
    pub create_parents: bool,

    /// Mount the archive read-only
    pub read_only: bool,
}

impl Default for FsConfig {
    fn default() -> Self {
        FsConfig {
            strategy: CacheStrategy::default(),
            pool: PoolConfig::default(),
            create_parents: true,
            read_only: false,
        }
    }
}

impl FsConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: FsConfig =
            toml::from_str(source).map_err(|e| ArchiveFsError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Serialize to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| ArchiveFsError::Config(e.to_string()))
    }

    /// Check value constraints
    pub fn validate(&self) -> Result<()> {
        if self.read_only && self.strategy.is_writable() {
            return Err(ArchiveFsError::Config(format!(
                "read-only archives need the READ_ONLY strategy, got {:?}",
                self.strategy
            )));
        }
        self.pool.validate()
    }

    /// Read-only configuration
    pub fn read_only() -> Self {
        FsConfig {
            strategy: CacheStrategy::ReadOnly,
            read_only: true,
            ..Default::default()
        }
    }

    pub fn with_strategy(mut self, strategy: CacheStrategy) -> Self {
        self.strategy = strategy;
        self
    }
}
