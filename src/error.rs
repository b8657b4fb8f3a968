//! Error types for archive file system operations

use crate::core::entry::EntryType;
use crate::core::fs::Veto;
use thiserror::Error;

/// Archive file system result type
pub type Result<T> = std::result::Result<T, ArchiveFsError>;

/// Archive file system errors
///
/// Broken tree invariants are not represented here: they indicate a bug in
/// the engine and abort the operation with a panic instead.
#[derive(Error, Debug)]
pub enum ArchiveFsError {
    /// Exclusive creation requested for a path that is already taken
    #[error("Entry already exists: {path}")]
    EntryExists { path: String },

    /// Directories are never replaced by a link
    #[error("Cannot replace directory: {path}")]
    DirectoryExists { path: String },

    /// Existing entry has a different type than the requested one
    #[error("Entry type mismatch at {path}: exists as {existing:?}, requested {requested:?}")]
    TypeMismatch {
        path: String,
        existing: EntryType,
        requested: EntryType,
    },

    /// Parent path exists but is not a directory
    #[error("Parent entry is not a directory: {path}")]
    ParentNotDirectory { path: String },

    /// Parent directory is missing and auto-creation is disabled
    #[error("Missing parent directory: {path}")]
    MissingParent { path: String },

    /// No entry at the path
    #[error("Entry not found: {path}")]
    NotFound { path: String },

    /// Directory still has members
    #[error("Directory not empty: {path}")]
    DirectoryNotEmpty { path: String },

    /// The root directory can never be unlinked
    #[error("Cannot unlink the root directory")]
    RootUnlink,

    /// Only files and directories can be created
    #[error("Unsupported entry type {entry_type:?}: {path}")]
    UnsupportedType { path: String, entry_type: EntryType },

    /// Path cannot be represented by the archive format
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Access times must not be negative
    #[error("Negative time {time} for entry: {path}")]
    NegativeTime { path: String, time: i64 },

    /// Tree was mounted read-only
    #[error("Read-only file system: {path}")]
    ReadOnlyFileSystem { path: String },

    /// A touch listener declined the transition to the touched state
    #[error("Modification vetoed: {reason}")]
    Veto { reason: String },

    /// Write path requested on a cache configured as read-only
    #[error("Entry cache is read-only")]
    ReadOnlyCache,

    /// Cache has no input socket bound
    #[error("Entry cache has no input socket")]
    NoInput,

    /// Cache has no output socket bound
    #[error("Entry cache has no output socket")]
    NoOutput,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// I/O error followed by a second failure while cleaning up after it
    #[error("I/O error: {source} (suppressed: {suppressed})")]
    Suppressed {
        #[source]
        source: std::io::Error,
        suppressed: std::io::Error,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Invalid driver suffix list
    #[error("Invalid suffix: {0}")]
    InvalidSuffix(String),
}

impl From<Veto> for ArchiveFsError {
    fn from(veto: Veto) -> Self {
        ArchiveFsError::Veto {
            reason: veto.reason().to_string(),
        }
    }
}

impl ArchiveFsError {
    /// Attach a cleanup failure to a primary I/O failure
    ///
    /// The primary failure always stays the reported source.
    pub fn with_suppressed(primary: ArchiveFsError, suppressed: Option<std::io::Error>) -> Self {
        match (primary, suppressed) {
            (ArchiveFsError::Io(source), Some(suppressed)) => {
                ArchiveFsError::Suppressed { source, suppressed }
            }
            (primary, _) => primary,
        }
    }

    /// Path of the entry the error refers to, if any
    pub fn path(&self) -> Option<&str> {
        match self {
            ArchiveFsError::EntryExists { path }
            | ArchiveFsError::DirectoryExists { path }
            | ArchiveFsError::TypeMismatch { path, .. }
            | ArchiveFsError::ParentNotDirectory { path }
            | ArchiveFsError::MissingParent { path }
            | ArchiveFsError::NotFound { path }
            | ArchiveFsError::DirectoryNotEmpty { path }
            | ArchiveFsError::UnsupportedType { path, .. }
            | ArchiveFsError::NegativeTime { path, .. }
            | ArchiveFsError::ReadOnlyFileSystem { path } => Some(path),
            ArchiveFsError::InvalidPath(path) => Some(path),
            ArchiveFsError::RootUnlink => Some(crate::core::path::ROOT),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_suppressed_keeps_primary() {
        let primary = ArchiveFsError::Io(io::Error::new(io::ErrorKind::Other, "flush failed"));
        let err = ArchiveFsError::with_suppressed(
            primary,
            Some(io::Error::new(io::ErrorKind::Other, "release failed")),
        );

        match err {
            ArchiveFsError::Suppressed { source, suppressed } => {
                assert_eq!(source.to_string(), "flush failed");
                assert_eq!(suppressed.to_string(), "release failed");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_suppressed_without_cleanup_failure() {
        let primary = ArchiveFsError::Io(io::Error::new(io::ErrorKind::Other, "flush failed"));
        let err = ArchiveFsError::with_suppressed(primary, None);
        assert!(matches!(err, ArchiveFsError::Io(_)));
    }

    #[test]
    fn test_error_path() {
        let err = ArchiveFsError::DirectoryNotEmpty {
            path: "/a".to_string(),
        };
        assert_eq!(err.path(), Some("/a"));
        assert_eq!(err.to_string(), "Directory not empty: /a");
        assert_eq!(ArchiveFsError::RootUnlink.path(), Some("/"));
        assert_eq!(ArchiveFsError::NoInput.path(), None);
    }
}
