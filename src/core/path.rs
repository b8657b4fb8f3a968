//! Path normalization for archive entry names
//!
//! Archive formats store entry names in many shapes: relative or absolute,
//! with `\` separators written by other platforms, with `.` and `..`
//! segments, with trailing separators marking directories. The tree keys
//! every node by one canonical form: `/`-rooted, `/`-separated, no `.` or
//! `..` segments and no trailing separator except for the root itself.

use crate::error::{ArchiveFsError, Result};

/// Separator of canonical paths
pub const SEPARATOR: char = '/';

/// Canonical path of the root directory
pub const ROOT: &str = "/";

/// Separator some archivers write on other platforms
const FOREIGN_SEPARATOR: char = '\\';

/// Collapse `.`, `..` and redundant separators
///
/// A `..` which would climb above the root of an absolute path is dropped.
/// Leading `..` segments of a relative path are kept. A trailing separator
/// is preserved so directory names keep their marker.
///
/// # Examples
///
/// ```
/// use archivefs::core::path::normalize;
///
/// assert_eq!(normalize("/a/./b//c/../d", '/'), "/a/b/d");
/// assert_eq!(normalize("/../a", '/'), "/a");
/// assert_eq!(normalize("../a/b/..", '/'), "../a");
/// assert_eq!(normalize("a/b/", '/'), "a/b/");
/// ```
pub fn normalize(path: &str, separator: char) -> String {
    let absolute = path.starts_with(separator);
    let trailing = path.len() > 1 && path.ends_with(separator);

    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split(separator) {
        match segment {
            "" | "." => {}
            ".." => match segments.last() {
                Some(&last) if last != ".." => {
                    segments.pop();
                }
                _ if absolute => {}
                _ => segments.push(".."),
            },
            name => segments.push(name),
        }
    }

    let mut normalized = String::with_capacity(path.len());
    if absolute {
        normalized.push(separator);
    }
    normalized.push_str(&segments.join(&separator.to_string()));
    if trailing && !segments.is_empty() {
        normalized.push(separator);
    }
    normalized
}

/// Strip trailing separators, keeping a lone root separator intact
pub fn cut_trailing_separators(path: &str, separator: char) -> &str {
    let cut = path.trim_end_matches(separator);
    if cut.is_empty() && path.starts_with(separator) {
        &path[..separator.len_utf8()]
    } else {
        cut
    }
}

/// Convert an archive entry name into its canonical tree path
///
/// # Errors
///
/// Returns `InvalidPath` for names containing NUL characters, which no
/// archive format can encode.
///
/// # Examples
///
/// ```
/// use archivefs::core::path::canonicalize;
///
/// assert_eq!(canonicalize("dir\\sub/./file.txt").unwrap(), "/dir/sub/file.txt");
/// assert_eq!(canonicalize("dir/").unwrap(), "/dir");
/// assert_eq!(canonicalize("").unwrap(), "/");
/// ```
pub fn canonicalize(name: &str) -> Result<String> {
    if name.contains('\0') {
        return Err(ArchiveFsError::InvalidPath(name.replace('\0', "\\0")));
    }

    let name = name.replace(FOREIGN_SEPARATOR, "/");
    let mut absolute = String::with_capacity(name.len() + 1);
    absolute.push(SEPARATOR);
    absolute.push_str(&name);

    let normalized = normalize(&absolute, SEPARATOR);
    Ok(cut_trailing_separators(&normalized, SEPARATOR).to_string())
}

/// Whether the canonical path names the root directory
pub fn is_root(path: &str) -> bool {
    path == ROOT
}

/// Split a canonical path into its parent path and base name
///
/// Returns `None` for the root, which has no parent.
pub fn split(path: &str) -> Option<(&str, &str)> {
    if is_root(path) {
        return None;
    }
    match path.rfind(SEPARATOR) {
        Some(0) => Some((ROOT, &path[1..])),
        Some(idx) => Some((&path[..idx], &path[idx + 1..])),
        None => Some((ROOT, path)),
    }
}

/// Parent path of a canonical path
pub fn parent(path: &str) -> Option<&str> {
    split(path).map(|(parent, _)| parent)
}

/// Last segment of a canonical path (empty for the root)
pub fn base_name(path: &str) -> &str {
    split(path).map(|(_, base)| base).unwrap_or("")
}

/// Join a canonical directory path and a member name
pub fn join(parent: &str, base: &str) -> String {
    if is_root(parent) {
        format!("{}{}", ROOT, base)
    } else {
        format!("{}{}{}", parent, SEPARATOR, base)
    }
}
