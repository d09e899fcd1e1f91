// src/watch/path_utils.rs

//! Utility functions for path handling in the watchers.

use std::path::{Component, Path, PathBuf};

/// Lexically clean a path: drop `.` components, resolve `..` against
/// preceding normal components, and drop any trailing separator.
///
/// Does not touch the filesystem and does not resolve symlinks.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Render a path the way it is stored in events: forward slashes and no
/// trailing slash (except for the filesystem root itself).
pub fn normalize_path(path: &Path) -> String {
    let cleaned = clean_path(path);
    let mut s = cleaned.to_string_lossy().replace('\\', "/");
    while s.len() > 1 && s.ends_with('/') {
        s.pop();
    }
    s
}

/// Convert a path into a string relative to `root`, with forward slashes.
///
/// - First we try a direct `strip_prefix(root)`.
/// - If that fails (e.g. due to symlinks or different absolute prefixes),
///   we canonicalize both paths and try again.
///
/// Returns `None` if the path cannot be reasonably related to `root`.
pub fn relative_str(root: &Path, path: &Path) -> Option<String> {
    if let Ok(rel) = path.strip_prefix(root) {
        return Some(rel.to_string_lossy().replace('\\', "/"));
    }

    // Different absolute prefixes may name the same directory (symlinked
    // mounts, /private/var on macOS). A deleted path cannot be canonicalized,
    // so fall back to its parent.
    let root_canon = root.canonicalize().ok()?;
    if let Ok(path_canon) = path.canonicalize() {
        if let Ok(rel) = path_canon.strip_prefix(&root_canon) {
            return Some(rel.to_string_lossy().replace('\\', "/"));
        }
    }
    let parent = path.parent()?.canonicalize().ok()?;
    let rel_parent = parent.strip_prefix(&root_canon).ok()?;
    let joined = rel_parent.join(path.file_name()?);
    Some(joined.to_string_lossy().replace('\\', "/"))
}

/// True if any component of the relative path starts with a dot.
pub fn is_hidden_rel(rel: &str) -> bool {
    rel.split('/')
        .any(|part| part.starts_with('.') && part != "." && part != "..")
}
