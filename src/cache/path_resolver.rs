//! Walks absolute virtual paths through the cached tree.
//!
//! Paths are `/`-delimited; empty segments are ignored, so `/a//b/` and
//! `/a/b` resolve to the same entry. Strict lookups fail with `NotFound`,
//! silent lookups return `None`.

use crate::cache::entry::{DirEntry, Entry, FileEntry};
use crate::error::{MirrorError, Result};

pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Canonical form: leading slash, no trailing or duplicate slashes.
pub fn normalize(path: &str) -> String {
    let joined = segments(path).collect::<Vec<_>>().join("/");
    format!("/{}", joined)
}

pub fn basename(path: &str) -> &str {
    segments(path).last().unwrap_or("")
}

/// The parent of `path`; the parent of `/` is `/`.
pub fn dirname(path: &str) -> String {
    let parts: Vec<&str> = segments(path).collect();
    match parts.split_last() {
        Some((_, parents)) => format!("/{}", parents.join("/")),
        None => "/".to_string(),
    }
}

pub fn join_path(parent: &str, name: &str) -> String {
    let name = name.trim_matches('/');
    if parent.trim_end_matches('/').is_empty() {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent.trim_end_matches('/'), name)
    }
}

pub fn lookup<'a>(root: &'a Entry, path: &str) -> Result<&'a Entry> {
    lookup_silent(root, path).ok_or_else(|| MirrorError::NotFound(path.to_string()))
}

pub fn lookup_silent<'a>(root: &'a Entry, path: &str) -> Option<&'a Entry> {
    let mut entry = root;
    for part in segments(path) {
        entry = match entry {
            Entry::Directory(dir) => dir.children.get(part)?,
            Entry::File(_) => return None,
        };
    }
    tracing::trace!("lookup: resolved {}", path);
    Some(entry)
}

pub fn lookup_mut<'a>(root: &'a mut Entry, path: &str) -> Result<&'a mut Entry> {
    lookup_mut_silent(root, path).ok_or_else(|| MirrorError::NotFound(path.to_string()))
}

pub fn lookup_mut_silent<'a>(root: &'a mut Entry, path: &str) -> Option<&'a mut Entry> {
    let mut entry = root;
    for part in segments(path) {
        entry = match entry {
            Entry::Directory(dir) => dir.children.get_mut(part)?,
            Entry::File(_) => return None,
        };
    }
    Some(entry)
}

pub fn lookup_file<'a>(root: &'a Entry, path: &str) -> Result<&'a FileEntry> {
    match lookup(root, path)? {
        Entry::File(file) => Ok(file),
        Entry::Directory(_) => Err(MirrorError::IsADirectory(path.to_string())),
    }
}

pub fn lookup_file_mut<'a>(root: &'a mut Entry, path: &str) -> Result<&'a mut FileEntry> {
    match lookup_mut(root, path)? {
        Entry::File(file) => Ok(file),
        Entry::Directory(_) => Err(MirrorError::IsADirectory(path.to_string())),
    }
}

pub fn lookup_dir<'a>(root: &'a Entry, path: &str) -> Result<&'a DirEntry> {
    match lookup(root, path)? {
        Entry::Directory(dir) => Ok(dir),
        Entry::File(_) => Err(MirrorError::NotADirectory(path.to_string())),
    }
}

pub fn lookup_dir_mut<'a>(root: &'a mut Entry, path: &str) -> Result<&'a mut DirEntry> {
    match lookup_mut(root, path)? {
        Entry::Directory(dir) => Ok(dir),
        Entry::File(_) => Err(MirrorError::NotADirectory(path.to_string())),
    }
}

pub fn lookup_parent<'a>(root: &'a Entry, path: &str) -> Result<&'a DirEntry> {
    lookup_dir(root, &dirname(path))
}

pub fn lookup_parent_mut<'a>(root: &'a mut Entry, path: &str) -> Result<&'a mut DirEntry> {
    lookup_dir_mut(root, &dirname(path))
}

/// Replace the leading `from` of `path` with `to`, respecting segment
/// boundaries. Returns `None` when `path` is not `from` or below it.
pub fn rewrite_prefix(path: &str, from: &str, to: &str) -> Option<String> {
    let from = from.trim_end_matches('/');
    let to = to.trim_end_matches('/');
    if path == from || (from.is_empty() && path == "/") {
        return Some(if to.is_empty() { "/".to_string() } else { to.to_string() });
    }
    let rest = path.strip_prefix(from)?;
    if !rest.starts_with('/') {
        return None;
    }
    Some(format!("{}{}", to, rest))
}

/// Move the remote path of `entry` and every descendant from the `from`
/// prefix to the `to` prefix. Entries without metadata are left alone.
pub fn rebase_remote_paths(entry: &mut Entry, from: &str, to: &str) {
    if let Some(meta) = entry.metadata_mut() {
        match rewrite_prefix(&meta.path, from, to) {
            Some(path) => meta.path = path,
            None => tracing::warn!(
                "rebase: {} is not below {}, leaving it unchanged",
                meta.path,
                from
            ),
        }
    }
    if let Entry::Directory(dir) = entry {
        for child in dir.children.values_mut() {
            rebase_remote_paths(child, from, to);
        }
    }
}
