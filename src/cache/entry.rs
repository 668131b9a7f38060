use std::collections::HashMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::profile::ProfileHandle;
use crate::remote::FileTag;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryKind::File => write!(f, "file"),
            EntryKind::Directory => write!(f, "directory"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Permissions {
    #[default]
    ReadWrite,
    ReadOnly,
}

/// Where an entry lives on the remote system.
#[derive(Debug, Clone)]
pub struct EntryMetadata {
    pub profile: ProfileHandle,
    pub path: String,
}

impl EntryMetadata {
    pub fn new(profile: ProfileHandle, path: impl Into<String>) -> Self {
        EntryMetadata {
            profile,
            path: path.into(),
        }
    }

    /// Metadata for a child named `name` below this entry.
    pub fn child(&self, name: &str) -> Self {
        EntryMetadata {
            profile: self.profile.clone(),
            path: super::path_resolver::join_path(&self.path, name),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub ctime: DateTime<Utc>,
    pub mtime: DateTime<Utc>,
    pub children: HashMap<String, Entry>,
    /// Set once the remote listing has been fetched.
    pub was_accessed: bool,
    /// Absent for the root and for conflict namespace directories.
    pub metadata: Option<EntryMetadata>,
}

impl DirEntry {
    pub fn new(name: &str, metadata: Option<EntryMetadata>) -> Self {
        let now = Utc::now();
        DirEntry {
            name: name.to_string(),
            ctime: now,
            mtime: now,
            children: HashMap::new(),
            was_accessed: false,
            metadata,
        }
    }

    pub fn insert(&mut self, entry: Entry) {
        self.children.insert(entry.name().to_string(), entry);
        self.mtime = Utc::now();
    }

    pub fn remove(&mut self, name: &str) -> Option<Entry> {
        let removed = self.children.remove(name);
        if removed.is_some() {
            self.mtime = Utc::now();
        }
        removed
    }

    /// `(name, kind)` pairs for every child, sorted by name.
    pub fn listing(&self) -> Vec<(String, EntryKind)> {
        let mut listing: Vec<(String, EntryKind)> = self
            .children
            .iter()
            .map(|(name, entry)| (name.clone(), entry.kind()))
            .collect();
        listing.sort_by(|a, b| a.0.cmp(&b.0));
        listing
    }
}

#[derive(Debug, Clone)]
pub struct FileEntry {
    pub name: String,
    pub ctime: DateTime<Utc>,
    pub mtime: DateTime<Utc>,
    pub size: u64,
    pub data: Option<Bytes>,
    /// Last version tag reported by the remote store.
    pub etag: Option<String>,
    pub was_accessed: bool,
    pub binary: bool,
    /// Per-file encoding, overriding the profile's.
    pub encoding: Option<String>,
    /// Set once the remote store has been asked for the file's tag.
    pub tag_resolved: bool,
    pub metadata: Option<EntryMetadata>,
    pub permissions: Permissions,
    /// For a local entry under comparison: the content the user tried to save.
    /// For a conflict shadow entry: the remote content at conflict time.
    pub conflict_data: Option<Bytes>,
    pub is_conflict_file: bool,
    pub in_diff_view: bool,
    /// Skip the etag precondition on the next upload.
    pub force_upload: bool,
}

impl FileEntry {
    pub fn new(name: &str, metadata: Option<EntryMetadata>) -> Self {
        let now = Utc::now();
        FileEntry {
            name: name.to_string(),
            ctime: now,
            mtime: now,
            size: 0,
            data: None,
            etag: None,
            was_accessed: false,
            binary: false,
            encoding: None,
            tag_resolved: false,
            metadata,
            permissions: Permissions::ReadWrite,
            conflict_data: None,
            is_conflict_file: false,
            in_diff_view: false,
            force_upload: false,
        }
    }

    /// Replace the cached content and refresh size/mtime.
    pub fn set_data(&mut self, data: Bytes) {
        self.size = data.len() as u64;
        self.data = Some(data);
        self.mtime = Utc::now();
    }

    pub fn tag(&self) -> FileTag {
        FileTag {
            binary: self.binary,
            encoding: self.encoding.clone(),
        }
    }

    pub fn apply_tag(&mut self, tag: &FileTag) {
        self.binary = tag.binary;
        self.encoding = tag.encoding.clone();
        self.tag_resolved = true;
    }

    /// True when a read has to go to the remote store first.
    pub fn needs_fetch(&self) -> bool {
        !self.was_accessed && self.data.is_none()
    }
}

/// A node in the cached tree.
#[derive(Debug, Clone)]
pub enum Entry {
    Directory(DirEntry),
    File(FileEntry),
}

impl Entry {
    pub fn name(&self) -> &str {
        match self {
            Entry::Directory(dir) => &dir.name,
            Entry::File(file) => &file.name,
        }
    }

    pub fn set_name(&mut self, name: &str) {
        match self {
            Entry::Directory(dir) => dir.name = name.to_string(),
            Entry::File(file) => file.name = name.to_string(),
        }
    }

    pub fn kind(&self) -> EntryKind {
        match self {
            Entry::Directory(_) => EntryKind::Directory,
            Entry::File(_) => EntryKind::File,
        }
    }

    pub fn metadata(&self) -> Option<&EntryMetadata> {
        match self {
            Entry::Directory(dir) => dir.metadata.as_ref(),
            Entry::File(file) => file.metadata.as_ref(),
        }
    }

    pub fn metadata_mut(&mut self) -> Option<&mut EntryMetadata> {
        match self {
            Entry::Directory(dir) => dir.metadata.as_mut(),
            Entry::File(file) => file.metadata.as_mut(),
        }
    }

    pub fn is_conflict_file(&self) -> bool {
        matches!(self, Entry::File(file) if file.is_conflict_file)
    }

    pub fn stat(&self) -> FileStat {
        match self {
            Entry::Directory(dir) => FileStat {
                kind: EntryKind::Directory,
                ctime: dir.ctime,
                mtime: dir.mtime,
                size: dir.children.len() as u64,
                permissions: Permissions::ReadWrite,
            },
            Entry::File(file) => FileStat {
                kind: EntryKind::File,
                ctime: file.ctime,
                mtime: file.mtime,
                size: file.size,
                permissions: file.permissions,
            },
        }
    }
}

impl From<DirEntry> for Entry {
    fn from(dir: DirEntry) -> Self {
        Entry::Directory(dir)
    }
}

impl From<FileEntry> for Entry {
    fn from(file: FileEntry) -> Self {
        Entry::File(file)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FileStat {
    pub kind: EntryKind,
    pub ctime: DateTime<Utc>,
    pub mtime: DateTime<Utc>,
    pub size: u64,
    pub permissions: Permissions,
}
