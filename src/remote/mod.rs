//! The boundary to the remote store.
//!
//! Every call is made on behalf of a [`Profile`] against a remote path
//! (leading slash, `/` is the profile's top level).

pub mod local;
pub mod memory;

pub use local::LocalDirRemote;
pub use memory::MemoryRemote;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

use crate::cache::entry::EntryKind;
use crate::error::{RemoteError, RemoteResult};
use crate::profile::Profile;

/// One item of a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteItem {
    pub name: String,
    pub kind: EntryKind,
    /// Unix-style mode string, e.g. `drwxr-xr-x`.
    pub mode: Option<String>,
    pub size: Option<u64>,
    pub mtime: Option<DateTime<Utc>>,
}

impl RemoteItem {
    pub fn file(name: &str) -> Self {
        RemoteItem {
            name: name.to_string(),
            kind: EntryKind::File,
            mode: Some("-rw-r--r--".to_string()),
            size: None,
            mtime: None,
        }
    }

    pub fn directory(name: &str) -> Self {
        RemoteItem {
            name: name.to_string(),
            kind: EntryKind::Directory,
            mode: Some("drwxr-xr-x".to_string()),
            size: None,
            mtime: None,
        }
    }

    /// `.` and `..` style entries some backends include in listings.
    pub fn is_pseudo(&self) -> bool {
        !self.name.is_empty() && self.name.len() <= 3 && self.name.chars().all(|c| c == '.')
    }
}

/// How a file's content is carried over the wire: as raw bytes, or as
/// text in a given code page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileTag {
    pub binary: bool,
    /// Overrides the profile's encoding for this file.
    pub encoding: Option<String>,
}

impl FileTag {
    pub fn binary() -> Self {
        FileTag {
            binary: true,
            encoding: None,
        }
    }

    pub fn text(encoding: &str) -> Self {
        FileTag {
            binary: false,
            encoding: Some(encoding.to_string()),
        }
    }

    /// The encoding to transfer with: the file's own, else the profile's.
    /// Binary transfers have none.
    pub fn effective_encoding(&self, profile: &Profile) -> Option<String> {
        if self.binary {
            return None;
        }
        self.encoding.clone().or_else(|| profile.encoding.clone())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetOptions {
    pub binary: bool,
    pub encoding: Option<String>,
    pub response_timeout: Option<Duration>,
}

impl GetOptions {
    pub fn new(profile: &Profile, tag: &FileTag) -> Self {
        GetOptions {
            binary: tag.binary,
            encoding: tag.effective_encoding(profile),
            response_timeout: profile.response_timeout,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetResponse {
    pub etag: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutOptions {
    /// Only write when the remote version still carries this tag.
    pub etag: Option<String>,
    pub return_etag: bool,
    pub binary: bool,
    pub encoding: Option<String>,
}

impl PutOptions {
    pub fn new(profile: &Profile, tag: &FileTag, etag: Option<String>) -> Self {
        PutOptions {
            etag,
            return_etag: true,
            binary: tag.binary,
            encoding: tag.effective_encoding(profile),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutResponse {
    pub etag: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyOptions {
    pub recursive: bool,
    pub overwrite: bool,
}

/// Accumulates streamed content; chunks are only concatenated on `read`.
#[derive(Debug, Default)]
pub struct BufferBuilder {
    chunks: Vec<Bytes>,
    len: usize,
}

impl BufferBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: impl Into<Bytes>) {
        let chunk = chunk.into();
        if chunk.is_empty() {
            return;
        }
        self.len += chunk.len();
        self.chunks.push(chunk);
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn read(mut self) -> Bytes {
        match self.chunks.len() {
            0 => Bytes::new(),
            1 => self.chunks.swap_remove(0),
            _ => {
                let mut buf = BytesMut::with_capacity(self.len);
                for chunk in &self.chunks {
                    buf.extend_from_slice(chunk);
                }
                buf.freeze()
            }
        }
    }
}

#[async_trait]
pub trait RemoteAccessor: Send + Sync {
    async fn list(&self, profile: &Profile, path: &str) -> RemoteResult<Vec<RemoteItem>>;

    /// Stream the content at `path` into `sink`.
    async fn get(
        &self,
        profile: &Profile,
        path: &str,
        options: &GetOptions,
        sink: &mut BufferBuilder,
    ) -> RemoteResult<GetResponse>;

    /// Write `content` to `path`. Fails with [`RemoteError::PreconditionFailed`]
    /// when `options.etag` is set and no longer matches.
    async fn put(
        &self,
        profile: &Profile,
        path: &str,
        content: Bytes,
        options: &PutOptions,
    ) -> RemoteResult<PutResponse>;

    /// The stored transfer tag of a file. `None` when the store keeps no
    /// tags, in which case the profile's encoding applies.
    async fn file_tag(&self, _profile: &Profile, _path: &str) -> RemoteResult<Option<FileTag>> {
        Ok(None)
    }

    async fn create(&self, profile: &Profile, path: &str, kind: EntryKind) -> RemoteResult<()>;

    async fn delete(&self, profile: &Profile, path: &str, recursive: bool) -> RemoteResult<()>;

    async fn rename(&self, profile: &Profile, old_path: &str, new_path: &str)
        -> RemoteResult<()>;

    async fn move_entry(
        &self,
        _profile: &Profile,
        _old_path: &str,
        _new_path: &str,
    ) -> RemoteResult<()> {
        Err(RemoteError::Unsupported("move"))
    }

    async fn copy(
        &self,
        _profile: &Profile,
        _from_path: &str,
        _to_path: &str,
        _options: &CopyOptions,
    ) -> RemoteResult<()> {
        Err(RemoteError::Unsupported("copy"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_builder_concatenates_chunks() {
        let mut builder = BufferBuilder::new();
        builder.push(Bytes::from_static(b"hello "));
        builder.push(Vec::new());
        builder.push(b"world".to_vec());

        assert_eq!(builder.len(), 11);
        assert_eq!(builder.read(), Bytes::from_static(b"hello world"));
    }

    #[test]
    fn test_buffer_builder_empty() {
        let builder = BufferBuilder::new();
        assert!(builder.is_empty());
        assert!(builder.read().is_empty());
    }

    #[test]
    fn test_file_encoding_overrides_profile() {
        let mut profile = Profile::new("lpar1");
        profile.encoding = Some("IBM-1047".to_string());

        let untagged = GetOptions::new(&profile, &FileTag::default());
        assert_eq!(untagged.encoding.as_deref(), Some("IBM-1047"));
        assert_eq!(
            GetOptions::new(&profile, &FileTag::text("ISO8859-1")).encoding.as_deref(),
            Some("ISO8859-1")
        );

        let binary = PutOptions::new(&profile, &FileTag::binary(), Some("v1".to_string()));
        assert!(binary.binary);
        assert!(binary.encoding.is_none());
        assert_eq!(binary.etag.as_deref(), Some("v1"));
    }

    #[test]
    fn test_pseudo_entries() {
        assert!(RemoteItem::directory(".").is_pseudo());
        assert!(RemoteItem::directory("..").is_pseudo());
        assert!(RemoteItem::directory("...").is_pseudo());
        assert!(!RemoteItem::file(".profile").is_pseudo());
        assert!(!RemoteItem::file("a").is_pseudo());
    }
}
