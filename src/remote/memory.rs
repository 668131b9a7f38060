use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use super::{
    BufferBuilder, CopyOptions, FileTag, GetOptions, GetResponse, PutOptions, PutResponse,
    RemoteAccessor, RemoteItem,
};
use crate::cache::entry::EntryKind;
use crate::cache::path_resolver::{dirname, join_path, normalize, rewrite_prefix};
use crate::error::{RemoteError, RemoteResult};
use crate::profile::Profile;

/// Content handed to the sink per chunk, so reads exercise streaming.
const STREAM_CHUNK_SIZE: usize = 4096;

#[derive(Debug, Clone)]
struct StoredNode {
    kind: EntryKind,
    data: Bytes,
    version: u64,
    mtime: DateTime<Utc>,
}

impl StoredNode {
    fn etag(&self) -> String {
        format!("v{}", self.version)
    }
}

/// A recorded call against the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCall {
    pub op: &'static str,
    pub profile: String,
    pub path: String,
}

type NodeKey = (String, String);

/// An in-memory remote store.
///
/// Etags are store-wide version counters (`v1`, `v2`, ...). Each profile has
/// an implicit top-level directory `/`. Every call is logged so callers can
/// assert on remote traffic.
pub struct MemoryRemote {
    nodes: Mutex<BTreeMap<NodeKey, StoredNode>>,
    tags: Mutex<HashMap<NodeKey, FileTag>>,
    next_version: AtomicU64,
    calls: Mutex<Vec<RemoteCall>>,
    failures: Mutex<HashMap<&'static str, String>>,
    last_get: Mutex<Option<GetOptions>>,
    last_put: Mutex<Option<PutOptions>>,
    supports_move: bool,
    supports_copy: bool,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        MemoryRemote {
            nodes: Mutex::new(BTreeMap::new()),
            tags: Mutex::new(HashMap::new()),
            next_version: AtomicU64::new(1),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            last_get: Mutex::new(None),
            last_put: Mutex::new(None),
            supports_move: true,
            supports_copy: true,
        }
    }

    /// A store that reports `move` as unsupported.
    pub fn without_move(mut self) -> Self {
        self.supports_move = false;
        self
    }

    /// A store that reports `copy` as unsupported.
    pub fn without_copy(mut self) -> Self {
        self.supports_copy = false;
        self
    }

    fn key(profile: &str, path: &str) -> NodeKey {
        (profile.to_string(), normalize(path))
    }

    fn bump_version(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::Relaxed)
    }

    fn ensure_dirs(&self, nodes: &mut BTreeMap<NodeKey, StoredNode>, profile: &str, path: &str) {
        let mut current = "/".to_string();
        for part in crate::cache::path_resolver::segments(path) {
            current = join_path(&current, part);
            nodes
                .entry(Self::key(profile, &current))
                .or_insert_with(|| StoredNode {
                    kind: EntryKind::Directory,
                    data: Bytes::new(),
                    version: self.bump_version(),
                    mtime: Utc::now(),
                });
        }
    }

    /// Store a file directly, creating parent directories. Returns its etag.
    pub fn insert_file(&self, profile: &str, path: &str, content: &[u8]) -> String {
        let mut nodes = self.nodes.lock();
        self.ensure_dirs(&mut nodes, profile, &dirname(path));
        let node = StoredNode {
            kind: EntryKind::File,
            data: Bytes::copy_from_slice(content),
            version: self.bump_version(),
            mtime: Utc::now(),
        };
        let etag = node.etag();
        nodes.insert(Self::key(profile, path), node);
        etag
    }

    /// Store a directory directly, creating parents.
    pub fn insert_dir(&self, profile: &str, path: &str) {
        let mut nodes = self.nodes.lock();
        self.ensure_dirs(&mut nodes, profile, path);
    }

    pub fn content(&self, profile: &str, path: &str) -> Option<Bytes> {
        self.nodes
            .lock()
            .get(&Self::key(profile, path))
            .filter(|n| n.kind == EntryKind::File)
            .map(|n| n.data.clone())
    }

    pub fn etag(&self, profile: &str, path: &str) -> Option<String> {
        self.nodes
            .lock()
            .get(&Self::key(profile, path))
            .map(StoredNode::etag)
    }

    pub fn exists(&self, profile: &str, path: &str) -> bool {
        normalize(path) == "/" || self.nodes.lock().contains_key(&Self::key(profile, path))
    }

    /// Tag a stored file as binary or with its own encoding.
    pub fn set_tag(&self, profile: &str, path: &str, tag: FileTag) {
        self.tags.lock().insert(Self::key(profile, path), tag);
    }

    /// Options of the most recent `get`.
    pub fn last_get_options(&self) -> Option<GetOptions> {
        self.last_get.lock().clone()
    }

    /// Options of the most recent `put`.
    pub fn last_put_options(&self) -> Option<PutOptions> {
        self.last_put.lock().clone()
    }

    /// Make the next call of `op` fail with a generic remote failure.
    pub fn fail_next(&self, op: &'static str, message: &str) {
        self.failures.lock().insert(op, message.to_string());
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, op: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.op == op).count()
    }

    pub fn count_for(&self, op: &str, path: &str) -> usize {
        let path = normalize(path);
        self.calls
            .lock()
            .iter()
            .filter(|c| c.op == op && c.path == path)
            .count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, op: &'static str, profile: &Profile, path: &str) -> RemoteResult<()> {
        tracing::debug!("memory remote: {} {}:{}", op, profile.name, path);
        self.calls.lock().push(RemoteCall {
            op,
            profile: profile.name.clone(),
            path: normalize(path),
        });
        match self.failures.lock().remove(op) {
            Some(message) => Err(RemoteError::Failure(message)),
            None => Ok(()),
        }
    }

    fn require_parent_dir(
        nodes: &BTreeMap<NodeKey, StoredNode>,
        profile: &str,
        path: &str,
    ) -> RemoteResult<()> {
        let parent = dirname(path);
        if parent == "/" {
            return Ok(());
        }
        match nodes.get(&Self::key(profile, &parent)) {
            Some(node) if node.kind == EntryKind::Directory => Ok(()),
            _ => Err(RemoteError::NotFound(parent)),
        }
    }

    /// Keys of `path` and everything below it.
    fn subtree_keys(
        nodes: &BTreeMap<NodeKey, StoredNode>,
        profile: &str,
        path: &str,
    ) -> Vec<NodeKey> {
        let path = normalize(path);
        nodes
            .keys()
            .filter(|(p, node_path)| {
                p == profile && rewrite_prefix(node_path, &path, &path).is_some()
            })
            .cloned()
            .collect()
    }

    fn relocate(&self, profile: &Profile, old_path: &str, new_path: &str) -> RemoteResult<()> {
        let mut nodes = self.nodes.lock();
        if !nodes.contains_key(&Self::key(&profile.name, old_path)) {
            return Err(RemoteError::NotFound(old_path.to_string()));
        }
        if nodes.contains_key(&Self::key(&profile.name, new_path)) {
            return Err(RemoteError::AlreadyExists(new_path.to_string()));
        }
        Self::require_parent_dir(&nodes, &profile.name, new_path)?;

        let old_path = normalize(old_path);
        let new_path = normalize(new_path);
        let mut tags = self.tags.lock();
        for key in Self::subtree_keys(&nodes, &profile.name, &old_path) {
            let moved = (
                profile.name.clone(),
                rewrite_prefix(&key.1, &old_path, &new_path).unwrap_or_else(|| key.1.clone()),
            );
            if let Some(tag) = tags.remove(&key) {
                tags.insert(moved.clone(), tag);
            }
            if let Some(node) = nodes.remove(&key) {
                nodes.insert(moved, node);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteAccessor for MemoryRemote {
    async fn list(&self, profile: &Profile, path: &str) -> RemoteResult<Vec<RemoteItem>> {
        self.record("list", profile, path)?;
        let nodes = self.nodes.lock();
        let dir = normalize(path);
        if dir != "/" {
            match nodes.get(&Self::key(&profile.name, &dir)) {
                Some(node) if node.kind == EntryKind::Directory => {}
                Some(_) => return Err(RemoteError::Failure(format!("{} is not a directory", dir))),
                None => return Err(RemoteError::NotFound(dir)),
            }
        }

        let mut items = vec![RemoteItem::directory("."), RemoteItem::directory("..")];
        for ((p, node_path), node) in nodes.iter() {
            if p != &profile.name || node_path == "/" || dirname(node_path) != dir {
                continue;
            }
            let name = crate::cache::path_resolver::basename(node_path);
            let mut item = match node.kind {
                EntryKind::Directory => RemoteItem::directory(name),
                EntryKind::File => RemoteItem::file(name),
            };
            item.size = Some(node.data.len() as u64);
            item.mtime = Some(node.mtime);
            items.push(item);
        }
        Ok(items)
    }

    async fn get(
        &self,
        profile: &Profile,
        path: &str,
        options: &GetOptions,
        sink: &mut BufferBuilder,
    ) -> RemoteResult<GetResponse> {
        self.record("get", profile, path)?;
        *self.last_get.lock() = Some(options.clone());
        let node = self
            .nodes
            .lock()
            .get(&Self::key(&profile.name, path))
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(path.to_string()))?;
        if node.kind != EntryKind::File {
            return Err(RemoteError::Failure(format!("{} is a directory", path)));
        }

        let mut offset = 0;
        while offset < node.data.len() {
            let end = (offset + STREAM_CHUNK_SIZE).min(node.data.len());
            sink.push(node.data.slice(offset..end));
            offset = end;
        }

        Ok(GetResponse {
            etag: Some(node.etag()),
        })
    }

    async fn put(
        &self,
        profile: &Profile,
        path: &str,
        content: Bytes,
        options: &PutOptions,
    ) -> RemoteResult<PutResponse> {
        self.record("put", profile, path)?;
        *self.last_put.lock() = Some(options.clone());
        let mut nodes = self.nodes.lock();
        Self::require_parent_dir(&nodes, &profile.name, path)?;

        let key = Self::key(&profile.name, path);
        if let (Some(expected), Some(current)) = (&options.etag, nodes.get(&key)) {
            if &current.etag() != expected {
                tracing::debug!(
                    "memory remote: etag mismatch on {} (expected {}, have {})",
                    path,
                    expected,
                    current.etag()
                );
                return Err(RemoteError::PreconditionFailed(path.to_string()));
            }
        }
        if nodes.get(&key).is_some_and(|n| n.kind == EntryKind::Directory) {
            return Err(RemoteError::Failure(format!("{} is a directory", path)));
        }

        let node = StoredNode {
            kind: EntryKind::File,
            data: content,
            version: self.bump_version(),
            mtime: Utc::now(),
        };
        let etag = node.etag();
        nodes.insert(key, node);

        Ok(PutResponse {
            etag: options.return_etag.then_some(etag),
        })
    }

    async fn file_tag(&self, profile: &Profile, path: &str) -> RemoteResult<Option<FileTag>> {
        self.record("tag", profile, path)?;
        let key = Self::key(&profile.name, path);
        if !self.nodes.lock().contains_key(&key) {
            return Err(RemoteError::NotFound(path.to_string()));
        }
        Ok(self.tags.lock().get(&key).cloned())
    }

    async fn create(&self, profile: &Profile, path: &str, kind: EntryKind) -> RemoteResult<()> {
        self.record("create", profile, path)?;
        let mut nodes = self.nodes.lock();
        let key = Self::key(&profile.name, path);
        if nodes.contains_key(&key) {
            return Err(RemoteError::AlreadyExists(path.to_string()));
        }
        Self::require_parent_dir(&nodes, &profile.name, path)?;
        nodes.insert(
            key,
            StoredNode {
                kind,
                data: Bytes::new(),
                version: self.bump_version(),
                mtime: Utc::now(),
            },
        );
        Ok(())
    }

    async fn delete(&self, profile: &Profile, path: &str, recursive: bool) -> RemoteResult<()> {
        self.record("delete", profile, path)?;
        let mut nodes = self.nodes.lock();
        let keys = Self::subtree_keys(&nodes, &profile.name, path);
        if keys.is_empty() {
            return Err(RemoteError::NotFound(path.to_string()));
        }
        if keys.len() > 1 && !recursive {
            return Err(RemoteError::Failure(format!(
                "{} is not empty",
                normalize(path)
            )));
        }
        let mut tags = self.tags.lock();
        for key in keys {
            tags.remove(&key);
            nodes.remove(&key);
        }
        Ok(())
    }

    async fn rename(
        &self,
        profile: &Profile,
        old_path: &str,
        new_path: &str,
    ) -> RemoteResult<()> {
        self.record("rename", profile, old_path)?;
        self.relocate(profile, old_path, new_path)
    }

    async fn move_entry(
        &self,
        profile: &Profile,
        old_path: &str,
        new_path: &str,
    ) -> RemoteResult<()> {
        if !self.supports_move {
            return Err(RemoteError::Unsupported("move"));
        }
        self.record("move", profile, old_path)?;
        self.relocate(profile, old_path, new_path)
    }

    async fn copy(
        &self,
        profile: &Profile,
        from_path: &str,
        to_path: &str,
        options: &CopyOptions,
    ) -> RemoteResult<()> {
        if !self.supports_copy {
            return Err(RemoteError::Unsupported("copy"));
        }
        self.record("copy", profile, from_path)?;
        let mut nodes = self.nodes.lock();
        let from_path = normalize(from_path);
        let to_path = normalize(to_path);

        let source = nodes
            .get(&Self::key(&profile.name, &from_path))
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(from_path.clone()))?;
        if nodes.contains_key(&Self::key(&profile.name, &to_path)) && !options.overwrite {
            return Err(RemoteError::AlreadyExists(to_path));
        }
        Self::require_parent_dir(&nodes, &profile.name, &to_path)?;

        let keys = if source.kind == EntryKind::Directory && options.recursive {
            Self::subtree_keys(&nodes, &profile.name, &from_path)
        } else {
            vec![Self::key(&profile.name, &from_path)]
        };
        for key in keys {
            if let Some(mut node) = nodes.get(&key).cloned() {
                node.version = self.bump_version();
                let target = rewrite_prefix(&key.1, &from_path, &to_path).unwrap_or(key.1);
                nodes.insert((profile.name.clone(), target), node);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> Profile {
        Profile::new("lpar1")
    }

    #[tokio::test]
    async fn test_put_with_stale_etag_fails() {
        let remote = MemoryRemote::new();
        let etag = remote.insert_file("lpar1", "/u/a.txt", b"one");
        remote.insert_file("lpar1", "/u/a.txt", b"two");

        let result = remote
            .put(
                &profile(),
                "/u/a.txt",
                Bytes::from_static(b"three"),
                &PutOptions {
                    etag: Some(etag),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(RemoteError::PreconditionFailed(_))));
        assert_eq!(
            remote.content("lpar1", "/u/a.txt").unwrap(),
            Bytes::from_static(b"two")
        );
    }

    #[tokio::test]
    async fn test_get_streams_chunks() {
        let remote = MemoryRemote::new();
        let content = vec![7u8; STREAM_CHUNK_SIZE * 2 + 10];
        let etag = remote.insert_file("lpar1", "/big.bin", &content);

        let mut sink = BufferBuilder::new();
        let resp = remote
            .get(&profile(), "/big.bin", &GetOptions::default(), &mut sink)
            .await
            .unwrap();
        assert_eq!(resp.etag, Some(etag));
        assert_eq!(sink.read().as_ref(), content.as_slice());
    }

    #[tokio::test]
    async fn test_list_includes_pseudo_entries() {
        let remote = MemoryRemote::new();
        remote.insert_file("lpar1", "/u/a.txt", b"a");
        remote.insert_dir("lpar1", "/u/sub");

        let items = remote.list(&profile(), "/u").await.unwrap();
        let names: Vec<&str> = items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec![".", "..", "a.txt", "sub"]);
        assert_eq!(remote.count_for("list", "/u"), 1);
    }

    #[tokio::test]
    async fn test_rename_moves_subtree() {
        let remote = MemoryRemote::new();
        remote.insert_file("lpar1", "/u/d/a.txt", b"a");

        remote.rename(&profile(), "/u/d", "/u/e").await.unwrap();
        assert!(remote.exists("lpar1", "/u/e/a.txt"));
        assert!(!remote.exists("lpar1", "/u/d"));
    }

    #[tokio::test]
    async fn test_tags_follow_renames() {
        let remote = MemoryRemote::new();
        remote.insert_file("lpar1", "/u/d/a.bin", b"\0\x01");
        remote.set_tag("lpar1", "/u/d/a.bin", FileTag::binary());

        assert_eq!(
            remote.file_tag(&profile(), "/u/d/a.bin").await.unwrap(),
            Some(FileTag::binary())
        );
        remote.rename(&profile(), "/u/d", "/u/e").await.unwrap();
        assert_eq!(
            remote.file_tag(&profile(), "/u/e/a.bin").await.unwrap(),
            Some(FileTag::binary())
        );
        assert!(matches!(
            remote.file_tag(&profile(), "/u/d/a.bin").await,
            Err(RemoteError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_unsupported_move() {
        let remote = MemoryRemote::new().without_move();
        remote.insert_file("lpar1", "/a.txt", b"a");
        let result = remote.move_entry(&profile(), "/a.txt", "/b.txt").await;
        assert!(matches!(result, Err(RemoteError::Unsupported("move"))));
    }

    #[tokio::test]
    async fn test_fail_next() {
        let remote = MemoryRemote::new();
        remote.fail_next("list", "connection reset");
        assert!(matches!(
            remote.list(&profile(), "/").await,
            Err(RemoteError::Failure(_))
        ));
        assert!(remote.list(&profile(), "/").await.is_ok());
    }
}
