use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use fxhash::FxHasher64;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hasher;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use walkdir::WalkDir;

use super::{
    BufferBuilder, CopyOptions, FileTag, GetOptions, GetResponse, PutOptions, PutResponse,
    RemoteAccessor, RemoteItem,
};
use crate::cache::entry::EntryKind;
use crate::config::{expand_tilde, Config};
use crate::error::{RemoteError, RemoteResult};
use crate::profile::Profile;

/// A multiple of 8, so hashing block by block matches hashing the whole file.
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Serves each profile from a directory on the local disk.
///
/// Etags are content hashes, so an out-of-band edit to a file changes its
/// etag the same way a remote edit would.
#[derive(Debug, Clone, Default)]
pub struct LocalDirRemote {
    roots: HashMap<String, PathBuf>,
}

fn etag_of(hasher: &FxHasher64) -> String {
    format!("{:016x}", hasher.finish())
}

pub fn content_etag(data: &[u8]) -> String {
    let mut hasher = FxHasher64::default();
    hasher.write(data);
    etag_of(&hasher)
}

fn map_io(err: std::io::Error, path: &str) -> RemoteError {
    match err.kind() {
        ErrorKind::NotFound => RemoteError::NotFound(path.to_string()),
        ErrorKind::AlreadyExists => RemoteError::AlreadyExists(path.to_string()),
        _ => RemoteError::Io(err),
    }
}

fn mode_string(metadata: &std::fs::Metadata) -> String {
    let kind = if metadata.is_dir() { 'd' } else { '-' };
    let write = if metadata.permissions().readonly() { '-' } else { 'w' };
    format!("{}r{}-r--r--", kind, write)
}

/// Run `operation`, giving up after `limit` when one is set.
async fn within<T>(
    limit: Option<Duration>,
    path: &str,
    operation: impl Future<Output = RemoteResult<T>>,
) -> RemoteResult<T> {
    let Some(limit) = limit else {
        return operation.await;
    };
    tokio::time::timeout(limit, operation)
        .await
        .map_err(|_| {
            RemoteError::Failure(format!(
                "No response for {} within {}ms",
                path,
                limit.as_millis()
            ))
        })?
}

/// Fill one block from `file`. Only the last block of a file is short.
async fn read_block(file: &mut tokio::fs::File) -> std::io::Result<BytesMut> {
    let mut block = BytesMut::zeroed(READ_CHUNK_SIZE);
    let mut filled = 0;
    while filled < READ_CHUNK_SIZE {
        let read = file.read(&mut block[filled..]).await?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    block.truncate(filled);
    Ok(block)
}

/// Read `target` block by block, handing each block to `on_block`, and
/// return the content etag.
async fn stream_file(
    target: &Path,
    path: &str,
    mut on_block: impl FnMut(Bytes),
) -> RemoteResult<String> {
    let mut file = tokio::fs::File::open(target)
        .await
        .map_err(|e| map_io(e, path))?;
    let mut hasher = FxHasher64::default();
    loop {
        let block = read_block(&mut file).await.map_err(|e| map_io(e, path))?;
        let last = block.len() < READ_CHUNK_SIZE;
        if !block.is_empty() {
            hasher.write(&block);
            on_block(block.freeze());
        }
        if last {
            break;
        }
    }
    Ok(etag_of(&hasher))
}

impl LocalDirRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(mut self, profile: &str, root: impl Into<PathBuf>) -> Self {
        self.roots.insert(profile.to_string(), root.into());
        self
    }

    /// Roots for every profile that names one. Profiles without a root are
    /// skipped with a warning.
    pub fn from_config(config: &Config) -> Self {
        let mut remote = Self::new();
        for profile in &config.profiles {
            match &profile.root {
                Some(root) => {
                    remote
                        .roots
                        .insert(profile.name.clone(), expand_tilde(root));
                }
                None => tracing::warn!("Profile '{}' has no root directory", profile.name),
            }
        }
        remote
    }

    fn resolve(&self, profile: &Profile, path: &str) -> RemoteResult<PathBuf> {
        let root = self.roots.get(&profile.name).ok_or_else(|| {
            RemoteError::Failure(format!("No root directory for profile '{}'", profile.name))
        })?;

        let relative = Path::new(path.trim_start_matches('/'));
        for component in relative.components() {
            if !matches!(component, Component::Normal(_)) {
                return Err(RemoteError::Failure(format!(
                    "Path escapes the profile root: {}",
                    path
                )));
            }
        }
        Ok(root.join(relative))
    }

    async fn read_etag(target: &Path, path: &str) -> RemoteResult<Option<String>> {
        match stream_file(target, path, |_| {}).await {
            Ok(etag) => Ok(Some(etag)),
            Err(RemoteError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list_dir(&self, profile: &Profile, path: &str) -> RemoteResult<Vec<RemoteItem>> {
        let dir = self.resolve(profile, path)?;
        let mut read_dir = tokio::fs::read_dir(&dir).await.map_err(|e| map_io(e, path))?;

        let mut items = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let metadata = entry.metadata().await?;
            let name = entry.file_name().to_string_lossy().to_string();
            items.push(RemoteItem {
                name,
                kind: if metadata.is_dir() {
                    EntryKind::Directory
                } else {
                    EntryKind::File
                },
                mode: Some(mode_string(&metadata)),
                size: Some(metadata.len()),
                mtime: metadata.modified().ok().map(DateTime::<Utc>::from),
            });
        }
        items.sort_by(|a, b| a.name.cmp(&b.name));
        tracing::debug!("Listed {} items in {}:{}", items.len(), profile.name, path);
        Ok(items)
    }

    async fn write_file(
        &self,
        profile: &Profile,
        path: &str,
        content: Bytes,
        options: &PutOptions,
    ) -> RemoteResult<PutResponse> {
        let target = self.resolve(profile, path)?;

        if let Some(expected) = &options.etag {
            if let Some(current) = Self::read_etag(&target, path).await? {
                if &current != expected {
                    return Err(RemoteError::PreconditionFailed(path.to_string()));
                }
            }
        }

        tokio::fs::write(&target, &content)
            .await
            .map_err(|e| map_io(e, path))?;

        Ok(PutResponse {
            etag: options.return_etag.then(|| content_etag(&content)),
        })
    }

    /// Files with a NUL byte in their first block are binary.
    async fn sniff_tag(&self, profile: &Profile, path: &str) -> RemoteResult<Option<FileTag>> {
        let target = self.resolve(profile, path)?;
        let mut file = tokio::fs::File::open(&target)
            .await
            .map_err(|e| map_io(e, path))?;
        let block = read_block(&mut file).await.map_err(|e| map_io(e, path))?;
        let tag = if block.contains(&0) {
            FileTag::binary()
        } else {
            FileTag::default()
        };
        Ok(Some(tag))
    }

    async fn create_at(&self, profile: &Profile, path: &str, kind: EntryKind) -> RemoteResult<()> {
        let target = self.resolve(profile, path)?;
        if tokio::fs::try_exists(&target).await? {
            return Err(RemoteError::AlreadyExists(path.to_string()));
        }
        match kind {
            EntryKind::Directory => tokio::fs::create_dir(&target).await,
            EntryKind::File => tokio::fs::write(&target, b"").await,
        }
        .map_err(|e| map_io(e, path))
    }

    async fn delete_at(&self, profile: &Profile, path: &str, recursive: bool) -> RemoteResult<()> {
        let target = self.resolve(profile, path)?;
        let metadata = tokio::fs::metadata(&target)
            .await
            .map_err(|e| map_io(e, path))?;
        let result = if !metadata.is_dir() {
            tokio::fs::remove_file(&target).await
        } else if recursive {
            tokio::fs::remove_dir_all(&target).await
        } else {
            tokio::fs::remove_dir(&target).await
        };
        result.map_err(|e| map_io(e, path))
    }

    async fn rename_at(&self, profile: &Profile, old_path: &str, new_path: &str) -> RemoteResult<()> {
        let from = self.resolve(profile, old_path)?;
        let to = self.resolve(profile, new_path)?;
        if tokio::fs::try_exists(&to).await? {
            return Err(RemoteError::AlreadyExists(new_path.to_string()));
        }
        tokio::fs::rename(&from, &to)
            .await
            .map_err(|e| map_io(e, old_path))
    }

    async fn copy_at(
        &self,
        profile: &Profile,
        from_path: &str,
        to_path: &str,
        options: &CopyOptions,
    ) -> RemoteResult<()> {
        let from = self.resolve(profile, from_path)?;
        let to = self.resolve(profile, to_path)?;
        if !options.overwrite && tokio::fs::try_exists(&to).await? {
            return Err(RemoteError::AlreadyExists(to_path.to_string()));
        }

        let metadata = tokio::fs::metadata(&from)
            .await
            .map_err(|e| map_io(e, from_path))?;
        if !metadata.is_dir() {
            tokio::fs::copy(&from, &to)
                .await
                .map_err(|e| map_io(e, from_path))?;
            return Ok(());
        }
        if !options.recursive {
            return tokio::fs::create_dir_all(&to)
                .await
                .map_err(|e| map_io(e, to_path));
        }

        let from_display = from_path.to_string();
        tokio::task::spawn_blocking(move || copy_tree(&from, &to))
            .await
            .map_err(|e| RemoteError::Failure(format!("Copy task failed: {}", e)))?
            .map_err(|e| map_io(e, &from_display))
    }
}

fn copy_tree(from: &Path, to: &Path) -> std::io::Result<()> {
    for entry in WalkDir::new(from) {
        let entry = entry.map_err(std::io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(std::io::Error::other)?;
        let target = to.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[async_trait]
impl RemoteAccessor for LocalDirRemote {
    async fn list(&self, profile: &Profile, path: &str) -> RemoteResult<Vec<RemoteItem>> {
        within(profile.response_timeout, path, self.list_dir(profile, path)).await
    }

    async fn get(
        &self,
        profile: &Profile,
        path: &str,
        options: &GetOptions,
        sink: &mut BufferBuilder,
    ) -> RemoteResult<GetResponse> {
        let target = self.resolve(profile, path)?;
        let read = stream_file(&target, path, |block| sink.push(block));
        let etag = within(options.response_timeout, path, read).await?;
        Ok(GetResponse { etag: Some(etag) })
    }

    async fn put(
        &self,
        profile: &Profile,
        path: &str,
        content: Bytes,
        options: &PutOptions,
    ) -> RemoteResult<PutResponse> {
        within(
            profile.response_timeout,
            path,
            self.write_file(profile, path, content, options),
        )
        .await
    }

    async fn file_tag(&self, profile: &Profile, path: &str) -> RemoteResult<Option<FileTag>> {
        within(profile.response_timeout, path, self.sniff_tag(profile, path)).await
    }

    async fn create(&self, profile: &Profile, path: &str, kind: EntryKind) -> RemoteResult<()> {
        within(profile.response_timeout, path, self.create_at(profile, path, kind)).await
    }

    async fn delete(&self, profile: &Profile, path: &str, recursive: bool) -> RemoteResult<()> {
        within(
            profile.response_timeout,
            path,
            self.delete_at(profile, path, recursive),
        )
        .await
    }

    async fn rename(
        &self,
        profile: &Profile,
        old_path: &str,
        new_path: &str,
    ) -> RemoteResult<()> {
        within(
            profile.response_timeout,
            old_path,
            self.rename_at(profile, old_path, new_path),
        )
        .await
    }

    async fn move_entry(
        &self,
        profile: &Profile,
        old_path: &str,
        new_path: &str,
    ) -> RemoteResult<()> {
        self.rename(profile, old_path, new_path).await
    }

    async fn copy(
        &self,
        profile: &Profile,
        from_path: &str,
        to_path: &str,
        options: &CopyOptions,
    ) -> RemoteResult<()> {
        within(
            profile.response_timeout,
            from_path,
            self.copy_at(profile, from_path, to_path, options),
        )
        .await
    }
}
