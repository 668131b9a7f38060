//! The cached virtual filesystem.
//!
//! [`MirrorFs`] owns one tree of [`Entry`] values rooted at `/`, the table of
//! open conflict comparisons and the change notifier. Each profile appears as
//! a top-level directory; everything below it mirrors the remote store and is
//! fetched lazily on first access.

pub mod conflict;
pub mod directory;
pub mod entry;
pub mod file;
pub mod path_resolver;
pub mod relocate;

pub use conflict::ConflictOutcome;
pub use entry::{DirEntry, Entry, EntryKind, EntryMetadata, FileEntry, FileStat, Permissions};

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::{MirrorError, Result};
use crate::host::HostShell;
use crate::notifier::{ChangeEvent, ChangeNotifier, ChangeSubscription};
use crate::profile::{path_info, ProfileCache};
use crate::remote::RemoteAccessor;
use path_resolver::{basename, lookup, lookup_silent, normalize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    pub create: bool,
    pub overwrite: bool,
    /// Upload without the etag precondition.
    pub force_upload: bool,
}

impl WriteOptions {
    /// Create the file if needed and replace it if present.
    pub fn upsert() -> Self {
        WriteOptions {
            create: true,
            overwrite: true,
            force_upload: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenameOptions {
    pub overwrite: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    pub recursive: bool,
}

pub struct MirrorFs {
    pub(crate) root: RwLock<Entry>,
    /// Local path of each file under comparison mapped to its shadow path.
    pub(crate) conflicts: Mutex<HashMap<String, String>>,
    pub(crate) remote: Arc<dyn RemoteAccessor>,
    pub(crate) profiles: ProfileCache,
    pub(crate) host: Arc<dyn HostShell>,
    notifier: ChangeNotifier,
}

impl MirrorFs {
    /// Build a cache with one top-level directory per known profile.
    /// Must be called inside a tokio runtime.
    pub fn new(
        remote: Arc<dyn RemoteAccessor>,
        profiles: ProfileCache,
        host: Arc<dyn HostShell>,
        notifier_delay: Duration,
    ) -> Self {
        let mut root = DirEntry::new("", None);
        for name in profiles.names() {
            if let Some(profile) = profiles.get(&name) {
                root.insert(DirEntry::new(&name, Some(EntryMetadata::new(profile, "/"))).into());
            }
        }

        MirrorFs {
            root: RwLock::new(Entry::Directory(root)),
            conflicts: Mutex::new(HashMap::new()),
            remote,
            profiles,
            host,
            notifier: ChangeNotifier::new(notifier_delay),
        }
    }

    pub fn from_config(
        config: &Config,
        remote: Arc<dyn RemoteAccessor>,
        host: Arc<dyn HostShell>,
    ) -> Self {
        Self::new(
            remote,
            ProfileCache::from_config(config),
            host,
            Duration::from_millis(config.notifier.get_delay_ms()),
        )
    }

    pub fn profiles(&self) -> &ProfileCache {
        &self.profiles
    }

    pub async fn stat(&self, path: &str) -> Result<FileStat> {
        let path = normalize(path);
        if !self.exists(&path) {
            self.lookup_remote(&path).await?;
        }
        let root = self.root.read();
        Ok(lookup(&root, &path)?.stat())
    }

    /// True when `path` is already in the cached tree. Never calls the remote.
    pub fn exists(&self, path: &str) -> bool {
        lookup_silent(&self.root.read(), path).is_some()
    }

    /// A copy of the cached entry at `path`, if any.
    pub fn entry_snapshot(&self, path: &str) -> Option<Entry> {
        lookup_silent(&self.root.read(), path).cloned()
    }

    /// Remove `path` from the cache without touching the remote store.
    pub fn remove_entry_if_exists(&self, path: &str) -> bool {
        let path = normalize(path);
        let removed = {
            let mut root = self.root.write();
            match path_resolver::lookup_parent_mut(&mut root, &path) {
                Ok(parent) => parent.remove(basename(&path)).is_some(),
                Err(_) => false,
            }
        };
        if removed {
            self.fire([ChangeEvent::deleted(&path)]);
        }
        removed
    }

    /// Forget cached content so the next read goes back to the remote store.
    pub fn invalidate_data(&self, path: &str) -> bool {
        let mut root = self.root.write();
        match path_resolver::lookup_mut_silent(&mut root, path) {
            Some(Entry::File(file)) => {
                file.data = None;
                file.was_accessed = false;
                true
            }
            Some(Entry::Directory(dir)) => {
                dir.was_accessed = false;
                true
            }
            None => false,
        }
    }

    /// All change batches, as published.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Vec<ChangeEvent>> {
        self.notifier.subscribe()
    }

    pub fn watch(&self, path: &str, recursive: bool) -> ChangeSubscription {
        self.notifier.watch(path, recursive)
    }

    pub(crate) fn fire(&self, events: impl IntoIterator<Item = ChangeEvent>) {
        self.notifier.schedule(events);
    }

    /// Metadata derived from the virtual path alone. Conflict namespace
    /// paths have none.
    pub(crate) fn metadata_for_path(&self, path: &str) -> Result<Option<EntryMetadata>> {
        let Some(info) = path_info(path) else {
            return Ok(None);
        };
        if info.is_conflict {
            return Ok(None);
        }
        let profile = self.profiles.require(&info.profile_name)?;
        Ok(Some(EntryMetadata::new(profile, info.remote_path)))
    }

    /// Metadata for a new child at `path`: inherited from the parent when it
    /// has some, otherwise derived from the path.
    pub(crate) fn child_metadata(
        &self,
        parent: &DirEntry,
        path: &str,
    ) -> Result<Option<EntryMetadata>> {
        match &parent.metadata {
            Some(meta) => Ok(Some(meta.child(basename(path)))),
            None => self.metadata_for_path(path),
        }
    }

    /// Insert the top-level directory for `profile_name` if it is missing.
    pub(crate) fn ensure_profile_dir(&self, profile_name: &str) -> Result<()> {
        let profile = self.profiles.require(profile_name)?;
        let mut root = self.root.write();
        let Entry::Directory(top) = &mut *root else {
            return Err(MirrorError::NotADirectory("/".to_string()));
        };
        if !top.children.contains_key(profile_name) {
            tracing::debug!("Adding profile directory for {}", profile_name);
            top.insert(DirEntry::new(profile_name, Some(EntryMetadata::new(profile, "/"))).into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HeadlessHost;
    use crate::profile::Profile;
    use crate::remote::MemoryRemote;

    fn cache() -> MirrorFs {
        let mut profiles = ProfileCache::new();
        profiles.insert(Profile::new("lpar1"));
        MirrorFs::new(
            Arc::new(MemoryRemote::new()),
            profiles,
            Arc::new(HeadlessHost::new(None)),
            Duration::from_millis(1),
        )
    }

    #[tokio::test]
    async fn test_profile_directories_exist() {
        let fs = cache();
        assert!(fs.exists("/lpar1"));
        assert!(!fs.exists("/lpar2"));

        let meta = fs.metadata_for_path("/lpar1/u/a.txt").unwrap().unwrap();
        assert_eq!(meta.path, "/u/a.txt");
        assert!(fs.metadata_for_path("/lpar1$conflicts/u").unwrap().is_none());
        assert!(matches!(
            fs.metadata_for_path("/nope/a"),
            Err(MirrorError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_invalidate_and_remove() {
        let fs = cache();
        fs.write_file(
            "/lpar1/a.txt",
            bytes::Bytes::from_static(b"x"),
            WriteOptions::upsert(),
        )
        .await
        .unwrap();

        assert!(fs.invalidate_data("/lpar1/a.txt"));
        match fs.entry_snapshot("/lpar1/a.txt") {
            Some(Entry::File(file)) => assert!(file.needs_fetch()),
            other => panic!("expected file, got {:?}", other),
        }

        assert!(fs.remove_entry_if_exists("/lpar1/a.txt"));
        assert!(!fs.remove_entry_if_exists("/lpar1/a.txt"));
        assert!(!fs.invalidate_data("/lpar1/a.txt"));
    }
}
