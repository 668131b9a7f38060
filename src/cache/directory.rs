use super::entry::{DirEntry, Entry, EntryKind, FileEntry};
use super::path_resolver::{
    basename, join_path, lookup, lookup_dir, lookup_dir_mut, lookup_parent_mut, normalize,
    segments,
};
use super::MirrorFs;
use crate::error::{MirrorError, Result};
use crate::notifier::ChangeEvent;
use crate::profile::path_info;

impl MirrorFs {
    /// List the children of a directory, fetching the remote listing the
    /// first time the directory is read.
    pub async fn read_directory(&self, path: &str) -> Result<Vec<(String, EntryKind)>> {
        let path = normalize(path);
        if !self.exists(&path) {
            self.lookup_remote(&path).await?;
        }
        self.populate_directory(&path).await?;

        let root = self.root.read();
        Ok(lookup_dir(&root, &path)?.listing())
    }

    /// Fetch the remote listing for `path` unless it was fetched before.
    /// The root and metadata-less directories are never fetched.
    pub(crate) async fn populate_directory(&self, path: &str) -> Result<()> {
        let meta = {
            let root = self.root.read();
            let dir = lookup_dir(&root, path)?;
            if path == "/" || dir.was_accessed {
                return Ok(());
            }
            match &dir.metadata {
                Some(meta) => meta.clone(),
                None => return Ok(()),
            }
        };

        tracing::debug!("Listing {}:{}", meta.profile.name, meta.path);
        let items = self.remote.list(&meta.profile, &meta.path).await?;

        let mut events = Vec::new();
        {
            let mut root = self.root.write();
            let dir = lookup_dir_mut(&mut root, path)?;
            for item in items.iter().filter(|item| !item.is_pseudo()) {
                let existing = dir.children.get(&item.name).map(Entry::kind);
                if existing == Some(item.kind) {
                    continue;
                }

                let child_meta = Some(meta.child(&item.name));
                let entry: Entry = match item.kind {
                    EntryKind::Directory => DirEntry::new(&item.name, child_meta).into(),
                    EntryKind::File => {
                        let mut file = FileEntry::new(&item.name, child_meta);
                        if let Some(size) = item.size {
                            file.size = size;
                        }
                        if let Some(mtime) = item.mtime {
                            file.mtime = mtime;
                        }
                        file.into()
                    }
                };
                dir.insert(entry);
                events.push(ChangeEvent::created(&join_path(path, &item.name)));
            }
            dir.was_accessed = true;
        }

        tracing::debug!("Populated {} with {} new entries", path, events.len());
        self.fire(events);
        Ok(())
    }

    /// Bring a path that is not yet cached into the tree by listing each of
    /// its ancestors in turn.
    pub async fn lookup_remote(&self, path: &str) -> Result<EntryKind> {
        let path = normalize(path);
        let Some(info) = path_info(&path) else {
            return Ok(EntryKind::Directory);
        };
        if info.is_conflict {
            let root = self.root.read();
            return Ok(lookup(&root, &path)?.kind());
        }

        self.ensure_profile_dir(&info.profile_name)?;

        let parts: Vec<&str> = segments(&path).collect();
        let mut current = format!("/{}", info.profile_name);
        for part in parts.iter().skip(1) {
            let listed_before = self.was_listed(&current);
            self.populate_directory(&current).await?;
            if listed_before && !self.has_child(&current, part) {
                tracing::debug!("{} not in the cached listing of {}, listing again", part, current);
                self.mark_unlisted(&current);
                self.populate_directory(&current).await?;
            }
            current = join_path(&current, part);
        }

        let root = self.root.read();
        Ok(lookup(&root, &path)?.kind())
    }

    fn was_listed(&self, path: &str) -> bool {
        let root = self.root.read();
        lookup_dir(&root, path).is_ok_and(|dir| dir.was_accessed)
    }

    fn has_child(&self, path: &str, name: &str) -> bool {
        let root = self.root.read();
        lookup_dir(&root, path).is_ok_and(|dir| dir.children.contains_key(name))
    }

    fn mark_unlisted(&self, path: &str) {
        if let Ok(dir) = lookup_dir_mut(&mut self.root.write(), path) {
            dir.was_accessed = false;
        }
    }

    /// Create a directory in the cache only. Existing directories are left
    /// as they are.
    pub fn create_directory(&self, path: &str) -> Result<()> {
        let path = normalize(path);
        let name = basename(&path).to_string();
        if name.is_empty() {
            return Ok(());
        }

        {
            let mut root = self.root.write();
            let parent = lookup_parent_mut(&mut root, &path)?;
            match parent.children.get(&name) {
                Some(Entry::Directory(_)) => return Ok(()),
                Some(Entry::File(_)) => return Err(MirrorError::AlreadyExists(path)),
                None => {}
            }
            let metadata = self.child_metadata(parent, &path)?;
            parent.insert(DirEntry::new(&name, metadata).into());
        }

        tracing::debug!("Created directory {}", path);
        self.fire([
            ChangeEvent::changed(&super::path_resolver::dirname(&path)),
            ChangeEvent::created(&path),
        ]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HeadlessHost;
    use crate::profile::{Profile, ProfileCache};
    use crate::remote::MemoryRemote;
    use std::sync::Arc;
    use std::time::Duration;

    fn setup() -> (Arc<MemoryRemote>, MirrorFs) {
        let remote = Arc::new(MemoryRemote::new());
        let mut profiles = ProfileCache::new();
        profiles.insert(Profile::new("lpar1"));
        let fs = MirrorFs::new(
            remote.clone(),
            profiles,
            Arc::new(HeadlessHost::new(None)),
            Duration::from_millis(1),
        );
        (remote, fs)
    }

    #[tokio::test]
    async fn test_listing_is_fetched_once() {
        let (remote, fs) = setup();
        remote.insert_file("lpar1", "/u/a.txt", b"a");
        remote.insert_dir("lpar1", "/u/sub");

        let first = fs.read_directory("/lpar1/u").await.unwrap();
        let second = fs.read_directory("/lpar1/u").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(
            first,
            vec![
                ("a.txt".to_string(), EntryKind::File),
                ("sub".to_string(), EntryKind::Directory),
            ]
        );
        assert_eq!(remote.count_for("list", "/u"), 1);
    }

    #[tokio::test]
    async fn test_listing_keeps_unsaved_local_files() {
        let (remote, fs) = setup();
        remote.insert_file("lpar1", "/a.txt", b"remote");
        fs.write_file(
            "/lpar1/a.txt",
            bytes::Bytes::from_static(b"local"),
            super::super::WriteOptions::upsert(),
        )
        .await
        .unwrap();

        fs.read_directory("/lpar1").await.unwrap();
        let data = fs.read_file("/lpar1/a.txt").await.unwrap();
        assert_eq!(data.as_ref(), b"local");
        assert_eq!(remote.count("get"), 0);
    }

    #[tokio::test]
    async fn test_lookup_lists_again_for_new_remote_entry() {
        let (remote, fs) = setup();
        remote.insert_file("lpar1", "/u/a.txt", b"a");
        fs.read_directory("/lpar1/u").await.unwrap();
        remote.insert_dir("lpar1", "/u/later");

        assert_eq!(
            fs.lookup_remote("/lpar1/u/later").await.unwrap(),
            EntryKind::Directory
        );
        assert_eq!(remote.count_for("list", "/u"), 2);

        // Cached children need no second listing.
        fs.lookup_remote("/lpar1/u/a.txt").await.unwrap();
        assert_eq!(remote.count_for("list", "/u"), 2);
    }

    #[tokio::test]
    async fn test_root_is_never_fetched() {
        let (remote, fs) = setup();
        let listing = fs.read_directory("/").await.unwrap();
        assert_eq!(listing, vec![("lpar1".to_string(), EntryKind::Directory)]);
        assert_eq!(remote.count("list"), 0);
    }

    #[tokio::test]
    async fn test_lookup_remote_builds_deep_path() {
        let (remote, fs) = setup();
        remote.insert_file("lpar1", "/u/user/deep/f.txt", b"f");

        let kind = fs.lookup_remote("/lpar1/u/user/deep/f.txt").await.unwrap();
        assert_eq!(kind, EntryKind::File);
        assert!(fs.exists("/lpar1/u/user/deep"));
        assert_eq!(remote.count("list"), 4);

        assert!(matches!(
            fs.lookup_remote("/lpar1/u/missing").await,
            Err(MirrorError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_create_directory_is_local_and_idempotent() {
        let (remote, fs) = setup();
        fs.create_directory("/lpar1/new").unwrap();
        fs.create_directory("/lpar1/new").unwrap();
        fs.create_directory("/lpar1/new/inner").unwrap();

        match fs.entry_snapshot("/lpar1/new/inner") {
            Some(Entry::Directory(dir)) => {
                assert_eq!(dir.metadata.unwrap().path, "/new/inner");
            }
            other => panic!("expected directory, got {:?}", other),
        }
        assert!(remote.calls().is_empty());
    }

    #[tokio::test]
    async fn test_conflict_namespace_directories_have_no_metadata() {
        let (_remote, fs) = setup();
        fs.create_directory("/lpar1$conflicts").unwrap();
        fs.create_directory("/lpar1$conflicts/u").unwrap();

        match fs.entry_snapshot("/lpar1$conflicts/u") {
            Some(Entry::Directory(dir)) => assert!(dir.metadata.is_none()),
            other => panic!("expected directory, got {:?}", other),
        }
    }
}
