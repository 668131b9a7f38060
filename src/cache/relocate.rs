use bytes::Bytes;
use std::collections::HashSet;

use super::entry::{DirEntry, Entry, EntryKind, EntryMetadata, FileEntry};
use super::path_resolver::{
    basename, dirname, join_path, lookup, lookup_dir, lookup_dir_mut, lookup_mut_silent,
    lookup_parent, lookup_parent_mut, lookup_silent, normalize, rebase_remote_paths,
    rewrite_prefix,
};
use super::{DeleteOptions, MirrorFs, RenameOptions};
use crate::error::{MirrorError, RemoteError, Result};
use crate::notifier::ChangeEvent;
use crate::remote::{CopyOptions, FileTag, PutOptions};

/// `name` if it is free, otherwise the first free `stem (n).ext`.
pub fn disambiguate_name(name: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(name) {
        return name.to_string();
    }

    let (stem, extension) = match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    };
    let mut count = 1;
    loop {
        let candidate = format!("{} ({}){}", stem, count, extension);
        if !taken.contains(&candidate) {
            return candidate;
        }
        count += 1;
    }
}

fn is_within(path: &str, ancestor: &str) -> bool {
    rewrite_prefix(path, ancestor, ancestor).is_some()
}

impl MirrorFs {
    /// Detach `old_path` and reattach it as `new_path`. Returns the moved
    /// entry's metadata, or `None` for the metadata when it has none.
    /// Fails without touching the tree when either parent is missing.
    fn relocate_local(
        &self,
        old_path: &str,
        new_path: &str,
    ) -> Result<Option<EntryMetadata>> {
        let mut root = self.root.write();
        lookup_parent(&root, new_path)?;
        let old_parent = lookup_parent_mut(&mut root, old_path)?;
        let mut entry = old_parent
            .remove(basename(old_path))
            .ok_or_else(|| MirrorError::NotFound(old_path.to_string()))?;
        entry.set_name(basename(new_path));
        let metadata = entry.metadata().cloned();
        lookup_parent_mut(&mut root, new_path)?.insert(entry);
        Ok(metadata)
    }

    fn rebase_local(&self, path: &str, from: &str, to: &str) {
        let mut root = self.root.write();
        if let Some(entry) = lookup_mut_silent(&mut root, path) {
            rebase_remote_paths(entry, from, to);
        }
    }

    /// Keep open comparisons attached to entries that moved.
    fn rekey_conflicts(&self, old_path: &str, new_path: &str) {
        let mut conflicts = self.conflicts.lock();
        let moved: Vec<String> = conflicts
            .keys()
            .filter(|local| is_within(local, old_path))
            .cloned()
            .collect();
        for local in moved {
            if let (Some(shadow), Some(renamed)) = (
                conflicts.remove(&local),
                rewrite_prefix(&local, old_path, new_path),
            ) {
                conflicts.insert(renamed, shadow);
            }
        }
    }

    /// Check that `old_path` can be moved to `new_path` and work out the
    /// remote paths on both sides.
    fn plan_relocation(
        &self,
        old_path: &str,
        new_path: &str,
        overwrite: bool,
    ) -> Result<(Option<EntryMetadata>, Option<EntryMetadata>)> {
        if is_within(new_path, old_path) {
            return Err(MirrorError::NoPermissions(format!(
                "Cannot move {} into itself",
                old_path
            )));
        }
        let source = {
            let root = self.root.read();
            if !overwrite && lookup_silent(&root, new_path).is_some() {
                return Err(MirrorError::AlreadyExists(new_path.to_string()));
            }
            lookup(&root, old_path)?.metadata().cloned()
        };
        let target = self.metadata_for_path(new_path)?;
        if let (Some(from), Some(to)) = (&source, &target) {
            if from.profile.name != to.profile.name {
                return Err(MirrorError::UnsupportedOperation(format!(
                    "Cannot move {} across profiles",
                    old_path
                )));
            }
        }
        Ok((source, target))
    }

    /// Drop comparisons whose local file sits at or below `path`.
    fn forget_conflicts_within(&self, path: &str) {
        self.conflicts
            .lock()
            .retain(|local, _| !is_within(local, path));
    }

    /// Move the cached entry after the remote side has moved. A destination
    /// parent that is not cached yet is listed on access instead.
    fn finish_relocation(
        &self,
        old_path: &str,
        new_path: &str,
        remote_paths: (&str, &str),
    ) -> Vec<ChangeEvent> {
        let mut events = vec![ChangeEvent::deleted(old_path)];
        match self.relocate_local(old_path, new_path) {
            Ok(_) => {
                self.rebase_local(new_path, remote_paths.0, remote_paths.1);
                self.forget_conflicts_within(new_path);
                self.rekey_conflicts(old_path, new_path);
                events.push(ChangeEvent::created(new_path));
            }
            Err(e) => {
                tracing::debug!("Dropping {} from the cache after move: {}", old_path, e);
                self.remove_entry_if_exists(old_path);
            }
        }
        events
    }

    /// Rename an entry on the remote store, then in the cache. With
    /// `overwrite`, an existing remote target is deleted first. A failed
    /// remote call leaves the cache as it was.
    pub async fn rename(&self, old_path: &str, new_path: &str, options: RenameOptions) -> Result<()> {
        let old_path = normalize(old_path);
        let new_path = normalize(new_path);
        if old_path == new_path {
            return Ok(());
        }

        let (source, target) = self.plan_relocation(&old_path, &new_path, options.overwrite)?;
        let events = match (source, target) {
            (Some(from), Some(to)) => {
                tracing::debug!(
                    "Renaming {}:{} to {}",
                    from.profile.name,
                    from.path,
                    to.path
                );
                self.rename_remote(&from, &to, options.overwrite).await?;
                self.finish_relocation(&old_path, &new_path, (&from.path, &to.path))
            }
            _ => {
                self.relocate_local(&old_path, &new_path)?;
                self.forget_conflicts_within(&new_path);
                self.rekey_conflicts(&old_path, &new_path);
                vec![
                    ChangeEvent::deleted(&old_path),
                    ChangeEvent::created(&new_path),
                ]
            }
        };

        self.fire(events);
        Ok(())
    }

    async fn rename_remote(
        &self,
        from: &EntryMetadata,
        to: &EntryMetadata,
        overwrite: bool,
    ) -> Result<()> {
        match self.remote.rename(&from.profile, &from.path, &to.path).await {
            Ok(()) => Ok(()),
            Err(RemoteError::AlreadyExists(_)) if overwrite => {
                tracing::debug!("Replacing {}:{}", to.profile.name, to.path);
                self.remote.delete(&to.profile, &to.path, true).await?;
                self.remote
                    .rename(&from.profile, &from.path, &to.path)
                    .await?;
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Remote rename of {} failed: {}", from.path, e);
                Err(e.into())
            }
        }
    }

    /// Move an entry on the remote store, then in the cache.
    pub async fn move_entry(&self, old_path: &str, new_path: &str) -> Result<()> {
        let old_path = normalize(old_path);
        let new_path = normalize(new_path);

        let (source, target) = self.plan_relocation(&old_path, &new_path, false)?;
        let (Some(from), Some(to)) = (source, target) else {
            return Err(MirrorError::UnsupportedOperation(format!(
                "{} has no remote counterpart",
                old_path
            )));
        };

        tracing::debug!("Moving {}:{} to {}", from.profile.name, from.path, to.path);
        self.remote
            .move_entry(&from.profile, &from.path, &to.path)
            .await?;

        let events = self.finish_relocation(&old_path, &new_path, (&from.path, &to.path));
        self.fire(events);
        Ok(())
    }

    /// Delete an entry remotely, then from the cache. Conflict shadow
    /// entries only exist locally.
    pub async fn delete(&self, path: &str, options: DeleteOptions) -> Result<()> {
        let path = normalize(path);
        let name = basename(&path).to_string();

        let (metadata, kind, is_shadow) = {
            let root = self.root.read();
            let parent = lookup_parent(&root, &path)?;
            let entry = parent
                .children
                .get(&name)
                .ok_or_else(|| MirrorError::NotFound(path.clone()))?;
            (entry.metadata().cloned(), entry.kind(), entry.is_conflict_file())
        };

        match metadata {
            Some(meta) if !is_shadow => {
                let recursive = options.recursive && kind == EntryKind::Directory;
                tracing::debug!(
                    "Deleting {}:{} (recursive: {})",
                    meta.profile.name,
                    meta.path,
                    recursive
                );
                self.remote
                    .delete(&meta.profile, &meta.path, recursive)
                    .await?;
            }
            _ => tracing::debug!("{} has no remote counterpart, removing locally", path),
        }

        {
            let mut root = self.root.write();
            lookup_parent_mut(&mut root, &path)?.remove(&name);
        }
        if is_shadow {
            self.forget_shadow(&path);
        }

        self.fire([
            ChangeEvent::changed(&dirname(&path)),
            ChangeEvent::deleted(&path),
        ]);
        Ok(())
    }

    fn forget_shadow(&self, shadow_path: &str) {
        let local = {
            let mut conflicts = self.conflicts.lock();
            let local = conflicts
                .iter()
                .find(|(_, shadow)| shadow.as_str() == shadow_path)
                .map(|(local, _)| local.clone());
            if let Some(local) = &local {
                conflicts.remove(local);
            }
            local
        };
        if let Some(local) = local {
            if let Some(Entry::File(file)) = lookup_mut_silent(&mut self.root.write(), &local) {
                file.in_diff_view = false;
                file.conflict_data = None;
            }
        }
    }

    /// Create an empty file or directory on the remote store and in the cache.
    pub async fn create_remote(&self, path: &str, kind: EntryKind) -> Result<()> {
        let path = normalize(path);
        let name = basename(&path).to_string();

        let meta = {
            let root = self.root.read();
            let parent = lookup_parent(&root, &path)?;
            if parent.children.contains_key(&name) {
                return Err(MirrorError::AlreadyExists(path));
            }
            self.child_metadata(parent, &path)?.ok_or_else(|| {
                MirrorError::NoPermissions(format!("{} is not backed by a remote store", path))
            })?
        };

        tracing::debug!("Creating {} {}:{}", kind, meta.profile.name, meta.path);
        self.remote.create(&meta.profile, &meta.path, kind).await?;
        let etag = match kind {
            EntryKind::File => match self.fetch_remote(&meta, &FileTag::default()).await {
                Ok((_, etag)) => etag,
                Err(e) => {
                    tracing::warn!("Created {} but could not read its etag: {}", path, e);
                    None
                }
            },
            EntryKind::Directory => None,
        };

        {
            let mut root = self.root.write();
            let parent = lookup_parent_mut(&mut root, &path)?;
            let entry: Entry = match kind {
                EntryKind::Directory => {
                    let mut dir = DirEntry::new(&name, Some(meta));
                    dir.was_accessed = true;
                    dir.into()
                }
                EntryKind::File => {
                    let mut file = FileEntry::new(&name, Some(meta));
                    file.set_data(Bytes::new());
                    file.etag = etag;
                    file.was_accessed = true;
                    file.into()
                }
            };
            parent.insert(entry);
        }
        self.fire([
            ChangeEvent::changed(&dirname(&path)),
            ChangeEvent::created(&path),
        ]);
        Ok(())
    }

    /// Copy `source` into the directory `destination`, returning the path
    /// of the copy. Name collisions get a ` (n)` suffix unless `overwrite`
    /// is set. Directories are copied child by child.
    pub async fn copy(&self, source: &str, destination: &str, options: CopyOptions) -> Result<String> {
        let source = normalize(source);
        let destination = normalize(destination);
        if is_within(&destination, &source) {
            return Err(MirrorError::NoPermissions(format!(
                "Cannot copy {} into itself",
                source
            )));
        }
        for path in [&source, &destination] {
            if !self.exists(path) {
                self.lookup_remote(path).await?;
            }
        }

        let top = self.copy_entry(&source, &destination, options).await?;
        let is_dir = matches!(
            lookup_silent(&self.root.read(), &source),
            Some(Entry::Directory(_))
        );
        if !is_dir || !options.recursive {
            return Ok(top);
        }

        let mut pending = vec![(source, top.clone())];
        while let Some((from_dir, to_dir)) = pending.pop() {
            for (name, kind) in self.read_directory(&from_dir).await? {
                let child = join_path(&from_dir, &name);
                let copied = self.copy_entry(&child, &to_dir, options).await?;
                if kind == EntryKind::Directory {
                    pending.push((child, copied));
                }
            }
        }
        Ok(top)
    }

    /// Copy one entry, without its children, into `destination`.
    async fn copy_entry(&self, source: &str, destination: &str, options: CopyOptions) -> Result<String> {
        let (source_meta, kind, tag) = {
            let root = self.root.read();
            let entry = lookup(&root, source)?;
            let meta = entry.metadata().cloned().ok_or_else(|| {
                MirrorError::UnsupportedOperation(format!("{} has no remote counterpart", source))
            })?;
            let tag = match entry {
                Entry::File(file) => file.tag(),
                Entry::Directory(_) => FileTag::default(),
            };
            (meta, entry.kind(), tag)
        };
        let dest_meta = {
            let root = self.root.read();
            lookup_dir(&root, destination)?.metadata.clone().ok_or_else(|| {
                MirrorError::NoPermissions(format!(
                    "{} is not backed by a remote store",
                    destination
                ))
            })?
        };

        let listing = self.remote.list(&dest_meta.profile, &dest_meta.path).await?;
        let taken: HashSet<String> = listing
            .into_iter()
            .filter(|item| !item.is_pseudo())
            .map(|item| item.name)
            .collect();
        let name = if options.overwrite {
            basename(source).to_string()
        } else {
            disambiguate_name(basename(source), &taken)
        };
        let target = dest_meta.child(&name);
        let target_path = join_path(destination, &name);
        tracing::debug!("Copying {} to {}", source, target_path);

        match kind {
            EntryKind::Directory => {
                match self
                    .remote
                    .create(&target.profile, &target.path, EntryKind::Directory)
                    .await
                {
                    Ok(()) => {}
                    Err(RemoteError::AlreadyExists(_)) if options.overwrite => {}
                    Err(e) => return Err(e.into()),
                }
            }
            EntryKind::File => {
                self.copy_file_content(source, &source_meta, &target, &tag, options)
                    .await?;
            }
        }

        {
            let mut root = self.root.write();
            if let Ok(dir) = lookup_dir_mut(&mut root, destination) {
                let keep_existing = matches!(
                    (dir.children.get(&name), kind),
                    (Some(Entry::Directory(_)), EntryKind::Directory)
                );
                if !keep_existing {
                    let entry: Entry = match kind {
                        EntryKind::Directory => DirEntry::new(&name, Some(target)).into(),
                        EntryKind::File => {
                            let mut file = FileEntry::new(&name, Some(target));
                            file.binary = tag.binary;
                            file.encoding = tag.encoding.clone();
                            file.into()
                        }
                    };
                    dir.insert(entry);
                }
            }
        }
        self.fire([ChangeEvent::created(&target_path)]);
        Ok(target_path)
    }

    /// Server-side copy within a profile, falling back to uploading the
    /// cached content when the backend has no copy.
    async fn copy_file_content(
        &self,
        source: &str,
        source_meta: &EntryMetadata,
        target: &EntryMetadata,
        tag: &FileTag,
        options: CopyOptions,
    ) -> Result<()> {
        if source_meta.profile.name == target.profile.name {
            let copy_options = CopyOptions {
                recursive: false,
                overwrite: options.overwrite,
            };
            match self
                .remote
                .copy(&source_meta.profile, &source_meta.path, &target.path, &copy_options)
                .await
            {
                Ok(()) => return Ok(()),
                Err(RemoteError::Unsupported(_)) => {
                    tracing::debug!("Backend has no copy, uploading {} instead", source);
                }
                Err(e) => return Err(e.into()),
            }
        }

        let data = self.read_file(source).await?;
        let put_options = PutOptions {
            return_etag: false,
            ..PutOptions::new(&target.profile, tag, None)
        };
        self.remote
            .put(&target.profile, &target.path, data, &put_options)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn taken(names: &[&str]) -> HashSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[rstest]
    #[case("a.txt", &[], "a.txt")]
    #[case("a.txt", &["a.txt"], "a (1).txt")]
    #[case("a.txt", &["a.txt", "a (1).txt"], "a (2).txt")]
    #[case("dir", &["dir"], "dir (1)")]
    #[case(".profile", &[".profile"], ".profile (1)")]
    #[case("a.tar.gz", &["a.tar.gz"], "a.tar (1).gz")]
    fn test_disambiguate_name(#[case] name: &str, #[case] existing: &[&str], #[case] expected: &str) {
        assert_eq!(disambiguate_name(name, &taken(existing)), expected);
    }

    #[test]
    fn test_is_within() {
        assert!(is_within("/p/a/b", "/p/a"));
        assert!(is_within("/p/a", "/p/a"));
        assert!(!is_within("/p/ab", "/p/a"));
    }
}
