//! Conflict resolution for rejected saves.
//!
//! When an upload fails its etag precondition the host is asked to either
//! compare or overwrite. Comparing fetches the current remote content into a
//! read-only shadow entry under `/{profile}$conflicts/...` and records the
//! pair in the shadow table; the comparison ends with
//! [`MirrorFs::apply_local_over_remote`], [`MirrorFs::adopt_remote_into_local`]
//! or [`MirrorFs::dismiss_conflict`], each of which removes the shadow entry
//! and its table row.

use bytes::Bytes;

use super::entry::{DirEntry, Entry, FileEntry, Permissions};
use super::path_resolver::{
    basename, dirname, join_path, lookup_file, lookup_file_mut, lookup_mut_silent,
    lookup_parent_mut, normalize, segments,
};
use super::{MirrorFs, WriteOptions};
use crate::error::{MirrorError, Result};
use crate::host::{ConflictChoice, DiffRequest};
use crate::notifier::ChangeEvent;
use crate::profile::{conflict_root, path_info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictOutcome {
    UserDismissed,
    Compare,
    Overwrite,
}

/// Create any missing directories along `dir_path` without metadata.
/// Returns the paths that were created.
fn ensure_shadow_dirs(root: &mut Entry, dir_path: &str) -> Result<Vec<String>> {
    let mut created = Vec::new();
    let mut current = root;
    let mut current_path = String::from("/");
    for part in segments(dir_path) {
        current_path = join_path(&current_path, part);
        let Entry::Directory(dir) = current else {
            return Err(MirrorError::NotADirectory(current_path));
        };
        if !dir.children.contains_key(part) {
            let mut shadow_dir = DirEntry::new(part, None);
            shadow_dir.was_accessed = true;
            dir.insert(shadow_dir.into());
            created.push(current_path.clone());
        }
        current = dir
            .children
            .get_mut(part)
            .ok_or_else(|| MirrorError::NotFound(current_path.clone()))?;
    }
    Ok(created)
}

impl MirrorFs {
    /// Shadow path of the comparison open for `path`, if any.
    pub fn conflict_path_for(&self, path: &str) -> Option<String> {
        self.conflicts.lock().get(&normalize(path)).cloned()
    }

    /// Accepts either side of a comparison and returns `(local, shadow)`.
    fn comparison_for(&self, path: &str) -> Option<(String, String)> {
        let path = normalize(path);
        let conflicts = self.conflicts.lock();
        if let Some(shadow) = conflicts.get(&path) {
            return Some((path, shadow.clone()));
        }
        conflicts
            .iter()
            .find(|(_, shadow)| **shadow == path)
            .map(|(local, shadow)| (local.clone(), shadow.clone()))
    }

    pub(crate) async fn handle_conflict(&self, path: &str, content: Bytes) -> Result<ConflictOutcome> {
        let name = basename(path).to_string();
        tracing::info!("Remote copy of {} changed since it was last read", path);

        match self.host.prompt_conflict(&name).await {
            None => {
                tracing::info!("Conflict prompt for {} dismissed", path);
                Ok(ConflictOutcome::UserDismissed)
            }
            Some(ConflictChoice::Compare) => {
                self.open_comparison(path, content).await?;
                Ok(ConflictOutcome::Compare)
            }
            Some(ConflictChoice::Overwrite) => {
                self.overwrite_remote(path, content).await?;
                Ok(ConflictOutcome::Overwrite)
            }
        }
    }

    async fn open_comparison(&self, path: &str, content: Bytes) -> Result<()> {
        let (meta, tag) = {
            let root = self.root.read();
            let file = lookup_file(&root, path)?;
            let meta = file
                .metadata
                .clone()
                .ok_or_else(|| MirrorError::NotFound(path.to_string()))?;
            (meta, file.tag())
        };
        let info = path_info(path).ok_or_else(|| MirrorError::NotFound(path.to_string()))?;
        let shadow_path = join_path(&conflict_root(&info.profile_name), &info.remote_path);

        let (remote_data, remote_etag) = self.fetch_remote(&meta, &tag).await?;

        let mut events = Vec::new();
        {
            let mut root = self.root.write();
            let created = ensure_shadow_dirs(&mut root, &dirname(&shadow_path))?;
            events.extend(created.iter().map(|dir| ChangeEvent::created(dir)));

            let mut shadow = FileEntry::new(basename(&shadow_path), Some(meta));
            shadow.set_data(remote_data.clone());
            shadow.conflict_data = Some(remote_data.clone());
            shadow.etag = remote_etag.clone();
            shadow.apply_tag(&tag);
            shadow.is_conflict_file = true;
            shadow.in_diff_view = true;
            shadow.was_accessed = true;
            shadow.permissions = Permissions::ReadOnly;
            lookup_parent_mut(&mut root, &shadow_path)?.insert(shadow.into());
            events.push(ChangeEvent::created(&shadow_path));

            let local = lookup_file_mut(&mut root, path)?;
            local.conflict_data = Some(content.clone());
            local.in_diff_view = true;
            if remote_etag.is_some() {
                local.etag = remote_etag;
            }
        }
        self.conflicts
            .lock()
            .insert(path.to_string(), shadow_path.clone());
        self.fire(events);

        tracing::info!("Comparing {} with {}", path, shadow_path);
        let name = basename(path);
        self.host
            .open_diff(DiffRequest {
                title: format!("{} (Remote) ↔ {}", name, name),
                remote_path: shadow_path,
                local_path: path.to_string(),
                remote: remote_data,
                local: content,
            })
            .await;
        Ok(())
    }

    async fn overwrite_remote(&self, path: &str, content: Bytes) -> Result<()> {
        let (meta, tag) = {
            let root = self.root.read();
            let file = lookup_file(&root, path)?;
            let meta = file
                .metadata
                .clone()
                .ok_or_else(|| MirrorError::NotFound(path.to_string()))?;
            (meta, file.tag())
        };

        let etag = self.upload(&meta, content, None, &tag).await?;
        {
            let mut root = self.root.write();
            let file = lookup_file_mut(&mut root, path)?;
            if etag.is_some() {
                file.etag = etag;
            }
        }
        self.host
            .status_message(&format!("Overwrite applied for {}", basename(path)));
        Ok(())
    }

    /// Finish a comparison by uploading the local side over the remote one.
    pub async fn apply_local_over_remote(&self, path: &str) -> Result<()> {
        let Some((local_path, shadow_path)) = self.comparison_for(path) else {
            tracing::debug!("No comparison open for {}", path);
            return Ok(());
        };

        let content = {
            let mut root = self.root.write();
            let file = lookup_file_mut(&mut root, &local_path)?;
            file.in_diff_view = false;
            file.force_upload = true;
            file.conflict_data
                .clone()
                .or_else(|| file.data.clone())
                .unwrap_or_default()
        };

        let written = self
            .write_file(
                &local_path,
                content,
                WriteOptions {
                    create: false,
                    overwrite: true,
                    force_upload: true,
                },
            )
            .await;
        if let Err(e) = written {
            // The comparison stays open and the next save is etag-checked again.
            if let Some(Entry::File(file)) = lookup_mut_silent(&mut self.root.write(), &local_path) {
                file.force_upload = false;
                file.in_diff_view = true;
            }
            tracing::warn!("Could not apply {} over the remote copy: {}", local_path, e);
            return Err(e);
        }

        if let Some(Entry::File(file)) = lookup_mut_silent(&mut self.root.write(), &local_path) {
            file.conflict_data = None;
        }
        self.teardown_comparison(&local_path, &shadow_path).await;
        self.host
            .status_message(&format!("Overwrite applied for {}", basename(&local_path)));
        Ok(())
    }

    /// Finish a comparison by taking the remote side as the local content.
    pub async fn adopt_remote_into_local(&self, path: &str) -> Result<()> {
        let Some((local_path, shadow_path)) = self.comparison_for(path) else {
            tracing::debug!("No comparison open for {}", path);
            return Ok(());
        };

        let (remote_data, shadow_etag) = {
            let root = self.root.read();
            let shadow = lookup_file(&root, &shadow_path)?;
            let data = shadow
                .conflict_data
                .clone()
                .or_else(|| shadow.data.clone())
                .unwrap_or_default();
            (data, shadow.etag.clone())
        };
        let (already_synced, meta, tag) = {
            let root = self.root.read();
            let local = lookup_file(&root, &local_path)?;
            (
                local.conflict_data.as_ref() == Some(&remote_data),
                local.metadata.clone(),
                local.tag(),
            )
        };

        let etag = if already_synced {
            tracing::debug!("{} already matches the remote copy", local_path);
            shadow_etag
        } else {
            let meta = meta.ok_or_else(|| MirrorError::NotFound(local_path.clone()))?;
            self.upload(&meta, remote_data.clone(), None, &tag).await?
        };

        {
            let mut root = self.root.write();
            let local = lookup_file_mut(&mut root, &local_path)?;
            local.set_data(remote_data);
            if etag.is_some() {
                local.etag = etag;
            }
            local.was_accessed = true;
            local.in_diff_view = false;
            local.conflict_data = None;
        }
        self.fire([ChangeEvent::changed(&local_path)]);
        self.teardown_comparison(&local_path, &shadow_path).await;
        self.host
            .status_message(&format!("Used remote content for {}", basename(&local_path)));
        Ok(())
    }

    /// Close a comparison without resolving it. The local entry keeps its
    /// last saved content.
    pub async fn dismiss_conflict(&self, path: &str) -> Result<()> {
        let Some((local_path, shadow_path)) = self.comparison_for(path) else {
            return Ok(());
        };
        if let Some(Entry::File(file)) = lookup_mut_silent(&mut self.root.write(), &local_path) {
            file.in_diff_view = false;
            file.conflict_data = None;
        }
        self.teardown_comparison(&local_path, &shadow_path).await;
        Ok(())
    }

    async fn teardown_comparison(&self, local_path: &str, shadow_path: &str) {
        self.conflicts.lock().remove(local_path);
        let removed = {
            let mut root = self.root.write();
            match lookup_parent_mut(&mut root, shadow_path) {
                Ok(parent) => parent.remove(basename(shadow_path)).is_some(),
                Err(_) => false,
            }
        };
        if removed {
            self.fire([ChangeEvent::deleted(shadow_path)]);
        }
        self.host.close_diff(shadow_path).await;
    }
}
