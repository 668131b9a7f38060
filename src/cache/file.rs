use bytes::Bytes;

use super::entry::{EntryMetadata, FileEntry};
use super::path_resolver::{basename, lookup_file, lookup_file_mut, lookup_parent_mut, normalize};
use super::{ConflictOutcome, MirrorFs, WriteOptions};
use crate::cache::entry::Entry;
use crate::error::{MirrorError, RemoteError, RemoteResult, Result};
use crate::notifier::ChangeEvent;
use crate::remote::{BufferBuilder, FileTag, GetOptions, PutOptions};

/// An upload decided under the tree lock and carried out after it is released.
struct PendingUpload {
    meta: EntryMetadata,
    etag: Option<String>,
    tag: FileTag,
}

impl MirrorFs {
    /// Return the content of a file, fetching it on first read.
    pub async fn read_file(&self, path: &str) -> Result<Bytes> {
        let path = normalize(path);
        if !self.exists(&path) {
            self.lookup_remote(&path).await?;
        }

        let needs_fetch = {
            let root = self.root.read();
            let file = lookup_file(&root, &path)?;
            if file.metadata.is_none() {
                return Err(MirrorError::NotFound(format!(
                    "No profile is associated with {}",
                    path
                )));
            }
            file.needs_fetch()
        };
        if needs_fetch {
            self.fetch_file(&path).await?;
        }

        let root = self.root.read();
        Ok(lookup_file(&root, &path)?.data.clone().unwrap_or_default())
    }

    /// Re-read a file's content and etag from the remote store.
    pub async fn fetch_file(&self, path: &str) -> Result<()> {
        let path = normalize(path);
        let (meta, tag, tag_resolved) = {
            let root = self.root.read();
            let file = lookup_file(&root, &path)?;
            let meta = file
                .metadata
                .clone()
                .ok_or_else(|| MirrorError::NotFound(path.clone()))?;
            (meta, file.tag(), file.tag_resolved)
        };
        let tag = if tag_resolved {
            tag
        } else {
            self.resolve_tag(&path, &meta, tag).await
        };

        let (data, etag) = self.fetch_remote(&meta, &tag).await?;

        {
            let mut root = self.root.write();
            let file = lookup_file_mut(&mut root, &path)?;
            file.set_data(data);
            if etag.is_some() {
                file.etag = etag;
            }
            file.was_accessed = true;
        }
        self.fire([ChangeEvent::changed(&path)]);
        Ok(())
    }

    /// Ask the store how the file is transferred. A store without tags
    /// leaves `current` in place; a failed lookup is retried on the next fetch.
    async fn resolve_tag(&self, path: &str, meta: &EntryMetadata, current: FileTag) -> FileTag {
        let tag = match self.remote.file_tag(&meta.profile, &meta.path).await {
            Ok(found) => found.unwrap_or(current),
            Err(e) => {
                tracing::warn!("Could not read the tag of {}: {}", path, e);
                return current;
            }
        };
        tracing::debug!(
            "{} is {}",
            path,
            if tag.binary { "binary" } else { "text" }
        );
        if let Ok(file) = lookup_file_mut(&mut self.root.write(), path) {
            file.apply_tag(&tag);
        }
        tag
    }

    /// Stream the remote content of `meta` into memory.
    pub(crate) async fn fetch_remote(
        &self,
        meta: &EntryMetadata,
        tag: &FileTag,
    ) -> RemoteResult<(Bytes, Option<String>)> {
        tracing::debug!("Fetching {}:{}", meta.profile.name, meta.path);
        let options = GetOptions::new(&meta.profile, tag);
        let mut sink = BufferBuilder::new();
        let response = self
            .remote
            .get(&meta.profile, &meta.path, &options, &mut sink)
            .await?;
        tracing::trace!("Fetched {} bytes from {}", sink.len(), meta.path);
        Ok((sink.read(), response.etag))
    }

    /// Put `content` and read the new etag back. `etag` is sent as the
    /// precondition when present.
    pub(crate) async fn upload(
        &self,
        meta: &EntryMetadata,
        content: Bytes,
        etag: Option<String>,
        tag: &FileTag,
    ) -> RemoteResult<Option<String>> {
        tracing::debug!(
            "Uploading {} bytes to {}:{} (precondition: {})",
            content.len(),
            meta.profile.name,
            meta.path,
            etag.as_deref().unwrap_or("none")
        );
        let options = PutOptions::new(&meta.profile, tag, etag);
        let response = self
            .remote
            .put(&meta.profile, &meta.path, content, &options)
            .await?;

        match self.fetch_remote(meta, tag).await {
            Ok((_, Some(etag))) => Ok(Some(etag)),
            Ok((_, None)) => Ok(response.etag),
            Err(e) => {
                tracing::warn!("Saved {} but could not refresh its etag: {}", meta.path, e);
                Ok(response.etag)
            }
        }
    }

    /// Write a file. New files stay local until their next write; existing
    /// files are uploaded with their etag as a precondition, and a rejected
    /// precondition starts conflict resolution instead of failing.
    pub async fn write_file(&self, path: &str, content: Bytes, options: WriteOptions) -> Result<()> {
        let path = normalize(path);
        let name = basename(&path).to_string();

        let mut events = Vec::new();
        let pending = {
            let mut root = self.root.write();
            let parent = lookup_parent_mut(&mut root, &path)?;

            if !parent.children.contains_key(&name) {
                if !options.create {
                    return Err(MirrorError::NotFound(path));
                }
                let metadata = self.child_metadata(parent, &path)?;
                let mut file = FileEntry::new(&name, metadata);
                file.set_data(content.clone());
                parent.insert(file.into());
                events.push(ChangeEvent::created(&path));
                None
            } else {
                let file = match parent.children.get_mut(&name) {
                    Some(Entry::File(file)) => file,
                    _ => return Err(MirrorError::IsADirectory(path)),
                };
                if options.create && !options.overwrite {
                    return Err(MirrorError::AlreadyExists(path));
                }
                if file.is_conflict_file {
                    return Err(MirrorError::NoPermissions(path));
                }

                if file.in_diff_view {
                    tracing::debug!("{} is being compared, holding the edit locally", path);
                    file.conflict_data = Some(content);
                    return Ok(());
                }

                if !file.was_accessed && content.is_empty() {
                    file.set_data(content.clone());
                    events.push(ChangeEvent::changed(&path));
                    None
                } else {
                    let meta = file.metadata.clone().ok_or_else(|| {
                        MirrorError::NotFound(format!("No profile is associated with {}", path))
                    })?;
                    let force = options.force_upload || file.force_upload;
                    Some(PendingUpload {
                        meta,
                        etag: if force { None } else { file.etag.clone() },
                        tag: file.tag(),
                    })
                }
            }
        };

        let Some(pending) = pending else {
            self.fire(events);
            return Ok(());
        };

        let new_etag = match self
            .upload(&pending.meta, content.clone(), pending.etag, &pending.tag)
            .await
        {
            Ok(etag) => etag,
            Err(RemoteError::PreconditionFailed(_)) => {
                match self.handle_conflict(&path, content.clone()).await? {
                    ConflictOutcome::Overwrite => None,
                    outcome => {
                        tracing::info!("Save of {} ended with {:?}", path, outcome);
                        return Ok(());
                    }
                }
            }
            Err(e) => return Err(e.into()),
        };

        {
            let mut root = self.root.write();
            let file = lookup_file_mut(&mut root, &path)?;
            file.set_data(content);
            if new_etag.is_some() {
                file.etag = new_etag;
            }
            file.was_accessed = true;
            file.force_upload = false;
        }
        self.fire([ChangeEvent::changed(&path)]);
        Ok(())
    }
}
