use bytes::Bytes;
use std::io::Write;
use std::sync::Arc;

use crate::cli::{validate_virtual_path, ConflictPolicy, FsCommand};
use crate::commands::prompt::CliHost;
use mirrorfs::cache::path_resolver::dirname;
use mirrorfs::cache::Permissions;
use mirrorfs::config::load_config;
use mirrorfs::error::{MirrorError, Result};
use mirrorfs::{
    CopyOptions, DeleteOptions, Entry, EntryKind, FileStat, LocalDirRemote, MirrorFs, RenameOptions,
    WriteOptions,
};

/// Build the cache over the profiles in the user's config.
pub fn open_cache(policy: ConflictPolicy) -> Result<MirrorFs> {
    let config = load_config()?;
    if config.profiles.is_empty() {
        tracing::warn!("No profiles configured; run 'mirrorfs config init' to create one");
    }
    let remote = Arc::new(LocalDirRemote::from_config(&config));
    let host = Arc::new(CliHost::new(policy));
    Ok(MirrorFs::from_config(&config, remote, host))
}

/// Make sure `path` is in the cached tree, fetching ancestors as needed.
async fn ensure_cached(fs: &MirrorFs, path: &str) -> Result<EntryKind> {
    if let Some(entry) = fs.entry_snapshot(path) {
        return Ok(entry.kind());
    }
    fs.lookup_remote(path).await
}

pub async fn run_fs_command(fs: &MirrorFs, command: FsCommand) -> Result<()> {
    match command {
        FsCommand::Ls { path } => {
            validate_virtual_path(&path)?;
            for (name, kind) in fs.read_directory(&path).await? {
                match kind {
                    EntryKind::Directory => println!("{}/", name),
                    EntryKind::File => println!("{}", name),
                }
            }
        }
        FsCommand::Cat { path } => {
            validate_virtual_path(&path)?;
            let data = fs.read_file(&path).await?;
            let mut stdout = std::io::stdout();
            stdout.write_all(&data)?;
            stdout.flush()?;
        }
        FsCommand::Stat { path, json } => {
            validate_virtual_path(&path)?;
            let stat = fs.stat(&path).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stat)?);
            } else {
                print_stat(&path, &stat);
            }
        }
        FsCommand::Put { path, file } => {
            validate_virtual_path(&path)?;
            let content = tokio::fs::read(&file).await.map_err(|e| {
                MirrorError::Config(format!("Failed to read {}: {}", file.display(), e))
            })?;
            put_file(fs, &path, Bytes::from(content)).await?;
        }
        FsCommand::Mkdir { path } => {
            validate_virtual_path(&path)?;
            fs.read_directory(&dirname(&path)).await?;
            fs.create_remote(&path, EntryKind::Directory).await?;
            println!("Created {}", path);
        }
        FsCommand::Rm { path, recursive } => {
            validate_virtual_path(&path)?;
            ensure_cached(fs, &path).await?;
            fs.delete(&path, DeleteOptions { recursive }).await?;
            println!("Deleted {}", path);
        }
        FsCommand::Mv {
            from,
            to,
            overwrite,
        } => {
            validate_virtual_path(&from)?;
            validate_virtual_path(&to)?;
            ensure_cached(fs, &from).await?;
            fs.read_directory(&dirname(&to)).await?;
            fs.rename(&from, &to, RenameOptions { overwrite }).await?;
            println!("Renamed {} to {}", from, to);
        }
        FsCommand::Cp {
            source,
            destination,
            recursive,
            overwrite,
        } => {
            validate_virtual_path(&source)?;
            validate_virtual_path(&destination)?;
            let copied = fs
                .copy(
                    &source,
                    &destination,
                    CopyOptions {
                        recursive,
                        overwrite,
                    },
                )
                .await?;
            println!("Copied {} to {}", source, copied);
        }
    }
    Ok(())
}

async fn put_file(fs: &MirrorFs, path: &str, content: Bytes) -> Result<()> {
    fs.read_directory(&dirname(path)).await?;
    if !fs.exists(path) {
        fs.create_remote(path, EntryKind::File).await?;
    }

    fs.write_file(
        path,
        content.clone(),
        WriteOptions {
            create: false,
            overwrite: true,
            force_upload: false,
        },
    )
    .await?;

    if let Some(shadow) = fs.conflict_path_for(path) {
        println!("Save of {} is waiting on the comparison at {}", path, shadow);
        return Ok(());
    }
    let saved = match fs.entry_snapshot(path) {
        Some(Entry::File(file)) => file.data.as_ref() == Some(&content),
        _ => false,
    };
    if saved {
        println!("Saved {}", path);
    } else {
        println!("Save of {} was cancelled", path);
    }
    Ok(())
}

fn print_stat(path: &str, stat: &FileStat) {
    println!("{}", path);
    println!("  kind: {}", stat.kind);
    println!("  size: {}", stat.size);
    println!("  created: {}", stat.ctime.to_rfc3339());
    println!("  modified: {}", stat.mtime.to_rfc3339());
    let permissions = match stat.permissions {
        Permissions::ReadWrite => "read-write",
        Permissions::ReadOnly => "read-only",
    };
    println!("  permissions: {}", permissions);
}
