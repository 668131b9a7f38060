mod common;

use bytes::Bytes;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use common::{read_to_string, PROFILE};
use mirrorfs::{
    ConflictChoice, DeleteOptions, EntryKind, HeadlessHost, LocalDirRemote, MirrorFs, Profile,
    ProfileCache, RenameOptions, WriteOptions,
};
use tempfile::TempDir;

struct DiskCache {
    dir: TempDir,
    host: Arc<HeadlessHost>,
    fs: MirrorFs,
}

fn disk_cache(choice: Option<ConflictChoice>) -> DiskCache {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let remote = Arc::new(LocalDirRemote::new().with_root(PROFILE, dir.path()));
    let host = Arc::new(HeadlessHost::new(choice));
    let mut profiles = ProfileCache::new();
    profiles.insert(Profile::new(PROFILE));
    let fs = MirrorFs::new(remote, profiles, host.clone(), Duration::from_millis(5));
    DiskCache { dir, host, fs }
}

fn save() -> WriteOptions {
    WriteOptions {
        create: false,
        overwrite: true,
        force_upload: false,
    }
}

#[tokio::test]
async fn test_lists_and_reads_from_disk() {
    let c = disk_cache(None);
    fs::create_dir_all(c.dir.path().join("u/sub")).unwrap();
    fs::write(c.dir.path().join("u/a.txt"), "from disk").unwrap();

    let listing = c.fs.read_directory("/lpar1/u").await.unwrap();
    assert_eq!(
        listing,
        vec![
            ("a.txt".to_string(), EntryKind::File),
            ("sub".to_string(), EntryKind::Directory),
        ]
    );
    assert_eq!(
        &c.fs.read_file("/lpar1/u/a.txt").await.unwrap()[..],
        b"from disk"
    );
    assert_eq!(c.fs.stat("/lpar1/u/a.txt").await.unwrap().size, 9);
}

#[tokio::test]
async fn test_save_writes_through() {
    let c = disk_cache(None);
    fs::create_dir_all(c.dir.path().join("u")).unwrap();
    fs::write(c.dir.path().join("u/a.txt"), "v1").unwrap();

    c.fs.read_file("/lpar1/u/a.txt").await.unwrap();
    c.fs.write_file("/lpar1/u/a.txt", Bytes::from_static(b"v2"), save())
        .await
        .unwrap();

    assert_eq!(read_to_string(&c.dir.path().join("u/a.txt")), "v2");
}

#[tokio::test]
async fn test_out_of_band_edit_opens_comparison() {
    let c = disk_cache(Some(ConflictChoice::Compare));
    fs::create_dir_all(c.dir.path().join("u")).unwrap();
    fs::write(c.dir.path().join("u/a.txt"), "v1").unwrap();
    c.fs.read_file("/lpar1/u/a.txt").await.unwrap();

    fs::write(c.dir.path().join("u/a.txt"), "edited elsewhere").unwrap();
    c.fs.write_file("/lpar1/u/a.txt", Bytes::from_static(b"mine"), save())
        .await
        .unwrap();

    assert_eq!(
        read_to_string(&c.dir.path().join("u/a.txt")),
        "edited elsewhere"
    );
    let diffs = c.host.opened_diffs();
    assert_eq!(diffs.len(), 1);
    assert_eq!(&diffs[0].remote[..], b"edited elsewhere");

    c.fs.apply_local_over_remote("/lpar1/u/a.txt").await.unwrap();
    assert_eq!(read_to_string(&c.dir.path().join("u/a.txt")), "mine");
}

#[tokio::test]
async fn test_rename_and_delete_on_disk() {
    let c = disk_cache(None);
    fs::create_dir_all(c.dir.path().join("u")).unwrap();
    fs::write(c.dir.path().join("u/a.txt"), "a").unwrap();
    c.fs.read_directory("/lpar1/u").await.unwrap();

    c.fs.rename("/lpar1/u/a.txt", "/lpar1/u/b.txt", RenameOptions::default())
        .await
        .unwrap();
    assert!(!c.dir.path().join("u/a.txt").exists());
    assert!(c.dir.path().join("u/b.txt").exists());

    c.fs.delete("/lpar1/u/b.txt", DeleteOptions::default())
        .await
        .unwrap();
    assert!(!c.dir.path().join("u/b.txt").exists());
    assert!(!c.fs.exists("/lpar1/u/b.txt"));
}

#[tokio::test]
async fn test_create_remote_directory_on_disk() {
    let c = disk_cache(None);
    c.fs.read_directory("/lpar1").await.unwrap();

    c.fs.create_remote("/lpar1/new", EntryKind::Directory)
        .await
        .unwrap();
    assert!(c.dir.path().join("new").is_dir());
    assert!(c.fs.read_directory("/lpar1/new").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rename_over_existing_file_on_disk() {
    let c = disk_cache(None);
    fs::create_dir_all(c.dir.path().join("u")).unwrap();
    fs::write(c.dir.path().join("u/a.txt"), "a").unwrap();
    fs::write(c.dir.path().join("u/b.txt"), "b").unwrap();
    c.fs.read_file("/lpar1/u/a.txt").await.unwrap();
    c.fs.read_file("/lpar1/u/b.txt").await.unwrap();

    c.fs.rename(
        "/lpar1/u/a.txt",
        "/lpar1/u/b.txt",
        RenameOptions { overwrite: true },
    )
    .await
    .unwrap();

    assert!(!c.dir.path().join("u/a.txt").exists());
    assert_eq!(read_to_string(&c.dir.path().join("u/b.txt")), "a");
    assert_eq!(&c.fs.read_file("/lpar1/u/b.txt").await.unwrap()[..], b"a");

    // The carried etag matches the file now on disk.
    c.fs.write_file("/lpar1/u/b.txt", Bytes::from_static(b"edited"), save())
        .await
        .unwrap();
    assert_eq!(read_to_string(&c.dir.path().join("u/b.txt")), "edited");
    assert!(c.host.opened_diffs().is_empty());
}

#[tokio::test]
async fn test_binary_file_on_disk_is_tagged() {
    let c = disk_cache(None);
    fs::create_dir_all(c.dir.path().join("u")).unwrap();
    fs::write(c.dir.path().join("u/load.bin"), [0x00, 0xff, 0x10]).unwrap();
    fs::write(c.dir.path().join("u/a.txt"), "text").unwrap();

    c.fs.read_file("/lpar1/u/load.bin").await.unwrap();
    c.fs.read_file("/lpar1/u/a.txt").await.unwrap();

    let binary = match c.fs.entry_snapshot("/lpar1/u/load.bin") {
        Some(mirrorfs::Entry::File(file)) => file,
        other => panic!("expected a file, got {:?}", other),
    };
    assert!(binary.binary);
    assert!(binary.tag_resolved);
    match c.fs.entry_snapshot("/lpar1/u/a.txt") {
        Some(mirrorfs::Entry::File(file)) => assert!(!file.binary),
        other => panic!("expected a file, got {:?}", other),
    }
}

#[tokio::test]
async fn test_created_file_on_disk_is_etag_checked() {
    let c = disk_cache(Some(ConflictChoice::Compare));
    fs::create_dir_all(c.dir.path().join("u")).unwrap();
    c.fs.read_directory("/lpar1/u").await.unwrap();
    c.fs.create_remote("/lpar1/u/new.txt", EntryKind::File)
        .await
        .unwrap();

    fs::write(c.dir.path().join("u/new.txt"), "someone else").unwrap();
    c.fs.write_file("/lpar1/u/new.txt", Bytes::from_static(b"mine"), save())
        .await
        .unwrap();

    assert_eq!(read_to_string(&c.dir.path().join("u/new.txt")), "someone else");
    assert_eq!(c.host.opened_diffs().len(), 1);
}
