use std::cell::Cell;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use mirrorfs::{
    ConflictChoice, Entry, HeadlessHost, MemoryRemote, MirrorFs, Profile, ProfileCache,
};
use tempfile::TempDir;

pub const PROFILE: &str = "lpar1";

/// Get the path to the mirrorfs binary for testing.
#[allow(dead_code)]
pub fn get_mirrorfs_path() -> PathBuf {
    assert_cmd::cargo::cargo_bin!("mirrorfs").to_path_buf()
}

/// A cache over an in-memory store with one profile.
/// #[allow(dead_code)] because not all tests use all fields.
#[allow(dead_code)]
pub struct TestCache {
    pub remote: Arc<MemoryRemote>,
    pub host: Arc<HeadlessHost>,
    pub fs: MirrorFs,
}

#[allow(dead_code)]
impl TestCache {
    pub fn new() -> Self {
        Self::with_remote(MemoryRemote::new(), None)
    }

    pub fn answering(choice: ConflictChoice) -> Self {
        Self::with_remote(MemoryRemote::new(), Some(choice))
    }

    pub fn with_remote(remote: MemoryRemote, choice: Option<ConflictChoice>) -> Self {
        let remote = Arc::new(remote);
        let host = Arc::new(HeadlessHost::new(choice));
        let mut profiles = ProfileCache::new();
        profiles.insert(Profile::new(PROFILE));
        let fs = MirrorFs::new(
            remote.clone(),
            profiles,
            host.clone(),
            Duration::from_millis(5),
        );
        Self { remote, host, fs }
    }

    /// Panics unless `path` is a cached file.
    pub fn file(&self, path: &str) -> mirrorfs::cache::FileEntry {
        match self.fs.entry_snapshot(path) {
            Some(Entry::File(file)) => file,
            other => panic!("expected a file at {}, got {:?}", path, other),
        }
    }
}

impl Default for TestCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Isolated config directory with one profile served from a temp directory.
#[allow(dead_code)]
pub struct TestConfigContext {
    pub temp_dir: TempDir,
    pub config_dir: PathBuf,
    pub store_dir: PathBuf,
    activated: Cell<bool>,
}

impl Default for TestConfigContext {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(dead_code)]
impl TestConfigContext {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_dir = temp_dir.path().join("config");
        let store_dir = temp_dir.path().join("store");
        fs::create_dir_all(&config_dir).expect("Failed to create config dir");
        fs::create_dir_all(&store_dir).expect("Failed to create store dir");

        let config = format!(
            "[[profiles]]\nname = \"{}\"\nroot = \"{}\"\n",
            PROFILE,
            store_dir.to_string_lossy().replace('\\', "\\\\")
        );
        fs::write(config_dir.join("config.toml"), config).expect("Failed to write config");

        Self {
            temp_dir,
            config_dir,
            store_dir,
            activated: Cell::new(false),
        }
    }

    /// Set MIRRORFS_CONFIG_DIR for in-process config loading.
    pub fn activate(&self) {
        self.activated.set(true);
        env::set_var(
            "MIRRORFS_CONFIG_DIR",
            self.config_dir.to_string_lossy().to_string(),
        );
    }

    pub fn write_store_file(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.store_dir.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create store subdir");
        }
        fs::write(&path, content).expect("Failed to write store file");
        path
    }

    pub fn store_path(&self, relative: &str) -> PathBuf {
        self.store_dir.join(relative)
    }
}

impl Drop for TestConfigContext {
    fn drop(&mut self) {
        if self.activated.get() {
            env::remove_var("MIRRORFS_CONFIG_DIR");
        }
    }
}

#[allow(dead_code)]
pub fn read_to_string(path: &Path) -> String {
    fs::read_to_string(path).unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e))
}
