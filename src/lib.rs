pub mod cache;
pub mod config;
pub mod error;
pub mod host;
pub mod notifier;
pub mod profile;
pub mod remote;

pub use cache::{
    ConflictOutcome, DeleteOptions, Entry, EntryKind, FileStat, MirrorFs, RenameOptions,
    WriteOptions,
};

pub use config::expand_tilde;
pub use config::get_config_path;
pub use config::load_config;
pub use config::save_config;
pub use config::Config;
pub use config::ProfileConfig;

pub use error::{MirrorError, RemoteError, Result};

pub use host::{ConflictChoice, DiffRequest, HeadlessHost, HostShell};
pub use notifier::{ChangeEvent, ChangeKind, ChangeNotifier, ChangeSubscription};
pub use profile::{Profile, ProfileCache};
pub use remote::{CopyOptions, FileTag, LocalDirRemote, MemoryRemote, RemoteAccessor};
