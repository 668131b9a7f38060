pub mod config;
pub mod fs;
pub mod prompt;
pub mod shell;

pub use config::handle_config_command;
pub use fs::{open_cache, run_fs_command};
pub use shell::run_shell;
