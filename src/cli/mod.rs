pub mod args;
pub mod validation;

pub use args::{
    Args, Commands, ConfigAction, ConflictPolicy, FsCommand, ShellCommand, ShellLine,
};
pub use validation::{split_shell_line, validate_virtual_path};
