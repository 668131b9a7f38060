use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "mirrorfs")]
#[command(about = "Browse and edit remote file stores through a lazily populated local cache")]
pub struct Args {
    #[arg(
        long,
        value_enum,
        global = true,
        default_value_t = ConflictPolicy::Prompt,
        help = "How to resolve a save rejected because the remote copy changed"
    )]
    pub on_conflict: ConflictPolicy,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Ask on stdin
    Prompt,
    /// Always show a comparison
    Compare,
    /// Always overwrite the remote copy
    Overwrite,
    /// Keep the remote copy and drop the save
    Cancel,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(flatten)]
    Fs(FsCommand),
    #[command(about = "Start an interactive session that keeps the cache between commands")]
    Shell,
    #[command(about = "Manage configuration")]
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

/// Commands that operate on virtual paths (`/{profile}/{remote path}`).
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum FsCommand {
    #[command(about = "List a directory")]
    Ls {
        #[arg(default_value = "/", help = "Virtual directory path")]
        path: String,
    },
    #[command(about = "Print a file's content")]
    Cat {
        #[arg(help = "Virtual file path")]
        path: String,
    },
    #[command(about = "Show type, times and size of an entry")]
    Stat {
        #[arg(help = "Virtual path")]
        path: String,

        #[arg(long, help = "JSON output")]
        json: bool,
    },
    #[command(about = "Upload a local file to a virtual path")]
    Put {
        #[arg(help = "Virtual file path")]
        path: String,
        #[arg(help = "Local file to read the content from")]
        file: PathBuf,
    },
    #[command(about = "Create a directory on the remote store")]
    Mkdir {
        #[arg(help = "Virtual directory path")]
        path: String,
    },
    #[command(about = "Delete a file or directory")]
    Rm {
        #[arg(help = "Virtual path")]
        path: String,

        #[arg(short, long, help = "Delete directories and their contents")]
        recursive: bool,
    },
    #[command(about = "Rename or move an entry")]
    Mv {
        #[arg(help = "Current virtual path")]
        from: String,
        #[arg(help = "New virtual path")]
        to: String,

        #[arg(long, help = "Replace an existing entry at the new path")]
        overwrite: bool,
    },
    #[command(about = "Copy an entry into a directory")]
    Cp {
        #[arg(help = "Virtual path to copy")]
        source: String,
        #[arg(help = "Virtual directory to copy into")]
        destination: String,

        #[arg(short, long, help = "Copy directories and their contents")]
        recursive: bool,

        #[arg(long, help = "Replace same-named entries instead of renaming the copy")]
        overwrite: bool,
    },
}

/// A line typed into the interactive session.
#[derive(Parser, Debug)]
#[command(name = "", no_binary_name = true)]
pub struct ShellLine {
    #[command(subcommand)]
    pub command: ShellCommand,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum ShellCommand {
    #[command(flatten)]
    Fs(FsCommand),
    #[command(about = "Finish a comparison by uploading the local content")]
    Apply {
        #[arg(help = "Local or shadow path of the comparison")]
        path: String,
    },
    #[command(about = "Finish a comparison by keeping the remote content")]
    Adopt {
        #[arg(help = "Local or shadow path of the comparison")]
        path: String,
    },
    #[command(about = "Close a comparison without resolving it")]
    Dismiss {
        #[arg(help = "Local or shadow path of the comparison")]
        path: String,
    },
    #[command(about = "Drop cached content so the next read fetches it again")]
    Refresh {
        #[arg(help = "Virtual path")]
        path: String,
    },
    #[command(about = "Print change events published since the last call")]
    Events,
    #[command(about = "Leave the session", alias = "quit")]
    Exit,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    #[command(about = "Show current configuration values")]
    Show,
    #[command(about = "Show config file path")]
    Path,
    #[command(about = "Write a default config file if none exists")]
    Init,
}
