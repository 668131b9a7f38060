use clap::Parser;
use std::io::Write;
use tokio::sync::broadcast::error::TryRecvError;

use crate::cli::{split_shell_line, ShellCommand, ShellLine};
use crate::commands::fs::run_fs_command;
use crate::commands::prompt::read_stdin_line;
use mirrorfs::error::{MirrorError, Result};
use mirrorfs::{ChangeKind, MirrorFs};

/// Interactive session over one cache. Runs until `exit` or end of input.
pub async fn run_shell(fs: &MirrorFs) -> Result<()> {
    let mut events = fs.subscribe();
    println!("mirrorfs shell. Type 'help' for commands, 'exit' to leave.");

    loop {
        print!("mirrorfs> ");
        let _ = std::io::stdout().flush();

        let Some(line) = read_stdin_line().await? else {
            println!();
            break;
        };

        let words = match split_shell_line(&line) {
            Ok(words) => words,
            Err(e) => {
                eprintln!("Error: {}", e);
                continue;
            }
        };
        if words.is_empty() {
            continue;
        }

        let parsed = match ShellLine::try_parse_from(words) {
            Ok(parsed) => parsed,
            Err(e) => {
                let _ = e.print();
                continue;
            }
        };

        let result = match parsed.command {
            ShellCommand::Exit => break,
            ShellCommand::Events => {
                print_events(&mut events);
                Ok(())
            }
            ShellCommand::Fs(command) => run_fs_command(fs, command).await,
            ShellCommand::Apply { path } => fs.apply_local_over_remote(&path).await,
            ShellCommand::Adopt { path } => fs.adopt_remote_into_local(&path).await,
            ShellCommand::Dismiss { path } => fs.dismiss_conflict(&path).await,
            ShellCommand::Refresh { path } => {
                if fs.invalidate_data(&path) {
                    Ok(())
                } else {
                    Err(MirrorError::NotFound(path))
                }
            }
        };

        if let Err(e) = result {
            eprintln!("Error: {}", e);
        }
    }

    Ok(())
}

fn print_events(events: &mut tokio::sync::broadcast::Receiver<Vec<mirrorfs::ChangeEvent>>) {
    loop {
        match events.try_recv() {
            Ok(batch) => {
                for event in batch {
                    let kind = match event.kind {
                        ChangeKind::Created => "created",
                        ChangeKind::Changed => "changed",
                        ChangeKind::Deleted => "deleted",
                    };
                    println!("{:>8} {}", kind, event.path);
                }
            }
            Err(TryRecvError::Lagged(skipped)) => {
                println!("({} batches dropped)", skipped);
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }
}
