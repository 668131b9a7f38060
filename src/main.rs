use clap::Parser;

mod cli;
mod commands;

use cli::{Args, Commands};

#[tokio::main]
async fn main() {
    match run().await {
        Ok(code) => {
            std::process::exit(code);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run() -> mirrorfs::Result<i32> {
    // stdout carries file content for `cat`, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("MIRRORFS_LOG").unwrap_or_else(|_| "info".to_string()))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Config { action } => {
            commands::handle_config_command(action)?;
            Ok(0)
        }
        Commands::Fs(command) => {
            let fs = commands::open_cache(args.on_conflict)?;
            commands::run_fs_command(&fs, command).await?;
            Ok(0)
        }
        Commands::Shell => {
            let fs = commands::open_cache(args.on_conflict)?;
            commands::run_shell(&fs).await?;
            Ok(0)
        }
    }
}
