//! mvault - encrypted tiered memory from the command line
//!
//! Every command opens the vault, does its work and shuts the vault down.
//! Shutdown flushes the in-memory tiers to the encrypted snapshot only when
//! the command changed them, so read-only commands never add backups.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod cli;
mod commands;
mod config;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so `--json` output stays clean
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive("memvault=info".parse()?))
        .init();

    let cli = Cli::parse();

    let config = config::Config::load()?.with_data_dir(cli.data_dir);

    match cli.command {
        Commands::Add(cmd) => commands::memory::add(cmd, &config).await,
        Commands::Search(cmd) => commands::memory::search(cmd, &config).await,
        Commands::Status { json } => commands::memory::status(json, &config).await,
        Commands::Save => commands::memory::save(&config).await,
        Commands::Archive { json } => commands::memory::archive(json, &config).await,
        Commands::RotateKey => commands::storage::rotate_key(&config).await,
        Commands::Backup(cmd) => commands::storage::backup(cmd, &config).await,
        Commands::Config => commands::show_config(&config),
        Commands::Version => {
            println!("mvault {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
