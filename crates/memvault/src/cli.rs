//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Encrypted tiered memory vault
///
/// Short-term ring, mid-term pool and an encrypted long-term archive.
#[derive(Parser, Debug)]
#[command(name = "mvault")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Vault data directory (overrides the config file)
    #[arg(long, global = true, env = "MEMVAULT_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Remember something
    Add(AddCommand),

    /// Search every tier
    Search(SearchCommand),

    /// Show storage health and tier occupancy
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Flush the in-memory tiers to the encrypted snapshot
    Save,

    /// Archive long-term memories past retention and print them
    Archive {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Rotate the snapshot encryption key now
    RotateKey,

    /// Snapshot backups (list, create, restore)
    Backup(BackupCommand),

    /// Show the resolved configuration
    Config,

    /// Show version information
    Version,
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory Commands
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct AddCommand {
    /// Content to remember
    pub content: String,

    /// Importance from 0.0 to 1.0; 0.8 and above is critical
    #[arg(short, long, default_value = "0.5")]
    pub priority: f64,

    /// Metadata as key=value (repeatable; values parse as JSON when they can)
    #[arg(short, long = "meta", action = clap::ArgAction::Append)]
    pub meta: Vec<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct SearchCommand {
    /// Case-insensitive text to look for
    pub query: String,

    /// Only memories created at or after this time (RFC 3339 or YYYY-MM-DD)
    #[arg(long)]
    pub since: Option<String>,

    /// Only memories created at or before this time (RFC 3339 or YYYY-MM-DD)
    #[arg(long)]
    pub until: Option<String>,

    /// Maximum results (default: 20)
    #[arg(short, long, default_value = "20")]
    pub limit: usize,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Backup Commands
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct BackupCommand {
    #[command(subcommand)]
    pub action: BackupAction,
}

#[derive(Subcommand, Debug)]
pub enum BackupAction {
    /// List backups, newest first
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Back up the current snapshot
    Create,

    /// Replace the snapshot with a backup
    Restore {
        /// Backup file name (from `backup list`)
        name: String,
    },
}
