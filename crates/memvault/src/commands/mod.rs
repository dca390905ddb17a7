//! Command implementations for mvault CLI.
//!
//! Each submodule implements the logic for a command group.

pub mod memory;
pub mod storage;

use anyhow::{Context, Result};
use colored::Colorize;
use memvault_core::LayeredMemory;

use crate::config::Config;

/// Open the vault described by `config`
pub async fn open_vault(config: &Config) -> Result<LayeredMemory> {
    LayeredMemory::open(config.vault_config())
        .await
        .with_context(|| format!("Failed to open vault at {}", config.paths.data_dir.display()))
}

/// Print the resolved configuration as TOML.
pub fn show_config(config: &Config) -> Result<()> {
    let rendered = toml::to_string_pretty(config).context("Failed to serialize config")?;

    println!("{} {}", "Config file:".bold(), Config::config_path().display());
    println!();
    print!("{}", rendered);
    Ok(())
}
