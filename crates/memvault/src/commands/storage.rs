//! Storage commands: key rotation and backups.

use anyhow::{Context, Result};
use colored::Colorize;
use memvault_core::utils::format_datetime;
use memvault_core::BackupReason;

use super::open_vault;
use crate::cli::{BackupAction, BackupCommand};
use crate::config::Config;

/// Rotate the snapshot key now.
pub async fn rotate_key(config: &Config) -> Result<()> {
    let vault = open_vault(config).await?;
    let before = vault.storage().key_fingerprint().await;
    vault.storage().rotate_key().await.context("Key rotation failed")?;
    let after = vault.storage().key_fingerprint().await;
    vault.shutdown().await.context("Failed to save vault")?;

    println!("{} Rotated snapshot key", "✓".green());
    println!("  {} -> {}", before.dimmed(), after.cyan());
    println!(
        "  {} backups taken before this point can no longer be restored",
        "⚠".yellow()
    );
    Ok(())
}

/// Execute backup command.
pub async fn backup(cmd: BackupCommand, config: &Config) -> Result<()> {
    match cmd.action {
        BackupAction::List { json } => list(json, config).await,
        BackupAction::Create => create(config).await,
        BackupAction::Restore { name } => restore(&name, config).await,
    }
}

async fn list(json: bool, config: &Config) -> Result<()> {
    let vault = open_vault(config).await?;
    let backups = vault.storage().list_backups().await.context("Failed to list backups")?;
    vault.shutdown().await.context("Failed to save vault")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&backups)?);
        return Ok(());
    }

    if backups.is_empty() {
        println!("{} No backups yet", "⚠".yellow());
        return Ok(());
    }

    println!("{} {} backups (newest first):", "✓".green(), backups.len());
    println!();
    for backup in &backups {
        println!(
            "  {}  {:<12} {:>8} bytes  {}",
            backup.name,
            backup.reason.as_str().cyan(),
            backup.size_bytes,
            format_datetime(&backup.created_at).dimmed()
        );
    }
    Ok(())
}

async fn create(config: &Config) -> Result<()> {
    let mut vault = open_vault(config).await?;
    // make sure the snapshot on disk reflects the current tiers
    vault.force_save().await.context("Failed to save snapshot")?;
    let created = vault
        .storage()
        .create_backup(BackupReason::Manual)
        .await
        .context("Failed to create backup")?;
    vault.shutdown().await.context("Failed to save vault")?;

    match created {
        Some(backup) => {
            println!("{} Created backup {}", "✓".green(), backup.name.cyan());
            println!("  Size: {} bytes", backup.size_bytes);
        }
        None => println!("{} Nothing to back up yet", "⚠".yellow()),
    }
    Ok(())
}

async fn restore(name: &str, config: &Config) -> Result<()> {
    let mut vault = open_vault(config).await?;
    vault
        .storage()
        .restore_from_backup(name)
        .await
        .with_context(|| format!("Failed to restore backup {}", name))?;

    // reload so shutdown writes back the restored tiers, not the old ones
    let loaded = vault.force_load().await.context("Failed to load restored snapshot")?;
    vault.shutdown().await.context("Failed to save vault")?;

    println!("{} Restored {}", "✓".green(), name.cyan());
    println!("  {} memories loaded into short/mid-term", loaded);
    Ok(())
}
