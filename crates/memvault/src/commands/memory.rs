//! Memory commands: add, search, status, save, archive.

use anyhow::{anyhow, bail, Context, Result};
use colored::Colorize;
use memvault_core::utils::{format_datetime, parse_datetime};
use memvault_core::{MemoryItem, Metadata, TierKind};

use super::open_vault;
use crate::cli::{AddCommand, SearchCommand};
use crate::config::Config;

/// Remember something new.
pub async fn add(cmd: AddCommand, config: &Config) -> Result<()> {
    if !(0.0..=1.0).contains(&cmd.priority) {
        bail!("Priority must be between 0.0 and 1.0, got {}", cmd.priority);
    }
    let metadata = parse_metadata(&cmd.meta)?;

    let mut vault = open_vault(config).await?;
    let item = vault
        .add_memory(cmd.content, cmd.priority, (!metadata.is_empty()).then_some(metadata))
        .context("Failed to add memory")?;
    let tier = vault.tier_of(&item.id).context("Failed to locate stored memory")?;
    vault.shutdown().await.context("Failed to save vault")?;

    if cmd.json {
        let row = serde_json::json!({ "tier": tier, "item": item });
        println!("{}", serde_json::to_string_pretty(&row)?);
        return Ok(());
    }

    match tier {
        Some(tier) => println!("{} Stored in {} memory", "✓".green(), tier_name(tier).cyan()),
        None => println!("{} Stored, then evicted by the sweep", "⚠".yellow()),
    }
    println!("  ID: {}", item.id);
    println!("  Priority: {:.2}", item.priority);
    Ok(())
}

/// Search every tier.
pub async fn search(cmd: SearchCommand, config: &Config) -> Result<()> {
    let since = parse_bound(cmd.since.as_deref(), "--since")?;
    let until = parse_bound(cmd.until.as_deref(), "--until")?;
    let time_range = match (since, until) {
        (None, None) => None,
        (start, end) => Some((
            start.unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC),
            end.unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC),
        )),
    };

    let mut vault = open_vault(config).await?;
    let mut matches = vault.search(&cmd.query, time_range);
    matches.truncate(cmd.limit);
    vault.shutdown().await.context("Failed to save vault")?;

    if cmd.json {
        let rows: Vec<serde_json::Value> = matches
            .iter()
            .map(|m| serde_json::json!({ "tier": m.tier, "item": m.item }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if matches.is_empty() {
        println!("{} No memories found matching \"{}\"", "⚠".yellow(), cmd.query);
        return Ok(());
    }

    println!("{} Found {} memories:", "✓".green(), matches.len());
    println!();
    for (i, m) in matches.iter().enumerate() {
        print_item(i + 1, &m.item, Some(m.tier));
    }
    Ok(())
}

/// Show storage health and tier occupancy.
pub async fn status(json: bool, config: &Config) -> Result<()> {
    let vault = open_vault(config).await?;
    let status = vault.get_storage_status().await.context("Failed to read storage status")?;
    let fingerprint = vault.storage().key_fingerprint().await;
    vault.shutdown().await.context("Failed to save vault")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let health = &status.health;
    let healthy = if health.healthy { "healthy".green() } else { "FAILING".red() };

    println!("{}", "Vault Status".bold());
    println!("  Data dir:   {}", config.paths.data_dir.display());
    println!("  Encryption: {}", healthy);
    println!(
        "  Key:        {} (age {}d{})",
        fingerprint,
        health.key_age_secs / 86400,
        if health.rotation_due { ", rotation due" } else { "" }
    );
    println!(
        "  Snapshot:   {}",
        if health.data_file_exists {
            format!("{} bytes", health.data_size_bytes)
        } else {
            "none yet".to_string()
        }
    );
    println!("  Backups:    {}", health.backup_count);
    println!("  Errors:     {}", health.error_count);
    println!();
    println!("{}", "Tiers".bold());
    println!("  {:<11} {:>6} / {}", "short-term", status.short_term_count, status.short_term_capacity);
    println!("  {:<11} {:>6} / {}", "mid-term", status.mid_term_count, status.mid_term_capacity);
    println!(
        "  {:<11} {:>6}   ({} index tokens)",
        "long-term", status.long_term_count, status.long_term_index_tokens
    );
    Ok(())
}

/// Flush the in-memory tiers to disk.
pub async fn save(config: &Config) -> Result<()> {
    let mut vault = open_vault(config).await?;
    vault.force_save().await.context("Failed to save snapshot")?;
    vault.shutdown().await.context("Failed to save vault")?;

    println!("{} Snapshot saved", "✓".green());
    Ok(())
}

/// Archive long-term memories past retention and print them.
pub async fn archive(json: bool, config: &Config) -> Result<()> {
    let mut vault = open_vault(config).await?;
    let mut archived = vault.archive_stale().context("Failed to archive long-term memories")?;

    let mut unreadable = 0;
    archived.retain_mut(|item| match vault.unseal(item) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(id = %item.id, error = %e, "Archived item could not be decrypted");
            unreadable += 1;
            false
        }
    });
    vault.shutdown().await.context("Failed to save vault")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&archived)?);
        return Ok(());
    }

    if archived.is_empty() && unreadable == 0 {
        println!("{} Nothing past retention", "⚠".yellow());
        return Ok(());
    }

    println!("{} Archived {} memories:", "✓".green(), archived.len() + unreadable);
    println!();
    for (i, item) in archived.iter().enumerate() {
        print_item(i + 1, item, None);
    }
    if unreadable > 0 {
        println!("{} {} archived memories could not be decrypted", "⚠".yellow(), unreadable);
    }
    Ok(())
}

/// Parse `key=value` pairs. Values that are valid JSON keep their type;
/// anything else is stored as a string.
pub fn parse_metadata(pairs: &[String]) -> Result<Metadata> {
    let mut metadata = Metadata::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("Invalid metadata '{}', expected key=value", pair))?;
        let key = key.trim();
        if key.is_empty() {
            bail!("Invalid metadata '{}', key is empty", pair);
        }
        let value = serde_json::from_str(value.trim())
            .unwrap_or_else(|_| serde_json::Value::String(value.trim().to_string()));
        metadata.insert(key.to_string(), value);
    }
    Ok(metadata)
}

fn parse_bound(value: Option<&str>, flag: &str) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
    value
        .map(|s| parse_datetime(s).ok_or_else(|| anyhow!("Invalid {} time '{}'", flag, s)))
        .transpose()
}

fn tier_name(tier: TierKind) -> &'static str {
    match tier {
        TierKind::ShortTerm => "short-term",
        TierKind::MidTerm => "mid-term",
        TierKind::LongTerm => "long-term",
    }
}

fn tier_display(tier: TierKind) -> &'static str {
    match tier {
        TierKind::ShortTerm => "short",
        TierKind::MidTerm => "mid",
        TierKind::LongTerm => "long",
    }
}

fn print_item(index: usize, item: &MemoryItem, tier: Option<TierKind>) {
    let tier = tier.map(|t| format!("[{}] ", tier_display(t))).unwrap_or_default();
    println!(
        "{}. {}{} {}",
        index,
        tier.cyan(),
        format!("({:.2})", item.priority).dimmed(),
        item.content
    );
    println!("   {} {}", "created:".dimmed(), format_datetime(&item.created_at));
    if !item.metadata.is_empty() {
        let meta = serde_json::to_string(&item.metadata).unwrap_or_default();
        println!("   {} {}", "meta:".dimmed(), meta);
    }
}
