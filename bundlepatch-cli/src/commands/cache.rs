//! Patch cache management CLI commands.

use std::path::Path;

use bundlepatch::cache::{cache_stats, clear_patch_cache, PatchRecord, RECORD_FILENAME};
use clap::Subcommand;
use dialoguer::Confirm;

use super::common::{format_size, load_config};
use crate::error::CliError;

/// Cache action subcommands.
#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Clear the patch cache, forcing the next sync to download everything again
    Clear {
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Show patch cache statistics
    Stats,
}

/// Run a cache subcommand.
pub fn run(action: CacheAction, config_path: &Path) -> Result<(), CliError> {
    let config = load_config(config_path)?.to_config();
    let cache_dir = &config.cache_dir;

    match action {
        CacheAction::Clear { yes } => {
            if !yes {
                let confirmed = Confirm::new()
                    .with_prompt(format!("Delete all patched bundles in {}?", cache_dir.display()))
                    .default(false)
                    .interact()
                    .map_err(|e| CliError::CacheClear(e.to_string()))?;
                if !confirmed {
                    println!("Cancelled.");
                    return Ok(());
                }
            }

            println!("Clearing patch cache at: {}", cache_dir.display());

            match clear_patch_cache(cache_dir) {
                Ok(result) => {
                    println!(
                        "Deleted {} files, freed {}",
                        result.files_deleted,
                        format_size(result.bytes_freed)
                    );
                    Ok(())
                }
                Err(e) => Err(CliError::CacheClear(e.to_string())),
            }
        }
        CacheAction::Stats => {
            println!("Patch cache: {}", cache_dir.display());

            let (files, bytes) =
                cache_stats(cache_dir).map_err(|e| CliError::CacheStats(e.to_string()))?;
            println!("  Files:   {}", files);
            println!("  Size:    {}", format_size(bytes));

            let record = PatchRecord::load(&cache_dir.join(RECORD_FILENAME))
                .map_err(|e| CliError::CacheStats(e.to_string()))?;
            println!("  Bundles: {}", record.len());
            if let Some(version) = record.manifest_version() {
                println!("  Release: {}", version);
            }
            if let Some(synced_at) = record.synced_at() {
                println!("  Synced:  {}", synced_at.format("%Y-%m-%d %H:%M:%S UTC"));
            }
            Ok(())
        }
    }
}
