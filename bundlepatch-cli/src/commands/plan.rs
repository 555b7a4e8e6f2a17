//! `plan` command: show what a sync would download.

use std::path::Path;
use std::sync::Arc;

use bundlepatch::cache::PatchCache;
use bundlepatch::manifest::ManifestStore;
use bundlepatch::planner::{ChangeKind, DeltaPlanner};
use bundlepatch::sync::{parse_version, PatchEndpoint, VersionIndex};
use bundlepatch::transfer::{DefaultTransport, TransferError, TransferProgress, Transport};
use bundlepatch::SyncError;
use console::style;

use super::common::{format_size, load_config, SyncArgs};
use crate::error::CliError;

/// Fetch the current release manifest and print the delta plan.
pub fn run(args: SyncArgs, config_path: &Path) -> Result<(), CliError> {
    let file = load_config(config_path)?;
    let config = args.resolve(&file);
    config.validate()?;

    if config.skip_patching {
        println!("Patching is disabled; nothing would be downloaded.");
        return Ok(());
    }

    let local = ManifestStore::load_local(&config.baseline_manifest_path())?;
    let transport: Arc<dyn Transport> =
        Arc::new(DefaultTransport::new(config.timeout).map_err(SyncError::from)?);
    let endpoint = PatchEndpoint::from_config(&config);

    let version = match &config.version_index {
        Some(path) => VersionIndex::load(path)?.require(config.platform, path)?,
        None => {
            let url = endpoint.version_url();
            let body = transport
                .fetch(&url, &TransferProgress::new())
                .map_err(SyncError::from)?;
            parse_version(&body).ok_or_else(|| {
                SyncError::Network(TransferError::Request {
                    url,
                    reason: "empty version response".to_string(),
                })
            })?
        }
    };

    let store = ManifestStore::new(transport.clone());
    let remote =
        store.fetch_remote(&endpoint.manifest_url(&version, config.manifest_name.as_deref()))?;
    let cache = PatchCache::open(&config.cache_dir)?;

    let plan = DeltaPlanner::new(transport.as_ref()).plan(
        &local,
        &remote,
        cache.record(),
        &endpoint.release_url(&version),
    );

    println!(
        "Release {} for {} ({} bundles)",
        style(&version).bold(),
        config.platform,
        remote.len()
    );
    println!();

    if plan.is_empty() {
        println!(
            "Nothing to download; {} patched bundles already cached.",
            plan.already_cached
        );
        return Ok(());
    }

    for item in &plan.items {
        let marker = match item.kind {
            ChangeKind::New => style("+").green(),
            ChangeKind::Updated => style("~").yellow(),
        };
        println!("  {} {:<48} {:>12}", marker, item.bundle, format_size(item.total_bytes));
    }
    println!();
    println!(
        "{} to download ({}), {} already cached",
        plan.items.len(),
        format_size(plan.total_bytes),
        plan.already_cached
    );
    Ok(())
}
