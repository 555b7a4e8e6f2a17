//! `sync` command: run one patch session with a progress bar.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bundlepatch::{SyncOrchestrator, SyncOutcome, SyncState};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use super::common::{format_size, load_config, SyncArgs};
use crate::error::CliError;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Run a sync session to completion.
pub fn run(args: SyncArgs, config_path: &Path) -> Result<(), CliError> {
    let file = load_config(config_path)?;
    let config = args.resolve(&file);
    let mut session = SyncOrchestrator::with_default_transport(config)?;

    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_clone = interrupted.clone();
    ctrlc::set_handler(move || {
        interrupted_clone.store(true, Ordering::SeqCst);
    })
    .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;

    let bar = progress_bar()?;
    loop {
        if interrupted.load(Ordering::SeqCst) {
            bar.abandon_with_message("interrupted");
            warn!(state = %session.state(), "Sync interrupted by user");
            return Err(CliError::Interrupted);
        }

        let state = session.poll();
        update_bar(&bar, &session);
        if state.is_terminal() {
            break;
        }
        if matches!(
            state,
            SyncState::FetchingVersion
                | SyncState::FetchingManifest
                | SyncState::Planning
                | SyncState::Downloading
        ) {
            thread::sleep(POLL_INTERVAL);
        }
    }
    bar.finish_and_clear();

    match session.finish() {
        Ok(outcome) => {
            print_outcome(&outcome, &session);
            Ok(())
        }
        Err(e) => {
            let failed: Vec<_> = session.failed_items().collect();
            if failed.is_empty() {
                return Err(CliError::Sync(e));
            }

            println!("{}", style("Some bundles failed to download:").yellow().bold());
            for item in &failed {
                let reason = item
                    .error
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                println!("  {} {}: {}", style("x").red(), item.bundle, reason);
            }
            let progress = session.progress();
            Err(CliError::Partial {
                updated: progress.items_succeeded(),
                failed: progress.items_failed,
            })
        }
    }
}

fn progress_bar() -> Result<ProgressBar, CliError> {
    let style = ProgressStyle::with_template(
        "{spinner:.green} {prefix:<18} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
    )
    .map_err(|e| CliError::Config(format!("Invalid progress template: {}", e)))?
    .progress_chars("#>-");

    let bar = ProgressBar::new(0).with_style(style);
    bar.enable_steady_tick(Duration::from_millis(120));
    Ok(bar)
}

fn update_bar(bar: &ProgressBar, session: &SyncOrchestrator) {
    let progress = session.progress();
    bar.set_prefix(progress.state.label());
    bar.set_length(progress.total_bytes);
    bar.set_position(progress.bytes_downloaded);
    if progress.items_total > 0 {
        bar.set_message(format!(
            "{}/{} bundles",
            progress.items_done, progress.items_total
        ));
    }
}

fn print_outcome(outcome: &SyncOutcome, session: &SyncOrchestrator) {
    if outcome.is_fallback() {
        println!("Patching skipped; using the baseline manifest.");
        return;
    }

    let version = outcome.version.as_deref().unwrap_or("unknown");
    let progress = session.progress();

    if progress.items_total == 0 {
        println!(
            "{} Up to date with release {} ({} patched bundles)",
            style("✓").green(),
            style(version).bold(),
            outcome.external.len()
        );
    } else {
        println!(
            "{} Synced release {}: downloaded {} bundles ({})",
            style("✓").green(),
            style(version).bold(),
            progress.items_succeeded(),
            format_size(progress.bytes_downloaded)
        );
    }
    println!("Patch cache: {}", session.cache_dir().display());

    info!(
        version,
        downloaded = progress.items_succeeded(),
        external = outcome.external.len(),
        "Sync finished"
    );
}
