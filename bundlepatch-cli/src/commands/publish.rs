//! `publish` and `clean-releases` commands.

use std::path::PathBuf;

use bundlepatch::config::DEFAULT_BUNDLE_PATH;
use bundlepatch::publish::{clean_stale_releases, publish_release, BundleLayout, PublishOptions};
use bundlepatch::Platform;
use clap::Args;
use console::style;

use super::common::format_size;
use crate::error::CliError;

/// Arguments for `publish`.
#[derive(Debug, Args)]
pub struct PublishArgs {
    /// Directory of built bundles
    pub input: PathBuf,

    /// Output root served by the patch server
    #[arg(short, long)]
    pub out: PathBuf,

    /// Target platform
    #[arg(long)]
    pub platform: Platform,

    /// Release name [default: yyMMdd_HHmmss_<Platform>]
    #[arg(long)]
    pub release: Option<String>,

    /// INI file declaring per-bundle dependencies and variants
    #[arg(long)]
    pub layout: Option<PathBuf>,

    /// Also install the release as the shipped baseline in this directory
    #[arg(long)]
    pub baseline_dir: Option<PathBuf>,

    /// Release directory under the output root
    #[arg(long, default_value = DEFAULT_BUNDLE_PATH)]
    pub bundle_path: String,
}

/// Arguments for `clean-releases`.
#[derive(Debug, Args)]
pub struct CleanArgs {
    /// Output root containing versions.ini
    pub out: PathBuf,

    /// Release directory under the output root
    #[arg(long, default_value = DEFAULT_BUNDLE_PATH)]
    pub bundle_path: String,
}

/// Publish a release.
pub fn run(args: PublishArgs) -> Result<(), CliError> {
    let layout = match &args.layout {
        Some(path) => BundleLayout::load(path).map_err(CliError::Publish)?,
        None => BundleLayout::new(),
    };

    let options = PublishOptions {
        input_dir: args.input,
        out_root: args.out,
        bundle_path: args.bundle_path,
        platform: args.platform,
        version: args.release,
        layout,
        baseline_dir: args.baseline_dir,
    };
    let report = publish_release(&options).map_err(CliError::Publish)?;

    println!(
        "{} Published {} for {}",
        style("✓").green(),
        style(&report.version).bold(),
        options.platform
    );
    println!("  Bundles:  {} ({})", report.bundles, format_size(report.bytes));
    println!("  Release:  {}", report.release_dir.display());
    println!("  Manifest: {}", report.manifest_path.display());
    if let Some(baseline) = &options.baseline_dir {
        println!("  Baseline: {}", baseline.display());
    }
    Ok(())
}

/// Remove release directories no longer referenced by the version index.
pub fn clean(args: CleanArgs) -> Result<(), CliError> {
    let removed = clean_stale_releases(&args.out, &args.bundle_path).map_err(CliError::Publish)?;

    if removed.is_empty() {
        println!("No stale releases.");
        return Ok(());
    }
    for path in &removed {
        println!("  Removed {}", path.display());
    }
    println!("Removed {} stale releases", removed.len());
    Ok(())
}
