//! Arguments and helpers shared across CLI commands.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bundlepatch::config::{ConfigFile, SyncConfig};
use bundlepatch::Platform;
use clap::Args;

use crate::error::CliError;

/// Options shared by `sync` and `plan`.
///
/// Each flag overrides the matching config file key.
#[derive(Debug, Clone, Default, Args)]
pub struct SyncArgs {
    /// Patch server base URL
    #[arg(long)]
    pub url: Option<String>,

    /// Target platform (android, ios, webplayer, windows, osx)
    #[arg(long)]
    pub platform: Option<Platform>,

    /// Patch cache directory
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Directory holding the shipped bundles and baseline manifest
    #[arg(long)]
    pub baseline_dir: Option<PathBuf>,

    /// Baseline manifest file [default: <baseline-dir>/<platform>]
    #[arg(long)]
    pub baseline_manifest: Option<PathBuf>,

    /// Read the release version from this versions.ini instead of the server
    #[arg(long)]
    pub offline_index: Option<PathBuf>,

    /// Maximum concurrent downloads
    #[arg(short = 'j', long)]
    pub concurrency: Option<usize>,

    /// Request timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Preferred variant, highest priority first (repeatable)
    #[arg(long = "variant", value_name = "VARIANT")]
    pub variants: Vec<String>,

    /// Skip patching and run on the baseline only
    #[arg(long)]
    pub skip_patching: bool,
}

impl SyncArgs {
    /// Build a sync configuration: CLI takes precedence, then config file.
    pub fn resolve(&self, file: &ConfigFile) -> SyncConfig {
        let mut config = file.to_config();

        if let Some(url) = &self.url {
            config.base_url = url.clone();
        }
        if let Some(platform) = self.platform {
            config.platform = platform;
        }
        if let Some(dir) = &self.cache_dir {
            config.cache_dir = dir.clone();
        }
        if let Some(dir) = &self.baseline_dir {
            config.baseline_dir = dir.clone();
        }
        if let Some(path) = &self.baseline_manifest {
            config.baseline_manifest = Some(path.clone());
        }
        if let Some(path) = &self.offline_index {
            config.version_index = Some(path.clone());
        }
        if let Some(n) = self.concurrency {
            config.max_concurrent_downloads = n;
        }
        if let Some(secs) = self.timeout {
            config.timeout = Duration::from_secs(secs);
        }
        if !self.variants.is_empty() {
            config.preferred_variants = self.variants.clone();
        }
        config.with_skip_patching(self.skip_patching)
    }
}

/// Load the config file at `path`; a missing file is an empty config.
pub fn load_config(path: &Path) -> Result<ConfigFile, CliError> {
    ConfigFile::load(path).map_err(|e| CliError::Config(e.to_string()))
}

/// Format a byte count for display.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}
