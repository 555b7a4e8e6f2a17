//! Configuration for the sync engine.
//!
//! [`SyncConfig`] is the in-memory configuration handed to the orchestrator
//! and lifecycle manager. [`ConfigFile`] reads the user's INI file
//! (`~/.bundlepatch/config.ini` by default) and converts it into a
//! `SyncConfig`:
//!
//! ```ini
//! [patch]
//! url = https://cdn.example.com/game
//! platform = Android
//! ; offline_index = /builds/versions.ini
//!
//! [cache]
//! directory = /home/me/.bundlepatch/cache
//! baseline = /opt/game/StreamingAssets
//!
//! [download]
//! concurrency = 4
//! timeout_secs = 30
//!
//! [variants]
//! preferred = en, fr
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use ini::Ini;

use crate::error::{SyncError, SyncResult};
use crate::platform::Platform;
use crate::transfer::{DEFAULT_MAX_IN_PROGRESS, DEFAULT_TIMEOUT_SECS};

/// Directory under the release root holding versioned release directories.
pub const DEFAULT_BUNDLE_PATH: &str = "AssetBundles";

/// Name of the per-user configuration directory under the home directory.
pub const CONFIG_DIR_NAME: &str = ".bundlepatch";

/// Name of the configuration file inside [`CONFIG_DIR_NAME`].
pub const CONFIG_FILE_NAME: &str = "config.ini";

/// Configuration for one sync session and the bundle loader.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the patch endpoint (`http(s)://` or `file://`).
    pub base_url: String,

    /// Platform whose release is synchronized. Defaults to the host platform,
    /// or Windows on hosts we do not publish for.
    pub platform: Platform,

    /// Path segment between the base URL and the version directory.
    pub bundle_path: String,

    /// Patch cache root.
    pub cache_dir: PathBuf,

    /// Directory of the baseline bundles shipped with the application.
    pub baseline_dir: PathBuf,

    /// Explicit baseline manifest path. Defaults to `<baseline_dir>/<platform>`.
    pub baseline_manifest: Option<PathBuf>,

    /// Remote manifest file name. Defaults to the version string.
    pub manifest_name: Option<String>,

    /// Local version index used instead of the version endpoint (offline mode).
    pub version_index: Option<PathBuf>,

    /// Maximum concurrent downloads.
    pub max_concurrent_downloads: usize,

    /// HTTP request timeout.
    pub timeout: Duration,

    /// Accepted variants, most preferred first.
    pub preferred_variants: Vec<String>,

    /// Skip the network entirely and load everything from the baseline.
    pub skip_patching: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let data = default_data_dir();
        Self {
            base_url: String::new(),
            platform: Platform::current().unwrap_or(Platform::Windows),
            bundle_path: DEFAULT_BUNDLE_PATH.to_string(),
            cache_dir: data.join("cache"),
            baseline_dir: data.join("baseline"),
            baseline_manifest: None,
            manifest_name: None,
            version_index: None,
            max_concurrent_downloads: DEFAULT_MAX_IN_PROGRESS,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            preferred_variants: Vec::new(),
            skip_patching: false,
        }
    }
}

impl SyncConfig {
    /// Create a configuration for the given patch endpoint.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Set the platform.
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Set the release path segment.
    pub fn with_bundle_path(mut self, path: impl Into<String>) -> Self {
        self.bundle_path = path.into();
        self
    }

    /// Set the patch cache root.
    pub fn with_cache_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_dir = path.into();
        self
    }

    /// Set the baseline bundle directory.
    pub fn with_baseline_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.baseline_dir = path.into();
        self
    }

    /// Set an explicit baseline manifest path.
    pub fn with_baseline_manifest(mut self, path: impl Into<PathBuf>) -> Self {
        self.baseline_manifest = Some(path.into());
        self
    }

    /// Set the remote manifest file name.
    pub fn with_manifest_name(mut self, name: impl Into<String>) -> Self {
        self.manifest_name = Some(name.into());
        self
    }

    /// Resolve versions from a local index instead of the endpoint.
    pub fn with_version_index(mut self, path: impl Into<PathBuf>) -> Self {
        self.version_index = Some(path.into());
        self
    }

    /// Set the maximum concurrent downloads.
    pub fn with_max_concurrent_downloads(mut self, max: usize) -> Self {
        self.max_concurrent_downloads = max;
        self
    }

    /// Set the HTTP timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Add an accepted variant at the lowest preference.
    pub fn with_preferred_variant(mut self, variant: impl Into<String>) -> Self {
        self.preferred_variants.push(variant.into());
        self
    }

    /// Enable or disable patching.
    pub fn with_skip_patching(mut self, skip: bool) -> Self {
        self.skip_patching = skip;
        self
    }

    /// Baseline manifest location.
    pub fn baseline_manifest_path(&self) -> PathBuf {
        self.baseline_manifest
            .clone()
            .unwrap_or_else(|| self.baseline_dir.join(self.platform.name()))
    }

    /// Check that the configuration can drive a networked session.
    pub fn validate(&self) -> SyncResult<()> {
        if !self.skip_patching && self.version_index.is_none() && self.base_url.trim().is_empty() {
            return Err(SyncError::Config(
                "patch url is required unless an offline index is set".to_string(),
            ));
        }
        if self.max_concurrent_downloads == 0 {
            return Err(SyncError::Config(
                "download concurrency must be at least 1".to_string(),
            ));
        }
        if self.bundle_path.contains("..") {
            return Err(SyncError::Config(format!(
                "bundle path must not contain '..': {}",
                self.bundle_path
            )));
        }
        Ok(())
    }
}

/// `~/.bundlepatch`, or `./.bundlepatch` when no home directory is known.
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    default_data_dir().join(CONFIG_FILE_NAME)
}

/// Values read from a configuration file. Absent keys stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFile {
    pub url: Option<String>,
    pub platform: Option<Platform>,
    pub offline_index: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub baseline_dir: Option<PathBuf>,
    pub concurrency: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub preferred_variants: Vec<String>,
}

impl ConfigFile {
    /// Load from `path`. A missing file yields an empty configuration.
    pub fn load(path: &Path) -> SyncResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(path)
            .map_err(|e| SyncError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_ini(&ini)
    }

    /// Parse INI text.
    pub fn parse(text: &str) -> SyncResult<Self> {
        let ini = Ini::load_from_str(text).map_err(|e| SyncError::Config(e.to_string()))?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> SyncResult<Self> {
        let get = |section: &str, key: &str| -> Option<String> {
            ini.section(Some(section))
                .and_then(|s| s.get(key))
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let platform = get("patch", "platform")
            .map(|p| p.parse::<Platform>().map_err(SyncError::Config))
            .transpose()?;

        let concurrency = get("download", "concurrency")
            .map(|v| {
                v.parse::<usize>()
                    .map_err(|_| SyncError::Config(format!("invalid download.concurrency: {}", v)))
            })
            .transpose()?;

        let timeout_secs = get("download", "timeout_secs")
            .map(|v| {
                v.parse::<u64>()
                    .map_err(|_| SyncError::Config(format!("invalid download.timeout_secs: {}", v)))
            })
            .transpose()?;

        let preferred_variants = get("variants", "preferred")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            url: get("patch", "url"),
            platform,
            offline_index: get("patch", "offline_index").map(PathBuf::from),
            cache_dir: get("cache", "directory").map(PathBuf::from),
            baseline_dir: get("cache", "baseline").map(PathBuf::from),
            concurrency,
            timeout_secs,
            preferred_variants,
        })
    }

    /// Overlay the values present in this file onto `config`.
    pub fn apply(&self, mut config: SyncConfig) -> SyncConfig {
        if let Some(url) = &self.url {
            config.base_url = url.clone();
        }
        if let Some(platform) = self.platform {
            config.platform = platform;
        }
        if let Some(index) = &self.offline_index {
            config.version_index = Some(index.clone());
        }
        if let Some(dir) = &self.cache_dir {
            config.cache_dir = dir.clone();
        }
        if let Some(dir) = &self.baseline_dir {
            config.baseline_dir = dir.clone();
        }
        if let Some(n) = self.concurrency {
            config.max_concurrent_downloads = n;
        }
        if let Some(secs) = self.timeout_secs {
            config.timeout = Duration::from_secs(secs);
        }
        if !self.preferred_variants.is_empty() {
            config.preferred_variants = self.preferred_variants.clone();
        }
        config
    }

    /// Build a [`SyncConfig`] from defaults plus this file.
    pub fn to_config(&self) -> SyncConfig {
        self.apply(SyncConfig::default())
    }
}
