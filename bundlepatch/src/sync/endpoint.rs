//! Patch endpoint URLs and the local version index.
//!
//! ```text
//! GET  <base>/patch?platform=<name>                      → version string
//! GET  <base>/<bundle_path>/<version>/<manifest_name>    → manifest blob
//! GET  <base>/<bundle_path>/<version>/<bundle name>      → bundle payload
//! HEAD <base>/<bundle_path>/<version>/<bundle name>      → content length
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use ini::Ini;
use tracing::debug;

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::platform::Platform;
use crate::transfer::{join_url, TransferError};

/// INI section of the version index.
pub const VERSIONS_SECTION: &str = "versions";

/// File name of the version index at a release root.
pub const VERSION_INDEX_FILENAME: &str = "versions.ini";

/// URL layout of one platform's releases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchEndpoint {
    base_url: String,
    bundle_path: String,
    platform: Platform,
}

impl PatchEndpoint {
    pub fn new(base_url: impl Into<String>, bundle_path: impl Into<String>, platform: Platform) -> Self {
        Self {
            base_url: base_url.into(),
            bundle_path: bundle_path.into(),
            platform,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(&config.base_url, &config.bundle_path, config.platform)
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Version query URL.
    pub fn version_url(&self) -> String {
        format!(
            "{}?platform={}",
            join_url(&self.base_url, &["patch"]),
            self.platform.name()
        )
    }

    /// Directory URL of a release.
    pub fn release_url(&self, version: &str) -> String {
        join_url(&self.base_url, &[&self.bundle_path, version])
    }

    /// Manifest URL of a release. The manifest is named after the version
    /// unless `manifest_name` is given.
    pub fn manifest_url(&self, version: &str, manifest_name: Option<&str>) -> String {
        join_url(&self.release_url(version), &[manifest_name.unwrap_or(version)])
    }
}

/// Parse a version endpoint response.
pub fn parse_version(body: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(body).ok()?.trim();
    if text.is_empty() || text.contains(['/', '\\']) || text == ".." {
        return None;
    }
    Some(text.to_string())
}

/// Platform → current release version, stored as `[versions]` in an INI file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionIndex {
    versions: BTreeMap<String, String>,
}

impl VersionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the index at `path`. A missing file is an empty index.
    pub fn load(path: &Path) -> SyncResult<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let ini = Ini::load_from_file(path)
            .map_err(|e| SyncError::Config(format!("{}: {}", path.display(), e)))?;

        let versions = ini
            .section(Some(VERSIONS_SECTION))
            .map(|section| {
                section
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.trim().to_string()))
                    .collect()
            })
            .unwrap_or_default();

        debug!(path = %path.display(), "Loaded version index");
        Ok(Self { versions })
    }

    /// Write the index to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> SyncResult<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| SyncError::cache_io(dir, e))?;
        }

        let mut ini = Ini::new();
        for (platform, version) in &self.versions {
            ini.with_section(Some(VERSIONS_SECTION))
                .set(platform.as_str(), version.as_str());
        }
        ini.write_to_file(path)
            .map_err(|e| SyncError::cache_io(path, e))
    }

    pub fn get(&self, platform: Platform) -> Option<&str> {
        self.versions.get(platform.name()).map(String::as_str)
    }

    pub fn set(&mut self, platform: Platform, version: impl Into<String>) {
        self.versions.insert(platform.name().to_string(), version.into());
    }

    /// Resolve the version for `platform`.
    ///
    /// A missing entry is reported like a version server with nothing
    /// published for the platform: a recoverable network error.
    pub fn require(&self, platform: Platform, path: &Path) -> SyncResult<String> {
        self.get(platform)
            .and_then(|v| parse_version(v.as_bytes()))
            .ok_or_else(|| {
                SyncError::Network(TransferError::Io {
                    path: path.to_path_buf(),
                    reason: format!("no version published for {}", platform),
                })
            })
    }
}
