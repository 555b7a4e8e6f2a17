//! Release publishing: lays out built bundles the way sync sessions fetch them.
//!
//! ```text
//! <out_root>/
//!   versions.ini                       [versions] <platform> = <version>
//!   <bundle_path>/<version>/
//!     <version>                        manifest
//!     shared.bundle
//!     ui/atlas.bundle
//! ```
//!
//! Versions default to `<yyMMdd_HHmmss>_<platform>`, so every platform's
//! releases can share one `<bundle_path>` directory.
//!
//! Dependencies and variant tags come from an optional layout file:
//!
//! ```ini
//! [ui/atlas.bundle]
//! dependencies = shared.bundle, fonts.bundle
//!
//! [voice.en]
//! variant = en
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use ini::Ini;
use tracing::{debug, info};

use crate::checksum::file_hash;
use crate::error::{SyncError, SyncResult};
use crate::manifest::{BundleEntry, ManifestBuilder};
use crate::platform::Platform;
use crate::sync::{VersionIndex, VERSION_INDEX_FILENAME};

/// Per-bundle metadata not derivable from the payload files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BundleLayout {
    dependencies: HashMap<String, Vec<String>>,
    variants: HashMap<String, String>,
}

impl BundleLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a layout file.
    pub fn load(path: &Path) -> SyncResult<Self> {
        let ini = Ini::load_from_file(path)
            .map_err(|e| SyncError::Config(format!("{}: {}", path.display(), e)))?;

        let mut layout = Self::new();
        for (section, props) in ini.iter() {
            let Some(bundle) = section else { continue };
            if let Some(deps) = props.get("dependencies") {
                layout.dependencies.insert(
                    bundle.to_string(),
                    deps.split(',')
                        .map(str::trim)
                        .filter(|d| !d.is_empty())
                        .map(str::to_string)
                        .collect(),
                );
            }
            if let Some(variant) = props.get("variant").map(str::trim).filter(|v| !v.is_empty()) {
                layout.variants.insert(bundle.to_string(), variant.to_string());
            }
        }
        Ok(layout)
    }

    pub fn with_dependencies<I, S>(mut self, bundle: &str, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies
            .insert(bundle.to_string(), deps.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_variant(mut self, bundle: &str, variant: &str) -> Self {
        self.variants.insert(bundle.to_string(), variant.to_string());
        self
    }

    fn entry(&self, name: String, hash: String) -> BundleEntry {
        let mut entry = BundleEntry::new(name, hash);
        entry.dependencies = self.dependencies.get(&entry.name).cloned().unwrap_or_default();
        entry.variant = self.variants.get(&entry.name).cloned();
        entry
    }
}

/// Inputs of a release build.
#[derive(Debug, Clone)]
pub struct PublishOptions {
    /// Directory of built bundle files.
    pub input_dir: PathBuf,
    /// Release root served to clients.
    pub out_root: PathBuf,
    /// Path segment under the release root.
    pub bundle_path: String,
    pub platform: Platform,
    /// Release version. Generated from the current time when `None`.
    pub version: Option<String>,
    pub layout: BundleLayout,
    /// Also install the release as the application baseline here.
    pub baseline_dir: Option<PathBuf>,
}

/// What a release build produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    pub version: String,
    pub release_dir: PathBuf,
    pub manifest_path: PathBuf,
    pub bundles: usize,
    pub bytes: u64,
}

/// Version name for a release built now.
pub fn default_version(platform: Platform) -> String {
    format!("{}_{}", Local::now().format("%y%m%d_%H%M%S"), platform.name())
}

/// Build a release from `options.input_dir`.
pub fn publish_release(options: &PublishOptions) -> SyncResult<PublishReport> {
    let version = options
        .version
        .clone()
        .unwrap_or_else(|| default_version(options.platform));
    if version.is_empty() || version.contains(['/', '\\']) || version.contains("..") {
        return Err(SyncError::Config(format!("invalid version: {:?}", version)));
    }

    let files = list_bundle_files(&options.input_dir)?;
    let mut builder = ManifestBuilder::new(&version);
    let mut bytes = 0u64;
    for (name, path) in &files {
        if name == &version {
            return Err(SyncError::Config(format!(
                "bundle {} collides with the manifest name",
                name
            )));
        }
        let hash = file_hash(path).map_err(|e| SyncError::cache_io(path, e))?;
        bytes += fs::metadata(path).map_err(|e| SyncError::cache_io(path, e))?.len();
        builder.push(options.layout.entry(name.clone(), hash));
    }
    let manifest = builder
        .build()
        .map_err(|e| SyncError::manifest(options.input_dir.display().to_string(), e.to_string()))?;

    let release_dir = options
        .out_root
        .join(&options.bundle_path)
        .join(&version);
    replace_dir(&release_dir)?;
    copy_bundles(&files, &release_dir)?;

    let manifest_path = release_dir.join(&version);
    write_file(&manifest_path, &manifest.to_bytes())?;

    let index_path = options.out_root.join(VERSION_INDEX_FILENAME);
    let mut index = VersionIndex::load(&index_path)?;
    index.set(options.platform, &version);
    index.save(&index_path)?;

    if let Some(baseline) = &options.baseline_dir {
        replace_dir(baseline)?;
        copy_bundles(&files, baseline)?;
        write_file(&baseline.join(options.platform.name()), &manifest.to_bytes())?;
        info!(path = %baseline.display(), "Installed release as baseline");
    }

    info!(
        version = %version,
        platform = %options.platform,
        bundles = files.len(),
        bytes,
        "Published release"
    );

    Ok(PublishReport {
        version,
        release_dir,
        manifest_path,
        bundles: files.len(),
        bytes,
    })
}

/// Delete release directories superseded by the version index.
///
/// For every platform with a recorded version, directories under
/// `<out_root>/<bundle_path>` whose name mentions the platform but is not
/// the recorded version are removed. Returns the removed directories.
pub fn clean_stale_releases(out_root: &Path, bundle_path: &str) -> SyncResult<Vec<PathBuf>> {
    let index = VersionIndex::load(&out_root.join(VERSION_INDEX_FILENAME))?;
    let releases = out_root.join(bundle_path);
    if !releases.is_dir() {
        return Ok(Vec::new());
    }

    let mut removed = Vec::new();
    let entries = fs::read_dir(&releases).map_err(|e| SyncError::cache_io(&releases, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| SyncError::cache_io(&releases, e))?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();

        let stale = Platform::ALL.iter().any(|platform| {
            index
                .get(*platform)
                .is_some_and(|current| name.contains(platform.name()) && name != current)
        });
        if stale {
            fs::remove_dir_all(&path).map_err(|e| SyncError::cache_io(&path, e))?;
            info!(path = %path.display(), "Removed stale release");
            removed.push(path);
        }
    }
    removed.sort();
    Ok(removed)
}

/// Files under `dir` as (bundle name, path), sorted by name.
fn list_bundle_files(dir: &Path) -> SyncResult<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    let mut stack = vec![dir.to_path_buf()];

    while let Some(current) = stack.pop() {
        let entries = fs::read_dir(&current).map_err(|e| SyncError::cache_io(&current, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| SyncError::cache_io(&current, e))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            let Ok(relative) = path.strip_prefix(dir) else {
                continue;
            };
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if name.starts_with('.') || name.ends_with(".manifest") {
                debug!(file = %name, "Skipping non-bundle file");
                continue;
            }
            files.push((name, path));
        }
    }

    files.sort();
    Ok(files)
}

fn replace_dir(dir: &Path) -> SyncResult<()> {
    if dir.exists() {
        fs::remove_dir_all(dir).map_err(|e| SyncError::cache_io(dir, e))?;
    }
    fs::create_dir_all(dir).map_err(|e| SyncError::cache_io(dir, e))
}

fn copy_bundles(files: &[(String, PathBuf)], dest: &Path) -> SyncResult<()> {
    for (name, source) in files {
        let target = dest.join(name);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| SyncError::cache_io(parent, e))?;
        }
        fs::copy(source, &target).map_err(|e| SyncError::cache_io(&target, e))?;
    }
    Ok(())
}

fn write_file(path: &Path, data: &[u8]) -> SyncResult<()> {
    fs::write(path, data).map_err(|e| SyncError::cache_io(path, e))
}
