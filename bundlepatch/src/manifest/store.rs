//! Loading local and remote manifests.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use super::Manifest;
use crate::error::{SyncError, SyncResult};
use crate::transfer::{TransferProgress, Transport};

/// Source of manifests.
///
/// The local manifest is the baseline shipped with the application; the
/// remote manifest describes the latest published release.
#[derive(Clone)]
pub struct ManifestStore {
    transport: Arc<dyn Transport>,
}

impl ManifestStore {
    /// Create a store fetching remote manifests through `transport`.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Load the baseline manifest.
    ///
    /// A missing baseline is fatal: the application cannot run without one.
    pub fn load_local(path: &Path) -> SyncResult<Manifest> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(SyncError::BaselineMissing(path.to_path_buf()))
            }
            Err(e) => return Err(SyncError::cache_io(path, e)),
        };

        let manifest = Self::parse(&path.display().to_string(), &bytes)?;
        info!(
            path = %path.display(),
            bundles = manifest.len(),
            "Loaded baseline manifest"
        );
        Ok(manifest)
    }

    /// Download and parse a remote manifest (blocking).
    ///
    /// Transport failures are [`SyncError::Network`]; the caller may retry or
    /// continue with the baseline only.
    pub fn fetch_remote(&self, url: &str) -> SyncResult<Manifest> {
        let bytes = self.transport.fetch(url, &TransferProgress::new())?;
        Self::parse(url, &bytes)
    }

    /// Parse a manifest blob, tagging errors with where it came from.
    pub fn parse(origin: &str, bytes: &[u8]) -> SyncResult<Manifest> {
        let manifest =
            Manifest::load(bytes).map_err(|e| SyncError::manifest(origin, e.to_string()))?;
        debug!(origin = %origin, bundles = manifest.len(), "Parsed manifest");
        Ok(manifest)
    }
}

impl std::fmt::Debug for ManifestStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManifestStore").finish_non_exhaustive()
    }
}
