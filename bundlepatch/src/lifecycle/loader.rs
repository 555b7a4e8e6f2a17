//! Reading bundle content from disk.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::trace;

use super::LifecycleError;

/// Where a loaded bundle's content came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundleLocation {
    /// Shipped with the application.
    Baseline(PathBuf),
    /// Downloaded by a sync session.
    PatchCache(PathBuf),
}

impl BundleLocation {
    pub fn path(&self) -> &Path {
        match self {
            Self::Baseline(p) | Self::PatchCache(p) => p,
        }
    }

    pub fn is_patched(&self) -> bool {
        matches!(self, Self::PatchCache(_))
    }
}

/// Turns a bundle file into loaded content.
///
/// The lifecycle manager calls [`load`](Self::load) once when a bundle
/// becomes resident and [`unload`](Self::unload) once when its last
/// reference is released.
pub trait BundleLoader {
    /// Handle to loaded content.
    type Content;

    /// Load `bundle` from `location`.
    fn load(&mut self, bundle: &str, location: &BundleLocation)
        -> Result<Self::Content, LifecycleError>;

    /// Release content. The default simply drops it.
    fn unload(&mut self, bundle: &str, content: Self::Content) {
        trace!(bundle = %bundle, "Unloading bundle");
        drop(content);
    }
}

/// Loader that reads whole bundle files into memory.
#[derive(Debug, Default, Clone)]
pub struct FileBundleLoader;

impl FileBundleLoader {
    pub fn new() -> Self {
        Self
    }
}

impl BundleLoader for FileBundleLoader {
    type Content = Bytes;

    fn load(&mut self, bundle: &str, location: &BundleLocation) -> Result<Bytes, LifecycleError> {
        let path = location.path();
        match fs::read(path) {
            Ok(data) => {
                trace!(bundle = %bundle, path = %path.display(), bytes = data.len(), "Read bundle");
                Ok(Bytes::from(data))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(LifecycleError::Load {
                bundle: bundle.to_string(),
                reason: format!("{} not found", path.display()),
            }),
            Err(e) => Err(LifecycleError::Load {
                bundle: bundle.to_string(),
                reason: format!("{}: {}", path.display(), e),
            }),
        }
    }
}
