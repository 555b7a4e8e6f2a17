//! Error types for the patch synchronization engine.
//!
//! Errors fall into two groups:
//!
//! - **Session errors** abort a whole sync session (version or manifest fetch
//!   failures, a missing baseline, unusable configuration).
//! - **Item errors** ([`ItemError`]) are recorded on a single
//!   [`DownloadItem`](crate::planner::DownloadItem) and never abort sibling
//!   downloads.
//!
//! Nothing is retried inside the engine; callers retry by starting a new
//! session.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::transfer::TransferError;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while synchronizing bundles.
///
/// Cloneable so a failed orchestrator can keep reporting its error.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    /// A version, manifest, or bundle fetch failed. Recoverable: retry the session.
    #[error("network error: {0}")]
    Network(#[from] TransferError),

    /// A downloaded payload did not hash to the expected value.
    #[error("integrity check failed for {bundle}: expected {expected}, got {actual}")]
    Integrity {
        bundle: String,
        expected: String,
        actual: String,
    },

    /// A manifest blob could not be parsed or failed validation.
    #[error("invalid manifest from {origin}: {reason}")]
    Manifest { origin: String, reason: String },

    /// Writing a payload or persisting the patch record failed.
    #[error("cache I/O error at {}: {source}", path.display())]
    CacheIo {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    /// The baseline manifest shipped with the application is absent.
    #[error("baseline manifest not found at {}", .0.display())]
    BaselineMissing(PathBuf),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An operation was invoked in a state that does not allow it.
    #[error("invalid orchestrator state: {0}")]
    InvalidState(String),
}

impl SyncError {
    /// Convenience constructor for [`SyncError::CacheIo`].
    pub(crate) fn cache_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::CacheIo {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    /// Convenience constructor for [`SyncError::Manifest`].
    pub(crate) fn manifest(origin: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Manifest {
            origin: origin.into(),
            reason: reason.into(),
        }
    }

    /// Whether retrying the session could plausibly succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Integrity { .. } | Self::CacheIo { .. }
        )
    }
}

/// Error recorded on a single download item.
///
/// Cloneable so progress snapshots can carry it; the underlying I/O error is
/// flattened to its message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ItemError {
    /// The transfer failed.
    #[error("{0}")]
    Network(TransferError),

    /// The payload hash did not match the manifest.
    #[error("hash mismatch: expected {expected}, got {actual}")]
    Integrity { expected: String, actual: String },

    /// The payload or patch record could not be written.
    #[error("cache write failed at {}: {reason}", path.display())]
    CacheIo { path: PathBuf, reason: String },
}

impl ItemError {
    /// Short category label used in reports and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Integrity { .. } => "integrity",
            Self::CacheIo { .. } => "cache-io",
        }
    }

    /// Session-level error for a failed item.
    pub fn to_sync_error(&self, bundle: &str) -> SyncError {
        match self {
            Self::Network(e) => SyncError::Network(e.clone()),
            Self::Integrity { expected, actual } => SyncError::Integrity {
                bundle: bundle.to_string(),
                expected: expected.clone(),
                actual: actual.clone(),
            },
            Self::CacheIo { path, reason } => {
                SyncError::cache_io(path, io::Error::new(io::ErrorKind::Other, reason.clone()))
            }
        }
    }
}

impl From<SyncError> for ItemError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Network(e) => Self::Network(e),
            SyncError::Integrity {
                expected, actual, ..
            } => Self::Integrity { expected, actual },
            SyncError::CacheIo { path, source } => Self::CacheIo {
                path,
                reason: source.to_string(),
            },
            other => Self::CacheIo {
                path: PathBuf::new(),
                reason: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integrity_display() {
        let err = SyncError::Integrity {
            bundle: "ui/atlas.bundle".to_string(),
            expected: "abc123".to_string(),
            actual: "def456".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("ui/atlas.bundle"));
        assert!(msg.contains("abc123"));
        assert!(msg.contains("def456"));
    }

    #[test]
    fn test_network_error_is_recoverable() {
        let err = SyncError::from(TransferError::Status {
            url: "http://cdn/x".to_string(),
            status: 503,
        });
        assert!(err.is_recoverable());
        assert!(!SyncError::manifest("remote", "truncated").is_recoverable());
    }

    #[test]
    fn test_item_error_from_cache_io() {
        let err = SyncError::cache_io(
            "/tmp/cache/a.bundle",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        let item: ItemError = err.into();
        assert_eq!(item.kind(), "cache-io");
        assert!(item.to_string().contains("denied"));
    }
}
