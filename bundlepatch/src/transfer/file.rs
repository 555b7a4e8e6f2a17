//! `file://` transport for offline mode and local release directories.

use std::fs;
use std::path::PathBuf;

use bytes::Bytes;

use super::{TransferError, TransferProgress, Transport};

/// URL prefix handled by [`FileTransport`].
pub const FILE_SCHEME: &str = "file://";

/// Reads `file://` URLs from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileTransport;

impl FileTransport {
    /// Create a file transport.
    pub fn new() -> Self {
        Self
    }

    /// Map a `file://` URL to a path. Query strings are ignored.
    pub fn path_for(url: &str) -> Result<PathBuf, TransferError> {
        let rest = url
            .strip_prefix(FILE_SCHEME)
            .ok_or_else(|| TransferError::UnsupportedUrl(url.to_string()))?;
        let rest = rest.split('?').next().unwrap_or(rest);
        Ok(PathBuf::from(rest))
    }

    /// Build a `file://` URL for a local path.
    pub fn url_for(path: &std::path::Path) -> String {
        format!("{}{}", FILE_SCHEME, path.display())
    }
}

impl Transport for FileTransport {
    fn fetch(&self, url: &str, progress: &TransferProgress) -> Result<Bytes, TransferError> {
        let path = Self::path_for(url)?;
        let data = fs::read(&path).map_err(|e| TransferError::Io {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        progress.set_total(data.len() as u64);
        progress.set_bytes(data.len() as u64);
        Ok(Bytes::from(data))
    }

    fn content_length(&self, url: &str) -> Result<u64, TransferError> {
        let path = Self::path_for(url)?;
        fs::metadata(&path)
            .map(|m| m.len())
            .map_err(|e| TransferError::Io {
                path,
                reason: e.to_string(),
            })
    }
}
