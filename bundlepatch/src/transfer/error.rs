//! Transfer error type.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by a transport.
///
/// Cloneable: a coalesced transfer hands the same outcome to every listener.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    /// The request could not be sent or the body could not be read.
    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    /// The server answered with a non-success status.
    #[error("request to {url} failed with status {status}")]
    Status { url: String, status: u16 },

    /// The request exceeded the configured timeout.
    #[error("request to {url} timed out after {timeout_secs}s")]
    Timeout { url: String, timeout_secs: u64 },

    /// A `file://` source could not be read.
    #[error("failed to read {}: {reason}", path.display())]
    Io { path: PathBuf, reason: String },

    /// No transport handles this URL scheme.
    #[error("unsupported URL: {0}")]
    UnsupportedUrl(String),
}

impl TransferError {
    /// The URL or path the failed request targeted.
    pub fn target(&self) -> String {
        match self {
            Self::Request { url, .. } | Self::Status { url, .. } | Self::Timeout { url, .. } => {
                url.clone()
            }
            Self::Io { path, .. } => path.display().to_string(),
            Self::UnsupportedUrl(url) => url.clone(),
        }
    }
}
