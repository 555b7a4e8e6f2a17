//! Transfers: transports and the bounded-concurrency transfer queue.
//!
//! # Architecture
//!
//! ```text
//! TransferQueue (caller-driven tick, FIFO, URL coalescing)
//!         │
//!         └── Transport (trait)
//!                 ├── DefaultTransport  (dispatch by URL scheme)
//!                 │       ├── HttpTransport  (http://, https://)
//!                 │       └── FileTransport  (file://)
//!                 └── MemoryTransport   (fixtures and tests)
//! ```

mod error;
mod file;
mod http;
mod memory;
mod progress;
mod queue;

pub use error::TransferError;
pub use file::{FileTransport, FILE_SCHEME};
pub use http::{HttpTransport, DEFAULT_TIMEOUT_SECS};
pub use memory::MemoryTransport;
pub use progress::TransferProgress;
pub use queue::{TransferHandle, TransferKind, TransferQueue, DEFAULT_MAX_IN_PROGRESS};

use std::time::Duration;

use bytes::Bytes;

/// Moves bytes from a URL into memory.
///
/// Implementations must be usable from background I/O threads.
pub trait Transport: Send + Sync {
    /// Fetch the full body of `url`, updating `progress` as bytes arrive.
    fn fetch(&self, url: &str, progress: &TransferProgress) -> Result<Bytes, TransferError>;

    /// Body length of `url` from a metadata-only request (HEAD).
    ///
    /// Returns 0 when the server does not report a length.
    fn content_length(&self, url: &str) -> Result<u64, TransferError>;
}

/// Transport that dispatches on the URL scheme.
#[derive(Debug, Clone)]
pub struct DefaultTransport {
    http: HttpTransport,
    file: FileTransport,
}

impl DefaultTransport {
    /// Create a transport with the given HTTP timeout.
    pub fn new(timeout: Duration) -> Result<Self, TransferError> {
        Ok(Self {
            http: HttpTransport::with_timeout(timeout)?,
            file: FileTransport::new(),
        })
    }

    fn route(&self, url: &str) -> Result<&dyn Transport, TransferError> {
        if url.starts_with(FILE_SCHEME) {
            Ok(&self.file)
        } else if url.starts_with("http://") || url.starts_with("https://") {
            Ok(&self.http)
        } else {
            Err(TransferError::UnsupportedUrl(url.to_string()))
        }
    }
}

impl Transport for DefaultTransport {
    fn fetch(&self, url: &str, progress: &TransferProgress) -> Result<Bytes, TransferError> {
        self.route(url)?.fetch(url, progress)
    }

    fn content_length(&self, url: &str) -> Result<u64, TransferError> {
        self.route(url)?.content_length(url)
    }
}

/// Join URL segments with single `/` separators.
///
/// ```
/// use bundlepatch::transfer::join_url;
///
/// assert_eq!(join_url("http://cdn/", &["/AssetBundles", "r1/", "ui.bundle"]),
///            "http://cdn/AssetBundles/r1/ui.bundle");
/// ```
pub fn join_url(base: &str, segments: &[&str]) -> String {
    let mut url = base.trim_end_matches('/').to_string();
    for segment in segments {
        let segment = segment.trim_matches('/');
        if segment.is_empty() {
            continue;
        }
        url.push('/');
        url.push_str(segment);
    }
    url
}
