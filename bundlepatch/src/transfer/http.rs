//! HTTP transport backed by a blocking reqwest client.

use std::io::Read;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use reqwest::blocking::Client;
use tracing::debug;

use super::{TransferError, TransferProgress, Transport};

/// Default timeout for HTTP requests in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Buffer size for reading response bodies (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Largest up-front body reservation taken from Content-Length (1MB).
const MAX_RESERVE: u64 = BUFFER_SIZE as u64 * 16;

/// HTTP transport.
///
/// `fetch` streams the response body into memory, updating the shared
/// progress counters after every chunk. `content_length` issues a HEAD request.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    timeout: Duration,
}

impl HttpTransport {
    /// Create a transport with the default timeout.
    pub fn new() -> Result<Self, TransferError> {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Create a transport with a custom timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self, TransferError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransferError::Request {
                url: String::new(),
                reason: format!("failed to create HTTP client: {}", e),
            })?;

        Ok(Self { client, timeout })
    }

    /// Configured request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn map_send_error(&self, url: &str, e: reqwest::Error) -> TransferError {
        if e.is_timeout() {
            TransferError::Timeout {
                url: url.to_string(),
                timeout_secs: self.timeout.as_secs(),
            }
        } else {
            TransferError::Request {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    }
}

impl Transport for HttpTransport {
    fn fetch(&self, url: &str, progress: &TransferProgress) -> Result<Bytes, TransferError> {
        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|e| self.map_send_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let total = response.content_length().unwrap_or(0);
        progress.set_total(total);

        // The header is untrusted; the buffer grows as bytes actually arrive.
        let mut body = BytesMut::with_capacity(total.min(MAX_RESERVE) as usize);
        let mut buffer = vec![0u8; BUFFER_SIZE];
        let mut downloaded = 0u64;

        loop {
            let bytes_read = response
                .read(&mut buffer)
                .map_err(|e| TransferError::Request {
                    url: url.to_string(),
                    reason: format!("read error: {}", e),
                })?;

            if bytes_read == 0 {
                break;
            }

            body.extend_from_slice(&buffer[..bytes_read]);
            downloaded += bytes_read as u64;
            progress.set_bytes(downloaded);
        }

        if total > 0 && downloaded != total {
            return Err(TransferError::Request {
                url: url.to_string(),
                reason: format!("body ended after {} of {} bytes", downloaded, total),
            });
        }
        if total == 0 {
            progress.set_total(downloaded);
        }
        debug!(url = %url, bytes = downloaded, "HTTP fetch complete");
        Ok(body.freeze())
    }

    fn content_length(&self, url: &str) -> Result<u64, TransferError> {
        let response = self
            .client
            .head(url)
            .send()
            .map_err(|e| self.map_send_error(url, e))?;

        if !response.status().is_success() {
            return Err(TransferError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        Ok(response
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0))
    }
}
