//! In-memory transport.
//!
//! Serves canned bodies keyed by URL. Used by tests and by tools that want to
//! drive the sync engine against a fixture without a server.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;

use super::{TransferError, TransferProgress, Transport};

/// Transport answering from an in-memory URL table.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    bodies: Mutex<HashMap<String, Bytes>>,
    failing: Mutex<HashSet<String>>,
    fetches: Mutex<HashMap<String, usize>>,
    probes: AtomicUsize,
}

impl MemoryTransport {
    /// Create an empty transport; every URL answers 404.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` for `url`.
    pub fn insert(&self, url: impl Into<String>, body: impl Into<Bytes>) {
        self.bodies.lock().insert(url.into(), body.into());
    }

    /// Make `url` fail with a 503 on fetch and probe.
    pub fn fail(&self, url: impl Into<String>) {
        self.failing.lock().insert(url.into());
    }

    /// Stop failing `url`.
    pub fn heal(&self, url: &str) {
        self.failing.lock().remove(url);
    }

    /// Number of `fetch` calls made for `url`.
    pub fn fetch_count(&self, url: &str) -> usize {
        self.fetches.lock().get(url).copied().unwrap_or(0)
    }

    /// Total number of `fetch` calls.
    pub fn total_fetches(&self) -> usize {
        self.fetches.lock().values().sum()
    }

    /// Number of `content_length` probes made.
    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    fn lookup(&self, url: &str) -> Result<Bytes, TransferError> {
        if self.failing.lock().contains(url) {
            return Err(TransferError::Status {
                url: url.to_string(),
                status: 503,
            });
        }
        self.bodies
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| TransferError::Status {
                url: url.to_string(),
                status: 404,
            })
    }
}

impl Transport for MemoryTransport {
    fn fetch(&self, url: &str, progress: &TransferProgress) -> Result<Bytes, TransferError> {
        *self.fetches.lock().entry(url.to_string()).or_insert(0) += 1;
        let body = self.lookup(url)?;
        progress.set_total(body.len() as u64);
        progress.set_bytes(body.len() as u64);
        Ok(body)
    }

    fn content_length(&self, url: &str) -> Result<u64, TransferError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.lookup(url).map(|b| b.len() as u64)
    }
}
