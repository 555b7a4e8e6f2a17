//! Bounded-concurrency transfer queue with request coalescing.
//!
//! The queue is driven by the caller: every [`TransferQueue::tick`] first
//! reaps transfers whose worker has finished, then promotes pending requests
//! (FIFO) while fewer than `max_in_progress` transfers are active.
//!
//! ```text
//! download(url) ──► in-flight map ──hit──► existing handle
//!                        │ miss
//!                        ▼
//!                  pending (FIFO) ──tick, under limit──► active (I/O thread)
//!                                                           │ finished
//!                                                           ▼
//!                                               tick reaps: handle.done = true
//! ```
//!
//! Size probes ([`TransferQueue::probe`]) go through the same queue and
//! limit; a finished probe reports the length as its `total_bytes` and has
//! an empty payload.
//!
//! Once started, a transfer runs to completion on its I/O thread even if every
//! handle is dropped; there is no per-transfer cancellation.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::{TransferError, TransferProgress, Transport};

/// Default number of concurrent transfers.
pub const DEFAULT_MAX_IN_PROGRESS: usize = 4;

/// What a queued request does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferKind {
    /// Download the body.
    Fetch,
    /// Ask for the body length only.
    Probe,
}

#[derive(Debug)]
struct TransferShared {
    url: String,
    kind: TransferKind,
    progress: TransferProgress,
    outcome: Mutex<Option<Result<Bytes, TransferError>>>,
    started: AtomicBool,
    done: AtomicBool,
}

/// Handle to a queued or running transfer.
///
/// Cloning a handle adds another listener to the same transfer.
#[derive(Debug, Clone)]
pub struct TransferHandle {
    shared: Arc<TransferShared>,
}

impl TransferHandle {
    fn new(url: &str, kind: TransferKind) -> Self {
        Self {
            shared: Arc::new(TransferShared {
                url: url.to_string(),
                kind,
                progress: TransferProgress::new(),
                outcome: Mutex::new(None),
                started: AtomicBool::new(false),
                done: AtomicBool::new(false),
            }),
        }
    }

    /// URL being transferred.
    pub fn url(&self) -> &str {
        &self.shared.url
    }

    /// Whether this is a download or a size probe.
    pub fn kind(&self) -> TransferKind {
        self.shared.kind
    }

    /// Bytes received so far.
    pub fn bytes_downloaded(&self) -> u64 {
        self.shared.progress.bytes()
    }

    /// Expected size, 0 if unknown.
    pub fn total_bytes(&self) -> u64 {
        self.shared.progress.total()
    }

    /// Fraction complete in `0.0..=1.0`. A finished successful transfer is 1.0.
    pub fn progress_fraction(&self) -> f64 {
        if self.is_done() && self.error().is_none() {
            return 1.0;
        }
        self.shared.progress.fraction()
    }

    /// Whether the transfer has been promoted to an I/O thread.
    pub fn is_started(&self) -> bool {
        self.shared.started.load(Ordering::SeqCst)
    }

    /// Whether the transfer has finished (successfully or not) and been reaped.
    pub fn is_done(&self) -> bool {
        self.shared.done.load(Ordering::SeqCst)
    }

    /// Terminal error; `None` while running or on success.
    pub fn error(&self) -> Option<TransferError> {
        if !self.is_done() {
            return None;
        }
        match &*self.shared.outcome.lock() {
            Some(Err(e)) => Some(e.clone()),
            _ => None,
        }
    }

    /// Body of a successful transfer.
    pub fn payload(&self) -> Option<Bytes> {
        if !self.is_done() {
            return None;
        }
        match &*self.shared.outcome.lock() {
            Some(Ok(body)) => Some(body.clone()),
            _ => None,
        }
    }

    /// Terminal outcome, once done.
    pub fn result(&self) -> Option<Result<Bytes, TransferError>> {
        if !self.is_done() {
            return None;
        }
        self.shared.outcome.lock().clone()
    }

    /// Number of live handles attached to this transfer.
    pub fn listener_count(&self) -> usize {
        Arc::strong_count(&self.shared)
    }

    /// Whether two handles refer to the same transfer.
    pub fn same_transfer(&self, other: &TransferHandle) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    fn worker_finished(&self) -> bool {
        self.shared.outcome.lock().is_some()
    }
}

struct ActiveTransfer {
    handle: TransferHandle,
    worker: JoinHandle<()>,
}

/// Bounded-concurrency downloader.
pub struct TransferQueue {
    transport: Arc<dyn Transport>,
    max_in_progress: usize,
    in_flight: HashMap<(TransferKind, String), TransferHandle>,
    pending: VecDeque<TransferHandle>,
    active: Vec<ActiveTransfer>,
}

impl std::fmt::Debug for TransferQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferQueue")
            .field("max_in_progress", &self.max_in_progress)
            .field("pending", &self.pending.len())
            .field("active", &self.active.len())
            .finish()
    }
}

impl TransferQueue {
    /// Create a queue with the default concurrency limit.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_limit(transport, DEFAULT_MAX_IN_PROGRESS)
    }

    /// Create a queue with a custom concurrency limit (minimum 1).
    pub fn with_limit(transport: Arc<dyn Transport>, max_in_progress: usize) -> Self {
        Self {
            transport,
            max_in_progress: max_in_progress.max(1),
            in_flight: HashMap::new(),
            pending: VecDeque::new(),
            active: Vec::new(),
        }
    }

    /// Concurrency limit.
    pub fn max_in_progress(&self) -> usize {
        self.max_in_progress
    }

    /// Request `url`.
    ///
    /// If the same URL is already queued or running, the existing handle is
    /// returned and no second request is issued.
    pub fn download(&mut self, url: &str) -> TransferHandle {
        self.enqueue(url, TransferKind::Fetch)
    }

    /// Request the body length of `url` on an I/O thread.
    ///
    /// Coalesced with other probes of the same URL, never with downloads.
    pub fn probe(&mut self, url: &str) -> TransferHandle {
        self.enqueue(url, TransferKind::Probe)
    }

    fn enqueue(&mut self, url: &str, kind: TransferKind) -> TransferHandle {
        let key = (kind, url.to_string());
        if let Some(existing) = self.in_flight.get(&key) {
            trace!(url = %url, kind = ?kind, "Coalescing with in-flight transfer");
            return existing.clone();
        }

        let handle = TransferHandle::new(url, kind);
        self.in_flight.insert(key, handle.clone());
        self.pending.push_back(handle.clone());
        debug!(url = %url, kind = ?kind, pending = self.pending.len(), "Transfer queued");
        handle
    }

    /// Advance the queue: reap finished transfers, then promote pending ones.
    pub fn tick(&mut self) {
        self.reap();
        self.promote();
    }

    /// Number of queued, not yet started transfers.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Number of running transfers.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Whether nothing is queued or running.
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.active.is_empty()
    }

    fn reap(&mut self) {
        let mut i = self.active.len();
        while i > 0 {
            i -= 1;
            let finished = {
                let entry = &self.active[i];
                entry.handle.worker_finished() || entry.worker.is_finished()
            };
            if !finished {
                continue;
            }

            let entry = self.active.swap_remove(i);
            if entry.worker.join().is_err() {
                warn!(url = %entry.handle.url(), "Transfer worker panicked");
            }

            {
                let mut outcome = entry.handle.shared.outcome.lock();
                if outcome.is_none() {
                    *outcome = Some(Err(TransferError::Request {
                        url: entry.handle.url().to_string(),
                        reason: "transfer worker terminated without a result".to_string(),
                    }));
                }
            }

            entry.handle.shared.done.store(true, Ordering::SeqCst);
            self.in_flight
                .remove(&(entry.handle.kind(), entry.handle.url().to_string()));

            match entry.handle.error() {
                Some(e) => debug!(url = %entry.handle.url(), error = %e, "Transfer failed"),
                None => debug!(
                    url = %entry.handle.url(),
                    bytes = entry.handle.bytes_downloaded(),
                    "Transfer complete"
                ),
            }
        }
    }

    fn promote(&mut self) {
        while self.active.len() < self.max_in_progress {
            let Some(handle) = self.pending.pop_front() else {
                break;
            };

            let transport = Arc::clone(&self.transport);
            let shared = Arc::clone(&handle.shared);
            shared.started.store(true, Ordering::SeqCst);

            let worker = thread::spawn(move || {
                let result = match shared.kind {
                    TransferKind::Fetch => transport.fetch(&shared.url, &shared.progress),
                    TransferKind::Probe => transport.content_length(&shared.url).map(|len| {
                        shared.progress.set_total(len);
                        Bytes::new()
                    }),
                };
                *shared.outcome.lock() = Some(result);
            });

            trace!(url = %handle.url(), active = self.active.len() + 1, "Transfer started");
            self.active.push(ActiveTransfer { handle, worker });
        }
    }
}
