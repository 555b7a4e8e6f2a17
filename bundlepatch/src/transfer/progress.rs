//! Byte-level progress counters shared between a transfer worker and its handles.

use std::sync::atomic::{AtomicU64, Ordering};

/// Progress counters for a single transfer.
///
/// Written by the transport on its I/O thread, read by the main tick.
#[derive(Debug, Default)]
pub struct TransferProgress {
    bytes: AtomicU64,
    total: AtomicU64,
}

impl TransferProgress {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the expected body length (0 = unknown).
    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::SeqCst);
    }

    /// Record the number of bytes received so far.
    pub fn set_bytes(&self, bytes: u64) {
        self.bytes.store(bytes, Ordering::SeqCst);
    }

    /// Bytes received so far.
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::SeqCst)
    }

    /// Expected body length, 0 if unknown.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    /// Fraction complete in `0.0..=1.0`; 0 while the length is unknown.
    pub fn fraction(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        (self.bytes() as f64 / total as f64).min(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fraction_unknown_total() {
        let progress = TransferProgress::new();
        progress.set_bytes(500);
        assert_eq!(progress.fraction(), 0.0);
    }

    #[test]
    fn test_fraction_by_bytes() {
        let progress = TransferProgress::new();
        progress.set_total(1000);
        progress.set_bytes(250);
        assert_eq!(progress.fraction(), 0.25);

        progress.set_bytes(1200);
        assert_eq!(progress.fraction(), 1.0);
    }
}
