//! Sync sessions: version check, manifest fetch, delta download, commit.
//!
//! # State machine
//!
//! ```text
//! Idle ─► FetchingVersion ─► FetchingManifest ─► Planning ─► Downloading ─► Committing ─► Done
//!              │                   │                 │ no items                  │
//!              ▼                   ▼                 └──────────► Done           ▼
//!            Failed              Failed                                 Failed (any item failed)
//! ```
//!
//! A [`SyncOrchestrator`] is advanced by calling [`SyncOrchestrator::poll`]
//! from the caller's update loop; each poll performs at most one transition.
//! Waiting states, `Planning` included while bundle sizes are requested,
//! span as many polls as their transfers take.

mod endpoint;
mod orchestrator;

pub use endpoint::{
    parse_version, PatchEndpoint, VersionIndex, VERSIONS_SECTION, VERSION_INDEX_FILENAME,
};
pub use orchestrator::SyncOrchestrator;

use std::fmt;

use crate::manifest::Manifest;
use crate::planner::ExternalBundleSet;

/// Orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncState {
    Idle,
    FetchingVersion,
    FetchingManifest,
    Planning,
    Downloading,
    Committing,
    Done,
    Failed,
}

impl SyncState {
    /// Whether the session has ended.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Short lowercase label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::FetchingVersion => "fetching version",
            Self::FetchingManifest => "fetching manifest",
            Self::Planning => "planning",
            Self::Downloading => "downloading",
            Self::Committing => "committing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncProgress {
    pub state: SyncState,
    pub bytes_downloaded: u64,
    /// Sum of known item sizes; items whose probe failed count as 0.
    pub total_bytes: u64,
    pub items_done: usize,
    pub items_total: usize,
    pub items_failed: usize,
}

impl SyncProgress {
    pub(crate) fn idle(state: SyncState) -> Self {
        Self {
            state,
            bytes_downloaded: 0,
            total_bytes: 0,
            items_done: 0,
            items_total: 0,
            items_failed: 0,
        }
    }

    /// Fraction complete in `0.0..=1.0`.
    ///
    /// Uses bytes when sizes are known, item counts otherwise.
    pub fn fraction(&self) -> f64 {
        if self.total_bytes > 0 {
            (self.bytes_downloaded as f64 / self.total_bytes as f64).min(1.0)
        } else if self.items_total > 0 {
            self.items_done as f64 / self.items_total as f64
        } else if self.state == SyncState::Done {
            1.0
        } else {
            0.0
        }
    }

    /// Items that finished without error.
    pub fn items_succeeded(&self) -> usize {
        self.items_done - self.items_failed
    }
}

/// What the bundle loader needs from a finished session.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncOutcome {
    /// Release version, `None` when patching was skipped.
    pub version: Option<String>,
    /// Authoritative manifest for loading.
    pub manifest: Manifest,
    /// Bundles to read from the patch cache.
    pub external: ExternalBundleSet,
}

impl SyncOutcome {
    /// Baseline-only outcome: load everything from the shipped bundles.
    pub fn fallback(local: Manifest) -> Self {
        Self {
            version: None,
            manifest: local,
            external: ExternalBundleSet::new(),
        }
    }

    /// Whether this outcome came from skipping the patch step.
    pub fn is_fallback(&self) -> bool {
        self.version.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(SyncState::Done.is_terminal());
        assert!(SyncState::Failed.is_terminal());
        assert!(!SyncState::Downloading.is_terminal());
        assert_eq!(SyncState::FetchingManifest.to_string(), "fetching manifest");
    }

    #[test]
    fn test_progress_fraction_falls_back_to_item_counts() {
        let mut progress = SyncProgress::idle(SyncState::Downloading);
        progress.items_total = 4;
        progress.items_done = 1;
        assert_eq!(progress.fraction(), 0.25);

        progress.total_bytes = 200;
        progress.bytes_downloaded = 150;
        assert_eq!(progress.fraction(), 0.75);
    }

    #[test]
    fn test_fallback_outcome() {
        let outcome = SyncOutcome::fallback(Manifest::empty());
        assert!(outcome.is_fallback());
        assert!(outcome.external.is_empty());
    }
}
