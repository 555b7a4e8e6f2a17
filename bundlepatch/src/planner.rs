//! Delta planning: which bundles of the remote manifest must be downloaded.
//!
//! For every bundle in the remote manifest:
//!
//! 1. absent from the local manifest → **new**;
//!    present with a different hash → **updated**;
//!    same hash → skipped, never planned.
//! 2. New and updated bundles form the [`ExternalBundleSet`]: the loader must
//!    read them from the patch cache rather than the baseline.
//! 3. An external bundle whose patch-record hash already equals the remote
//!    hash is satisfied by an earlier (possibly interrupted) sync and is not
//!    downloaded again.
//! 4. Each remaining bundle becomes a [`DownloadItem`] whose byte size is
//!    filled in by a metadata probe.
//!
//! [`select`] performs steps 1-3 without touching the network; the sync
//! orchestrator runs the size probes on the transfer queue and records them
//! with [`DownloadPlan::set_size`]. [`DeltaPlanner::plan`] does both in one
//! blocking call.
//!
//! Hash equality is the only test for "unchanged": a bundle whose name and
//! size match but whose hash differs is always fetched. Output order is the
//! remote manifest order.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::cache::PatchRecord;
use crate::error::ItemError;
use crate::manifest::{BundleEntry, Manifest};
use crate::transfer::{join_url, Transport};

/// Why a bundle is being fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Not present in the baseline.
    New,
    /// Present in the baseline with a different hash.
    Updated,
}

/// One bundle to download during a sync session.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadItem {
    /// Bundle name.
    pub bundle: String,
    /// Hash from the remote manifest the payload must match.
    pub expected_hash: String,
    /// Source URL.
    pub url: String,
    /// New or updated.
    pub kind: ChangeKind,
    /// Size from the metadata probe, 0 if unknown.
    pub total_bytes: u64,
    /// Bytes received so far.
    pub bytes_downloaded: u64,
    /// Whether the item reached a terminal state.
    pub done: bool,
    /// Terminal error, `None` on success.
    pub error: Option<ItemError>,
}

impl DownloadItem {
    fn new(entry: &BundleEntry, kind: ChangeKind, url: String, total_bytes: u64) -> Self {
        Self {
            bundle: entry.name.clone(),
            expected_hash: entry.hash.clone(),
            url,
            kind,
            total_bytes,
            bytes_downloaded: 0,
            done: false,
            error: None,
        }
    }

    /// Finished without error.
    pub fn succeeded(&self) -> bool {
        self.done && self.error.is_none()
    }

    /// Finished with an error.
    pub fn failed(&self) -> bool {
        self.done && self.error.is_some()
    }
}

/// Bundles that must be read from the patch cache this session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalBundleSet {
    names: HashSet<String>,
}

impl ExternalBundleSet {
    /// An empty set: every bundle comes from the baseline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a bundle as external.
    pub fn insert(&mut self, bundle: impl Into<String>) {
        self.names.insert(bundle.into());
    }

    /// Whether the bundle must be read from the patch cache.
    pub fn contains(&self, bundle: &str) -> bool {
        self.names.contains(bundle)
    }

    /// Number of external bundles.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether every bundle comes from the baseline.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Iterate in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for ExternalBundleSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            names: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// Output of a planning pass.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadPlan {
    /// Bundles to download, in remote manifest order.
    pub items: Vec<DownloadItem>,
    /// Sum of probed sizes.
    pub total_bytes: u64,
    /// New and updated bundles, including ones already in the patch cache.
    pub external: ExternalBundleSet,
    /// External bundles skipped because the patch cache already has them.
    pub already_cached: usize,
}

impl DownloadPlan {
    /// Whether there is nothing to download.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Record the probed size of item `index`.
    pub fn set_size(&mut self, index: usize, size: u64) {
        if let Some(item) = self.items.get_mut(index) {
            self.total_bytes = self.total_bytes - item.total_bytes + size;
            item.total_bytes = size;
        }
    }

    /// Names of planned bundles, in order.
    pub fn bundles(&self) -> Vec<&str> {
        self.items.iter().map(|i| i.bundle.as_str()).collect()
    }
}

/// Compare two manifests, yielding changed remote entries in remote order.
pub fn diff<'a>(local: &Manifest, remote: &'a Manifest) -> Vec<(&'a BundleEntry, ChangeKind)> {
    remote
        .entries()
        .iter()
        .filter_map(|entry| match local.hash(&entry.name) {
            None => Some((entry, ChangeKind::New)),
            Some(h) if h != entry.hash => Some((entry, ChangeKind::Updated)),
            Some(_) => None,
        })
        .collect()
}

/// Choose the downloads needed to move from `local` + `record` to `remote`.
///
/// Every item has size 0 until [`DownloadPlan::set_size`] is called.
/// `release_url` is the directory URL bundle names are appended to.
pub fn select(
    local: &Manifest,
    remote: &Manifest,
    record: &PatchRecord,
    release_url: &str,
) -> DownloadPlan {
    let mut items = Vec::new();
    let mut external = ExternalBundleSet::new();
    let mut already_cached = 0usize;

    for (entry, kind) in diff(local, remote) {
        external.insert(entry.name.clone());

        if record.is_cached(&entry.name, &entry.hash) {
            already_cached += 1;
            debug!(bundle = %entry.name, "Already in patch cache");
            continue;
        }

        let url = join_url(release_url, &[&entry.name]);
        debug!(bundle = %entry.name, kind = ?kind, hash = %entry.hash, "Planned download");
        items.push(DownloadItem::new(entry, kind, url, 0));
    }

    DownloadPlan {
        items,
        total_bytes: 0,
        external,
        already_cached,
    }
}

/// Computes download plans, probing sizes synchronously.
pub struct DeltaPlanner<'a> {
    transport: &'a dyn Transport,
}

impl<'a> DeltaPlanner<'a> {
    /// Create a planner probing sizes through `transport`.
    pub fn new(transport: &'a dyn Transport) -> Self {
        Self { transport }
    }

    /// Plan the downloads needed to move from `local` + `record` to `remote`.
    ///
    /// `release_url` is the directory URL bundle names are appended to. A
    /// failed size probe records size 0; the download itself will surface the
    /// error.
    pub fn plan(
        &self,
        local: &Manifest,
        remote: &Manifest,
        record: &PatchRecord,
        release_url: &str,
    ) -> DownloadPlan {
        let mut plan = select(local, remote, record, release_url);
        for index in 0..plan.items.len() {
            let item = &plan.items[index];
            let size = match self.transport.content_length(&item.url) {
                Ok(size) => size,
                Err(e) => {
                    warn!(bundle = %item.bundle, error = %e, "Size probe failed");
                    0
                }
            };
            plan.set_size(index, size);
        }
        plan
    }
}
