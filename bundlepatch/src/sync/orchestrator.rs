//! Poll-driven sync session.

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::endpoint::{parse_version, PatchEndpoint, VersionIndex};
use super::{SyncOutcome, SyncProgress, SyncState};
use crate::cache::PatchCache;
use crate::checksum::verify_payload;
use crate::config::SyncConfig;
use crate::error::{ItemError, SyncError, SyncResult};
use crate::manifest::{Manifest, ManifestStore};
use crate::planner::{self, DownloadItem, ExternalBundleSet};
use crate::transfer::{DefaultTransport, TransferError, TransferHandle, TransferQueue, Transport};

/// Drives one sync session through its states.
///
/// The orchestrator never blocks on the network: version and manifest
/// requests, size probes and downloads all run on the transfer queue's I/O
/// threads and [`poll`](Self::poll) only checks whether they finished. Abandoning a session means dropping the orchestrator;
/// transfers already started run to completion in the background.
pub struct SyncOrchestrator {
    config: SyncConfig,
    endpoint: PatchEndpoint,
    queue: TransferQueue,
    state: SyncState,
    error: Option<SyncError>,

    local: Option<Manifest>,
    cache: Option<PatchCache>,
    version: Option<String>,
    pending: Option<TransferHandle>,
    remote: Option<Manifest>,
    items: Vec<DownloadItem>,
    sizes: Vec<TransferHandle>,
    handles: Vec<TransferHandle>,
    external: ExternalBundleSet,
    outcome: Option<SyncOutcome>,
}

impl std::fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("state", &self.state)
            .field("version", &self.version)
            .field("items", &self.items.len())
            .finish_non_exhaustive()
    }
}

impl SyncOrchestrator {
    /// Create an orchestrator fetching through `transport`.
    pub fn new(config: SyncConfig, transport: Arc<dyn Transport>) -> SyncResult<Self> {
        config.validate()?;
        let queue = TransferQueue::with_limit(transport, config.max_concurrent_downloads);
        Ok(Self {
            endpoint: PatchEndpoint::from_config(&config),
            config,
            queue,
            state: SyncState::Idle,
            error: None,
            local: None,
            cache: None,
            version: None,
            pending: None,
            remote: None,
            items: Vec::new(),
            sizes: Vec::new(),
            handles: Vec::new(),
            external: ExternalBundleSet::new(),
            outcome: None,
        })
    }

    /// Create an orchestrator with the scheme-dispatching default transport.
    pub fn with_default_transport(config: SyncConfig) -> SyncResult<Self> {
        let transport = DefaultTransport::new(config.timeout)?;
        Self::new(config, Arc::new(transport))
    }

    /// Current state.
    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Session configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Patch cache root of this session.
    pub fn cache_dir(&self) -> &Path {
        &self.config.cache_dir
    }

    /// Error that ended the session, if it failed.
    pub fn error(&self) -> Option<&SyncError> {
        self.error.as_ref()
    }

    /// Resolved release version.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Baseline manifest, once loaded.
    pub fn local_manifest(&self) -> Option<&Manifest> {
        self.local.as_ref()
    }

    /// Remote manifest, once fetched.
    pub fn remote_manifest(&self) -> Option<&Manifest> {
        self.remote.as_ref()
    }

    /// Planned download items.
    pub fn items(&self) -> &[DownloadItem] {
        &self.items
    }

    /// Items that ended in error.
    pub fn failed_items(&self) -> impl Iterator<Item = &DownloadItem> {
        self.items.iter().filter(|i| i.failed())
    }

    /// Loader input once the session is `Done`.
    pub fn outcome(&self) -> Option<&SyncOutcome> {
        self.outcome.as_ref()
    }

    /// Snapshot of session progress.
    pub fn progress(&self) -> SyncProgress {
        let mut progress = SyncProgress::idle(self.state);
        progress.items_total = self.items.len();
        for item in &self.items {
            progress.bytes_downloaded += item.bytes_downloaded;
            progress.total_bytes += item.total_bytes;
            if item.done {
                progress.items_done += 1;
            }
            if item.failed() {
                progress.items_failed += 1;
            }
        }
        progress
    }

    /// Return a finished orchestrator to `Idle` for a fresh session.
    pub fn reset(&mut self) -> SyncResult<()> {
        if !self.state.is_terminal() && self.state != SyncState::Idle {
            return Err(SyncError::InvalidState(format!(
                "cannot reset while {}",
                self.state
            )));
        }
        self.state = SyncState::Idle;
        self.error = None;
        self.local = None;
        self.cache = None;
        self.version = None;
        self.pending = None;
        self.remote = None;
        self.items.clear();
        self.sizes.clear();
        self.handles.clear();
        self.external = ExternalBundleSet::new();
        self.outcome = None;
        debug!("Orchestrator reset");
        Ok(())
    }

    /// Poll until the session ends, sleeping `interval` between polls.
    pub fn run_to_completion(&mut self, interval: Duration) -> SyncResult<SyncOutcome> {
        while !self.poll().is_terminal() {
            if self.is_waiting() {
                thread::sleep(interval);
            }
        }
        self.finish()
    }

    /// Result of a terminal session.
    pub fn finish(&self) -> SyncResult<SyncOutcome> {
        match (self.state, &self.outcome, &self.error) {
            (SyncState::Done, Some(outcome), _) => Ok(outcome.clone()),
            (SyncState::Failed, _, Some(error)) => Err(error.clone()),
            (state, _, _) => Err(SyncError::InvalidState(format!(
                "session has not finished ({})",
                state
            ))),
        }
    }

    /// Advance the session by at most one state transition.
    pub fn poll(&mut self) -> SyncState {
        let step = match self.state {
            SyncState::Idle => self.start(),
            SyncState::FetchingVersion => self.poll_version(),
            SyncState::FetchingManifest => self.poll_manifest(),
            SyncState::Planning => self.plan(),
            SyncState::Downloading => self.poll_downloads(),
            SyncState::Committing => self.commit(),
            SyncState::Done | SyncState::Failed => Ok(()),
        };

        if let Err(e) = step {
            self.fail(e);
        }
        self.state
    }

    fn is_waiting(&self) -> bool {
        matches!(
            self.state,
            SyncState::FetchingVersion
                | SyncState::FetchingManifest
                | SyncState::Planning
                | SyncState::Downloading
        )
    }

    fn transition(&mut self, next: SyncState) {
        debug!(from = %self.state, to = %next, "Sync state change");
        self.state = next;
    }

    fn fail(&mut self, error: SyncError) {
        warn!(state = %self.state, error = %error, "Sync session failed");
        self.error = Some(error);
        self.state = SyncState::Failed;
    }

    fn start(&mut self) -> SyncResult<()> {
        let local = ManifestStore::load_local(&self.config.baseline_manifest_path())?;

        if self.config.skip_patching {
            info!("Patching skipped, using baseline bundles");
            self.outcome = Some(SyncOutcome::fallback(local.clone()));
            self.local = Some(local);
            self.transition(SyncState::Done);
            return Ok(());
        }

        self.cache = Some(PatchCache::open(&self.config.cache_dir)?);
        self.local = Some(local);

        if self.config.version_index.is_none() {
            let url = self.endpoint.version_url();
            info!(url = %url, "Checking published version");
            self.pending = Some(self.queue.download(&url));
        }
        self.transition(SyncState::FetchingVersion);
        Ok(())
    }

    fn poll_version(&mut self) -> SyncResult<()> {
        let version = match self.config.version_index.clone() {
            Some(path) => Some(read_offline_version(&path, &self.endpoint)?),
            None => match self.take_finished()? {
                Some(body) => Some(parse_version(&body).ok_or_else(|| {
                    SyncError::Network(TransferError::Request {
                        url: self.endpoint.version_url(),
                        reason: "empty or malformed version response".to_string(),
                    })
                })?),
                None => None,
            },
        };

        if let Some(version) = version {
            let url = self
                .endpoint
                .manifest_url(&version, self.config.manifest_name.as_deref());
            info!(version = %version, platform = %self.endpoint.platform(), "Resolved version");
            self.pending = Some(self.queue.download(&url));
            self.version = Some(version);
            self.transition(SyncState::FetchingManifest);
        }
        Ok(())
    }

    fn poll_manifest(&mut self) -> SyncResult<()> {
        let Some(handle) = self.pending.clone() else {
            return Err(SyncError::InvalidState("no manifest request".to_string()));
        };
        if let Some(body) = self.take_finished()? {
            let remote = ManifestStore::parse(handle.url(), &body)?;
            info!(bundles = remote.len(), "Fetched remote manifest");
            self.remote = Some(remote);
            self.transition(SyncState::Planning);
        }
        Ok(())
    }

    fn plan(&mut self) -> SyncResult<()> {
        if self.sizes.is_empty() {
            self.select()
        } else {
            self.poll_sizes()
        }
    }

    /// Diff the manifests and queue one size request per planned item.
    fn select(&mut self) -> SyncResult<()> {
        let (Some(local), Some(remote), Some(cache), Some(version)) =
            (&self.local, &self.remote, &self.cache, &self.version)
        else {
            return Err(SyncError::InvalidState("planning without manifests".to_string()));
        };

        let release_url = self.endpoint.release_url(version);
        let plan = planner::select(local, remote, cache.record(), &release_url);
        debug!(
            downloads = plan.items.len(),
            external = plan.external.len(),
            cached = plan.already_cached,
            "Selected bundles"
        );

        self.external = plan.external;
        self.items = plan.items;

        if self.items.is_empty() {
            info!(cached = plan.already_cached, "Nothing to download");
            self.complete();
            return Ok(());
        }

        self.sizes = self
            .items
            .iter()
            .map(|item| self.queue.probe(&item.url))
            .collect();
        Ok(())
    }

    /// Record sizes once every probe finished, then start the downloads.
    fn poll_sizes(&mut self) -> SyncResult<()> {
        self.queue.tick();
        if !self.sizes.iter().all(TransferHandle::is_done) {
            return Ok(());
        }

        for (item, handle) in self.items.iter_mut().zip(&self.sizes) {
            item.total_bytes = match handle.error() {
                Some(e) => {
                    warn!(bundle = %item.bundle, error = %e, "Size probe failed");
                    0
                }
                None => handle.total_bytes(),
            };
        }
        self.sizes.clear();

        info!(
            downloads = self.items.len(),
            bytes = self.items.iter().map(|i| i.total_bytes).sum::<u64>(),
            external = self.external.len(),
            "Planned sync"
        );

        self.handles = self
            .items
            .iter()
            .map(|item| self.queue.download(&item.url))
            .collect();
        self.transition(SyncState::Downloading);
        Ok(())
    }

    fn poll_downloads(&mut self) -> SyncResult<()> {
        self.queue.tick();

        for (item, handle) in self.items.iter_mut().zip(&self.handles) {
            if item.done {
                continue;
            }
            item.bytes_downloaded = handle.bytes_downloaded();
            item.total_bytes = item.total_bytes.max(handle.total_bytes());
            if handle.is_done() {
                item.done = true;
                if let Some(e) = handle.error() {
                    warn!(bundle = %item.bundle, error = %e, "Download failed");
                    item.error = Some(ItemError::Network(e));
                }
            }
        }

        if self.items.iter().all(|i| i.done) {
            self.transition(SyncState::Committing);
        }
        Ok(())
    }

    fn commit(&mut self) -> SyncResult<()> {
        let Some(cache) = self.cache.as_mut() else {
            return Err(SyncError::InvalidState("committing without a cache".to_string()));
        };

        for (item, handle) in self.items.iter_mut().zip(&self.handles) {
            if item.error.is_some() {
                continue;
            }
            let Some(payload) = handle.payload() else {
                item.error = Some(ItemError::Network(TransferError::Request {
                    url: item.url.clone(),
                    reason: "transfer finished without a payload".to_string(),
                }));
                continue;
            };

            if let Err(actual) = verify_payload(&payload, &item.expected_hash) {
                warn!(
                    bundle = %item.bundle,
                    expected = %item.expected_hash,
                    actual = %actual,
                    "Payload hash mismatch, not committed"
                );
                item.error = Some(ItemError::Integrity {
                    expected: item.expected_hash.clone(),
                    actual,
                });
                continue;
            }

            if let Err(e) = cache.commit(
                &item.bundle,
                &item.expected_hash,
                &payload,
                self.version.as_deref(),
            ) {
                warn!(bundle = %item.bundle, error = %e, "Commit failed");
                item.error = Some(ItemError::from(e));
            }
        }

        let failed: Vec<&DownloadItem> = self.items.iter().filter(|i| i.error.is_some()).collect();
        if let Some(first) = failed.first() {
            info!(
                committed = self.items.len() - failed.len(),
                failed = failed.len(),
                "Sync finished with failures"
            );
            let error = first
                .error
                .as_ref()
                .map(|e| e.to_sync_error(&first.bundle))
                .unwrap_or_else(|| SyncError::InvalidState("missing item error".to_string()));
            return Err(error);
        }

        self.complete();
        Ok(())
    }

    fn complete(&mut self) {
        if let Some(remote) = &self.remote {
            self.outcome = Some(SyncOutcome {
                version: self.version.clone(),
                manifest: remote.clone(),
                external: self.external.clone(),
            });
        }
        info!(
            version = ?self.version,
            downloaded = self.items.len(),
            "Sync complete"
        );
        self.transition(SyncState::Done);
    }

    /// Tick the queue and take the pending request's body once it finishes.
    fn take_finished(&mut self) -> SyncResult<Option<bytes::Bytes>> {
        self.queue.tick();
        let Some(handle) = &self.pending else {
            return Err(SyncError::InvalidState("no request in flight".to_string()));
        };
        match handle.result() {
            None => Ok(None),
            Some(result) => {
                self.pending = None;
                Ok(Some(result?))
            }
        }
    }
}

fn read_offline_version(path: &Path, endpoint: &PatchEndpoint) -> SyncResult<String> {
    let index = VersionIndex::load(path)?;
    index.require(endpoint.platform(), path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::payload_hash;
    use crate::manifest::ManifestBuilder;
    use crate::platform::Platform;
    use crate::transfer::{MemoryTransport, TransferProgress};
    use bytes::Bytes;
    use std::fs;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Instant;
    use tempfile::TempDir;

    const BASE: &str = "mem://cdn";

    struct Fixture {
        _temp: TempDir,
        config: SyncConfig,
        transport: Arc<MemoryTransport>,
    }

    fn fixture(local: &Manifest) -> Fixture {
        let temp = TempDir::new().unwrap();
        let baseline = temp.path().join("baseline");
        fs::create_dir_all(&baseline).unwrap();
        fs::write(baseline.join("Android"), local.to_bytes()).unwrap();

        let config = SyncConfig::new(BASE)
            .with_platform(Platform::Android)
            .with_cache_dir(temp.path().join("cache"))
            .with_baseline_dir(&baseline);

        Fixture {
            _temp: temp,
            config,
            transport: Arc::new(MemoryTransport::new()),
        }
    }

    fn publish(transport: &MemoryTransport, version: &str, bundles: &[(&str, &[u8])]) -> Manifest {
        transport.insert(format!("{}/patch?platform=Android", BASE), version.to_string());
        let mut builder = ManifestBuilder::new(version);
        for (name, body) in bundles {
            builder = builder.bundle(*name, payload_hash(body));
            transport.insert(
                format!("{}/AssetBundles/{}/{}", BASE, version, name),
                body.to_vec(),
            );
        }
        let manifest = builder.build().unwrap();
        transport.insert(
            format!("{}/AssetBundles/{}/{}", BASE, version, version),
            manifest.to_bytes(),
        );
        manifest
    }

    fn run(orchestrator: &mut SyncOrchestrator) -> SyncResult<SyncOutcome> {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !orchestrator.poll().is_terminal() {
            assert!(Instant::now() < deadline, "sync did not finish");
            thread::sleep(Duration::from_millis(1));
        }
        orchestrator.finish()
    }

    #[test]
    fn test_states_advance_one_step_per_poll() {
        let local = ManifestBuilder::new("base").build().unwrap();
        let fx = fixture(&local);
        publish(&fx.transport, "r1", &[("a", b"alpha")]);

        let mut orchestrator = SyncOrchestrator::new(fx.config.clone(), fx.transport.clone()).unwrap();
        assert_eq!(orchestrator.state(), SyncState::Idle);
        assert_eq!(orchestrator.poll(), SyncState::FetchingVersion);

        let outcome = run(&mut orchestrator).unwrap();
        assert_eq!(outcome.version.as_deref(), Some("r1"));
        assert!(outcome.external.contains("a"));
        assert_eq!(orchestrator.progress().items_done, 1);
        assert_eq!(orchestrator.progress().fraction(), 1.0);
    }

    #[test]
    fn test_nothing_to_download_goes_straight_to_done() {
        let fx = fixture(&Manifest::empty());
        let remote = publish(&fx.transport, "r1", &[("a", b"alpha")]);
        fs::write(
            fx.config.baseline_manifest_path(),
            remote.to_bytes(),
        )
        .unwrap();

        let mut orchestrator = SyncOrchestrator::new(fx.config.clone(), fx.transport.clone()).unwrap();
        let outcome = run(&mut orchestrator).unwrap();
        assert!(outcome.external.is_empty());
        assert!(orchestrator.items().is_empty());
        assert_eq!(fx.transport.fetch_count("mem://cdn/AssetBundles/r1/a"), 0);
    }

    #[test]
    fn test_version_failure_is_network_error() {
        let fx = fixture(&Manifest::empty());
        fx.transport.fail(format!("{}/patch?platform=Android", BASE));

        let mut orchestrator = SyncOrchestrator::new(fx.config.clone(), fx.transport.clone()).unwrap();
        let err = run(&mut orchestrator).unwrap_err();
        assert!(matches!(err, SyncError::Network(_)));
        assert!(err.is_recoverable());
        assert_eq!(orchestrator.state(), SyncState::Failed);
    }

    #[test]
    fn test_malformed_manifest_is_manifest_error() {
        let fx = fixture(&Manifest::empty());
        fx.transport.insert(format!("{}/patch?platform=Android", BASE), "r1");
        fx.transport.insert(format!("{}/AssetBundles/r1/r1", BASE), &b"garbage"[..]);

        let mut orchestrator = SyncOrchestrator::new(fx.config.clone(), fx.transport.clone()).unwrap();
        assert!(matches!(
            run(&mut orchestrator),
            Err(SyncError::Manifest { .. })
        ));
    }

    #[test]
    fn test_missing_baseline_fails_session() {
        let temp = TempDir::new().unwrap();
        let config = SyncConfig::new(BASE)
            .with_cache_dir(temp.path().join("cache"))
            .with_baseline_dir(temp.path().join("nothing"));

        let mut orchestrator =
            SyncOrchestrator::new(config, Arc::new(MemoryTransport::new())).unwrap();
        assert!(matches!(
            run(&mut orchestrator),
            Err(SyncError::BaselineMissing(_))
        ));
    }

    #[test]
    fn test_skip_patching_yields_fallback() {
        let local = ManifestBuilder::new("base").bundle("a", "h1").build().unwrap();
        let fx = fixture(&local);
        let config = fx.config.clone().with_skip_patching(true);

        let mut orchestrator = SyncOrchestrator::new(config, fx.transport.clone()).unwrap();
        let outcome = run(&mut orchestrator).unwrap();
        assert!(outcome.is_fallback());
        assert_eq!(outcome.manifest, local);
        assert_eq!(fx.transport.total_fetches(), 0);
    }

    #[test]
    fn test_offline_version_index() {
        let fx = fixture(&Manifest::empty());
        publish(&fx.transport, "r7", &[("a", b"alpha")]);
        let index_path = fx.config.cache_dir.with_file_name("versions.ini");
        let mut index = VersionIndex::new();
        index.set(Platform::Android, "r7");
        index.save(&index_path).unwrap();

        let config = fx.config.clone().with_version_index(&index_path);
        let mut orchestrator = SyncOrchestrator::new(config, fx.transport.clone()).unwrap();
        let outcome = run(&mut orchestrator).unwrap();

        assert_eq!(outcome.version.as_deref(), Some("r7"));
        assert_eq!(
            fx.transport.fetch_count("mem://cdn/patch?platform=Android"),
            0
        );
    }

    #[test]
    fn test_offline_index_without_platform_is_recoverable() {
        let fx = fixture(&Manifest::empty());
        let index_path = fx.config.cache_dir.with_file_name("versions.ini");
        let mut index = VersionIndex::new();
        index.set(Platform::Ios, "r7");
        index.save(&index_path).unwrap();

        let config = fx.config.clone().with_version_index(&index_path);
        let mut orchestrator = SyncOrchestrator::new(config, fx.transport.clone()).unwrap();
        let err = run(&mut orchestrator).unwrap_err();

        assert!(matches!(err, SyncError::Network(_)));
        assert!(err.is_recoverable());
        assert_eq!(fx.transport.total_fetches(), 0);
    }

    #[test]
    fn test_reset_only_from_terminal_state() {
        let fx = fixture(&Manifest::empty());
        publish(&fx.transport, "r1", &[("a", b"alpha")]);

        let mut orchestrator = SyncOrchestrator::new(fx.config.clone(), fx.transport.clone()).unwrap();
        orchestrator.poll();
        assert!(matches!(
            orchestrator.reset(),
            Err(SyncError::InvalidState(_))
        ));

        run(&mut orchestrator).unwrap();
        orchestrator.reset().unwrap();
        assert_eq!(orchestrator.state(), SyncState::Idle);
        assert!(orchestrator.outcome().is_none());

        let outcome = run(&mut orchestrator).unwrap();
        assert_eq!(outcome.version.as_deref(), Some("r1"));
        assert_eq!(fx.transport.fetch_count("mem://cdn/AssetBundles/r1/a"), 1);
    }

    #[test]
    fn test_finish_before_terminal_is_invalid_state() {
        let fx = fixture(&Manifest::empty());
        let orchestrator = SyncOrchestrator::new(fx.config.clone(), fx.transport.clone()).unwrap();
        assert!(matches!(
            orchestrator.finish(),
            Err(SyncError::InvalidState(_))
        ));
    }

    /// Size requests wait until `open` is set.
    struct GatedSizes {
        inner: MemoryTransport,
        open: AtomicBool,
    }

    impl Transport for GatedSizes {
        fn fetch(&self, url: &str, progress: &TransferProgress) -> Result<Bytes, TransferError> {
            self.inner.fetch(url, progress)
        }

        fn content_length(&self, url: &str) -> Result<u64, TransferError> {
            while !self.open.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(1));
            }
            self.inner.content_length(url)
        }
    }

    #[test]
    fn test_poll_returns_while_sizes_are_outstanding() {
        let fx = fixture(&Manifest::empty());
        let transport = Arc::new(GatedSizes {
            inner: MemoryTransport::new(),
            open: AtomicBool::new(false),
        });
        publish(&transport.inner, "r1", &[("a", b"alpha"), ("b", b"beta!")]);

        let mut orchestrator = SyncOrchestrator::new(fx.config.clone(), transport.clone()).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while orchestrator.poll() != SyncState::Planning {
            assert!(Instant::now() < deadline, "never reached planning");
            thread::sleep(Duration::from_millis(1));
        }

        for _ in 0..20 {
            assert_eq!(orchestrator.poll(), SyncState::Planning);
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(orchestrator.progress().items_total, 2);
        assert_eq!(orchestrator.progress().total_bytes, 0);

        transport.open.store(true, Ordering::SeqCst);
        run(&mut orchestrator).unwrap();
        assert_eq!(orchestrator.progress().total_bytes, 10);
        assert_eq!(transport.inner.probe_count(), 2);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = SyncConfig::new("").with_max_concurrent_downloads(0);
        assert!(matches!(
            SyncOrchestrator::new(config, Arc::new(MemoryTransport::new())),
            Err(SyncError::Config(_))
        ));
    }
}
