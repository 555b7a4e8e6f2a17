//! End-to-end sync sessions against an in-memory patch server.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bundlepatch::cache::{PatchRecord, RECORD_FILENAME};
use bundlepatch::checksum::payload_hash;
use bundlepatch::config::SyncConfig;
use bundlepatch::error::{ItemError, SyncError};
use bundlepatch::manifest::{Manifest, ManifestBuilder};
use bundlepatch::planner::{ChangeKind, DeltaPlanner};
use bundlepatch::platform::Platform;
use bundlepatch::sync::{SyncOrchestrator, SyncState};
use bundlepatch::transfer::MemoryTransport;
use tempfile::TempDir;

const BASE: &str = "mem://patch.example";
const VERSION: &str = "240601_120000_Android";

fn bundle_url(name: &str) -> String {
    format!("{}/AssetBundles/{}/{}", BASE, VERSION, name)
}

fn release_url() -> String {
    format!("{}/AssetBundles/{}", BASE, VERSION)
}

/// Serve a release made of `bundles` and return its manifest.
fn serve(transport: &MemoryTransport, bundles: &[(&str, &[u8])]) -> Manifest {
    transport.insert(format!("{}/patch?platform=Android", BASE), format!("{}\n", VERSION));

    let mut builder = ManifestBuilder::new(VERSION);
    for (name, body) in bundles {
        builder = builder.bundle(*name, payload_hash(body));
        transport.insert(bundle_url(name), body.to_vec());
    }
    let manifest = builder.build().unwrap();
    transport.insert(bundle_url(VERSION), manifest.to_bytes());
    manifest
}

fn config(root: &Path, local: &Manifest) -> SyncConfig {
    let baseline = root.join("baseline");
    fs::create_dir_all(&baseline).unwrap();
    fs::write(baseline.join("Android"), local.to_bytes()).unwrap();

    SyncConfig::new(BASE)
        .with_platform(Platform::Android)
        .with_baseline_dir(baseline)
        .with_cache_dir(root.join("cache"))
        .with_max_concurrent_downloads(2)
}

fn local_with_a() -> Manifest {
    ManifestBuilder::new("baseline")
        .bundle("A", payload_hash(b"A v1"))
        .build()
        .unwrap()
}

#[test]
fn test_updated_and_new_bundles_are_committed_and_not_replanned() {
    let temp = TempDir::new().unwrap();
    let transport = Arc::new(MemoryTransport::new());
    let local = local_with_a();
    let remote = serve(&transport, &[("A", b"A v2"), ("B", b"B v1")]);
    let config = config(temp.path(), &local);

    let mut session = SyncOrchestrator::new(config.clone(), transport.clone()).unwrap();
    let outcome = session.run_to_completion(Duration::from_millis(1)).unwrap();

    let kinds: Vec<_> = session
        .items()
        .iter()
        .map(|i| (i.bundle.as_str(), i.kind))
        .collect();
    assert_eq!(kinds, vec![("A", ChangeKind::Updated), ("B", ChangeKind::New)]);
    assert!(outcome.external.contains("A"));
    assert!(outcome.external.contains("B"));
    assert_eq!(outcome.version.as_deref(), Some(VERSION));

    let record = PatchRecord::load(&config.cache_dir.join(RECORD_FILENAME)).unwrap();
    assert_eq!(record.hash("A"), remote.hash("A"));
    assert_eq!(record.hash("B"), remote.hash("B"));
    assert_eq!(record.manifest_version(), Some(VERSION));
    assert_eq!(fs::read(config.cache_dir.join("B")).unwrap(), b"B v1");

    let replan = DeltaPlanner::new(transport.as_ref()).plan(&local, &remote, &record, &release_url());
    assert!(replan.is_empty());
    assert_eq!(replan.external.len(), 2);

    let mut second = SyncOrchestrator::new(config, transport.clone()).unwrap();
    second.run_to_completion(Duration::from_millis(1)).unwrap();
    assert_eq!(transport.fetch_count(&bundle_url("A")), 1);
    assert_eq!(transport.fetch_count(&bundle_url("B")), 1);
}

#[test]
fn test_failed_download_does_not_abort_siblings() {
    let temp = TempDir::new().unwrap();
    let transport = Arc::new(MemoryTransport::new());
    let remote = serve(&transport, &[("A", b"A v2"), ("B", b"B v1")]);
    transport.fail(bundle_url("B"));
    let config = config(temp.path(), &local_with_a());

    let mut session = SyncOrchestrator::new(config.clone(), transport.clone()).unwrap();
    let err = session.run_to_completion(Duration::from_millis(1)).unwrap_err();

    assert!(matches!(err, SyncError::Network(_)));
    assert_eq!(session.state(), SyncState::Failed);
    assert!(session.outcome().is_none());

    let failed: Vec<_> = session.failed_items().map(|i| i.bundle.as_str()).collect();
    assert_eq!(failed, vec!["B"]);

    let progress = session.progress();
    assert_eq!(progress.items_total, 2);
    assert_eq!(progress.items_done, 2);
    assert_eq!(progress.items_failed, 1);
    assert_eq!(progress.items_succeeded(), 1);

    let record = PatchRecord::load(&config.cache_dir.join(RECORD_FILENAME)).unwrap();
    assert_eq!(record.hash("A"), remote.hash("A"));
    assert_eq!(record.hash("B"), None);

    // A retry only fetches what is still missing.
    transport.heal(&bundle_url("B"));
    let mut retry = SyncOrchestrator::new(config, transport.clone()).unwrap();
    retry.run_to_completion(Duration::from_millis(1)).unwrap();
    assert_eq!(transport.fetch_count(&bundle_url("A")), 1);
    assert_eq!(transport.fetch_count(&bundle_url("B")), 2);
}

#[test]
fn test_corrupted_payload_is_not_committed() {
    let temp = TempDir::new().unwrap();
    let transport = Arc::new(MemoryTransport::new());
    serve(&transport, &[("A", b"A v2")]);
    transport.insert(bundle_url("A"), &b"tampered"[..]);
    let config = config(temp.path(), &local_with_a());

    let mut session = SyncOrchestrator::new(config.clone(), transport).unwrap();
    let err = session.run_to_completion(Duration::from_millis(1)).unwrap_err();

    assert!(matches!(err, SyncError::Integrity { ref bundle, .. } if bundle == "A"));
    let item = &session.items()[0];
    assert!(matches!(item.error, Some(ItemError::Integrity { .. })));
    assert!(!config.cache_dir.join("A").exists());
    assert!(PatchRecord::load(&config.cache_dir.join(RECORD_FILENAME))
        .unwrap()
        .is_empty());
}

#[test]
fn test_corrupt_record_causes_refetch() {
    let temp = TempDir::new().unwrap();
    let transport = Arc::new(MemoryTransport::new());
    serve(&transport, &[("A", b"A v2")]);
    let config = config(temp.path(), &local_with_a());

    SyncOrchestrator::new(config.clone(), transport.clone())
        .unwrap()
        .run_to_completion(Duration::from_millis(1))
        .unwrap();
    fs::write(config.cache_dir.join(RECORD_FILENAME), b"{ not json").unwrap();

    SyncOrchestrator::new(config, transport.clone())
        .unwrap()
        .run_to_completion(Duration::from_millis(1))
        .unwrap();
    assert_eq!(transport.fetch_count(&bundle_url("A")), 2);
}

#[test]
fn test_nested_bundle_names_create_subdirectories() {
    let temp = TempDir::new().unwrap();
    let transport = Arc::new(MemoryTransport::new());
    serve(&transport, &[("ui/atlas.bundle", b"atlas")]);
    let config = config(temp.path(), &Manifest::empty());

    SyncOrchestrator::new(config.clone(), transport)
        .unwrap()
        .run_to_completion(Duration::from_millis(1))
        .unwrap();

    assert_eq!(
        fs::read(config.cache_dir.join("ui").join("atlas.bundle")).unwrap(),
        b"atlas"
    );
}
