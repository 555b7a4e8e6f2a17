//! Patch cache: downloaded bundle payloads plus the durable hash record.
//!
//! Layout of the cache root:
//!
//! ```text
//! <root>/
//!   .patch                  PatchRecord
//!   .staging/               payloads being written, renamed into place
//!   shared.bundle           one file per bundle, named by bundle name
//!   ui/atlas.bundle         names containing '/' create subdirectories
//! ```
//!
//! Top-level names starting with `.` belong to the cache itself and are
//! never valid bundle names.
//!
//! Only the committing step of one sync session mutates the cache root at a
//! time; concurrent sessions must be serialized by the caller.

mod record;

pub use record::{PatchRecord, RECORD_FILENAME, RECORD_SCHEMA};

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info};

use crate::checksum::payload_hash;
use crate::error::{SyncError, SyncResult};

/// Directory under the cache root holding partially written payloads.
pub const STAGING_DIR: &str = ".staging";

/// Payload files plus their record, rooted at one directory.
#[derive(Debug)]
pub struct PatchCache {
    root: PathBuf,
    record: PatchRecord,
}

impl PatchCache {
    /// Open the cache at `root`, loading its record. The directory need not exist.
    pub fn open(root: impl Into<PathBuf>) -> SyncResult<Self> {
        let root = root.into();
        let record = PatchRecord::load(&root.join(RECORD_FILENAME))?;
        debug!(
            root = %root.display(),
            bundles = record.len(),
            version = record.version(),
            "Opened patch cache"
        );
        Ok(Self { root, record })
    }

    /// Cache root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The loaded record.
    pub fn record(&self) -> &PatchRecord {
        &self.record
    }

    /// Path of the record file.
    pub fn record_path(&self) -> PathBuf {
        self.root.join(RECORD_FILENAME)
    }

    /// Whether the bundle is recorded with exactly this hash.
    pub fn is_cached(&self, bundle: &str, hash: &str) -> bool {
        self.record.is_cached(bundle, hash)
    }

    /// On-disk location for a bundle.
    pub fn bundle_path(&self, bundle: &str) -> SyncResult<PathBuf> {
        bundle_path(&self.root, bundle)
    }

    /// Write a verified payload and persist its hash.
    ///
    /// The payload is written first (to [`STAGING_DIR`], then renamed), then the
    /// record is updated and saved. A crash in between leaves the record
    /// without the entry, so the bundle is simply fetched again next time.
    /// If persisting fails, the in-memory record is rolled back.
    pub fn commit(
        &mut self,
        bundle: &str,
        hash: &str,
        payload: &[u8],
        manifest_version: Option<&str>,
    ) -> SyncResult<PathBuf> {
        let path = self.bundle_path(bundle)?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| SyncError::cache_io(dir, e))?;
        }

        let part = self.staging_path(bundle);
        if let Some(dir) = part.parent() {
            fs::create_dir_all(dir).map_err(|e| SyncError::cache_io(dir, e))?;
        }
        fs::write(&part, payload).map_err(|e| SyncError::cache_io(&part, e))?;
        fs::rename(&part, &path).map_err(|e| SyncError::cache_io(&path, e))?;

        let previous = self.record.clone();
        self.record.set(bundle, hash);
        if let Some(version) = manifest_version {
            self.record.set_manifest_version(version);
        }

        let record_path = self.record_path();
        if let Err(e) = self.record.save(&record_path) {
            self.record = previous;
            return Err(e);
        }

        info!(bundle = %bundle, hash = %hash, "Committed bundle to patch cache");
        Ok(path)
    }

    /// Staging file for `bundle`, unique per bundle name.
    fn staging_path(&self, bundle: &str) -> PathBuf {
        self.root
            .join(STAGING_DIR)
            .join(format!("{}.part", payload_hash(bundle.as_bytes())))
    }
}

/// Resolve a bundle name under `root`, rejecting names that escape it.
pub fn bundle_path(root: &Path, bundle: &str) -> SyncResult<PathBuf> {
    let relative = Path::new(bundle);
    let valid = !bundle.is_empty()
        && !bundle.starts_with('.')
        && relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));

    if !valid {
        return Err(SyncError::cache_io(
            root.join(bundle),
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid bundle name: {:?}", bundle),
            ),
        ));
    }
    Ok(root.join(relative))
}

/// Result of clearing a cache directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClearResult {
    /// Files removed.
    pub files_deleted: usize,
    /// Bytes freed.
    pub bytes_freed: u64,
}

/// Delete the cache root recursively, including the record.
///
/// Clearing a cache that does not exist succeeds with an empty result.
pub fn clear_patch_cache(root: &Path) -> io::Result<ClearResult> {
    if !root.exists() {
        return Ok(ClearResult::default());
    }

    let (files_deleted, bytes_freed) = cache_stats(root)?;
    fs::remove_dir_all(root)?;
    info!(
        root = %root.display(),
        files = files_deleted,
        bytes = bytes_freed,
        "Cleared patch cache"
    );

    Ok(ClearResult {
        files_deleted,
        bytes_freed,
    })
}

/// Count files and bytes under the cache root.
pub fn cache_stats(root: &Path) -> io::Result<(usize, u64)> {
    if !root.exists() {
        return Ok((0, 0));
    }

    let mut files = 0usize;
    let mut bytes = 0u64;
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if metadata.is_dir() {
                stack.push(entry.path());
            } else {
                files += 1;
                bytes += metadata.len();
            }
        }
    }

    Ok((files, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_commit_writes_payload_and_record() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("cache");
        let mut cache = PatchCache::open(&root).unwrap();

        let path = cache
            .commit("ui/atlas.bundle", "h2", b"atlas", Some("r2"))
            .unwrap();

        assert_eq!(path, root.join("ui").join("atlas.bundle"));
        assert_eq!(fs::read(&path).unwrap(), b"atlas");
        assert!(cache.is_cached("ui/atlas.bundle", "h2"));

        let reopened = PatchCache::open(&root).unwrap();
        assert_eq!(reopened.record().hash("ui/atlas.bundle"), Some("h2"));
        assert_eq!(reopened.record().manifest_version(), Some("r2"));
    }

    #[test]
    fn test_commit_overwrites_previous_payload() {
        let temp = TempDir::new().unwrap();
        let mut cache = PatchCache::open(temp.path()).unwrap();
        cache.commit("a", "h1", b"one", None).unwrap();
        let path = cache.commit("a", "h2", b"two", None).unwrap();

        assert_eq!(fs::read(path).unwrap(), b"two");
        assert_eq!(cache.record().hash("a"), Some("h2"));
        assert_eq!(cache.record().version(), 2);
    }

    #[test]
    fn test_bundle_path_rejects_escapes() {
        let root = Path::new("/cache");
        assert!(bundle_path(root, "../etc/passwd").is_err());
        assert!(bundle_path(root, "/abs").is_err());
        assert!(bundle_path(root, "").is_err());
        assert!(bundle_path(root, RECORD_FILENAME).is_err());
        assert!(bundle_path(root, ".patch.tmp").is_err());
        assert!(bundle_path(root, ".staging/x.part").is_err());
        assert!(bundle_path(root, "ok/nested.bundle").is_ok());
        assert!(bundle_path(root, "ok/.nested").is_ok());
    }

    #[test]
    fn test_part_suffixed_names_do_not_collide() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("cache");
        let mut cache = PatchCache::open(&root).unwrap();

        cache.commit("a.part", "h1", b"first", None).unwrap();
        cache.commit("a", "h2", b"second", None).unwrap();

        assert_eq!(fs::read(root.join("a.part")).unwrap(), b"first");
        assert_eq!(fs::read(root.join("a")).unwrap(), b"second");

        let reopened = PatchCache::open(&root).unwrap();
        assert_eq!(reopened.record().hash("a.part"), Some("h1"));
        assert_eq!(reopened.record().hash("a"), Some("h2"));
    }

    #[test]
    fn test_commit_leaves_staging_empty() {
        let temp = TempDir::new().unwrap();
        let mut cache = PatchCache::open(temp.path()).unwrap();
        cache.commit("ui/atlas.bundle", "h1", b"atlas", None).unwrap();

        let staged = fs::read_dir(temp.path().join(STAGING_DIR)).unwrap().count();
        assert_eq!(staged, 0);
    }

    #[test]
    fn test_clear_and_stats() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("cache");
        let mut cache = PatchCache::open(&root).unwrap();
        cache.commit("a", "h1", b"12345", None).unwrap();
        cache.commit("dir/b", "h2", b"123", None).unwrap();

        let (files, bytes) = cache_stats(&root).unwrap();
        assert_eq!(files, 3);
        assert!(bytes >= 8);

        let result = clear_patch_cache(&root).unwrap();
        assert_eq!(result.files_deleted, 3);
        assert!(!root.exists());
        assert!(PatchCache::open(&root).unwrap().record().is_empty());
    }

    #[test]
    fn test_clear_missing_root() {
        let temp = TempDir::new().unwrap();
        let result = clear_patch_cache(&temp.path().join("nope")).unwrap();
        assert_eq!(result, ClearResult::default());
    }
}
