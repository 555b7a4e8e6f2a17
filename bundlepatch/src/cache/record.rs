//! Durable record of synced bundle hashes.
//!
//! Persists a JSON document at `<cache root>/.patch`:
//!
//! ```text
//! {
//!   "schema": 1,
//!   "version": 12,
//!   "checksum": 3735928559,
//!   "manifest_version": "r42_Android",
//!   "synced_at": "2024-06-01T10:00:00Z",
//!   "bundles": { "ui/atlas.bundle": "9f86d0..." }
//! }
//! ```
//!
//! `version` increases on every save. `checksum` covers the bundle mapping;
//! a record whose checksum or schema does not match is discarded, which only
//! costs a re-download. Writes use a `.tmp` file and a rename.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::checksum::digest_u32;
use crate::error::{SyncError, SyncResult};

/// File name of the record inside the cache root.
pub const RECORD_FILENAME: &str = ".patch";

/// Current record schema.
pub const RECORD_SCHEMA: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct RecordDocument {
    schema: u32,
    version: u32,
    checksum: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    manifest_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    synced_at: Option<DateTime<Utc>>,
    bundles: BTreeMap<String, String>,
}

/// Bundle name → last confirmed content hash.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchRecord {
    version: u32,
    manifest_version: Option<String>,
    synced_at: Option<DateTime<Utc>>,
    bundles: BTreeMap<String, String>,
}

impl PatchRecord {
    /// An empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the record at `path`.
    ///
    /// Returns an empty record if the file does not exist or fails validation.
    pub fn load(path: &Path) -> SyncResult<Self> {
        let contents = match fs::read(path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "No patch record, starting empty");
                return Ok(Self::new());
            }
            Err(e) => return Err(SyncError::cache_io(path, e)),
        };

        let doc: RecordDocument = match serde_json::from_slice(&contents) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Unreadable patch record discarded");
                return Ok(Self::new());
            }
        };

        if doc.schema != RECORD_SCHEMA {
            warn!(
                path = %path.display(),
                schema = doc.schema,
                "Patch record has unknown schema, discarded"
            );
            return Ok(Self::new());
        }

        let checksum = mapping_checksum(&doc.bundles);
        if checksum != doc.checksum {
            warn!(
                path = %path.display(),
                expected = doc.checksum,
                actual = checksum,
                "Patch record checksum mismatch, discarded"
            );
            return Ok(Self::new());
        }

        Ok(Self {
            version: doc.version,
            manifest_version: doc.manifest_version,
            synced_at: doc.synced_at,
            bundles: doc.bundles,
        })
    }

    /// Persist the record to `path`, bumping its version.
    pub fn save(&mut self, path: &Path) -> SyncResult<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| SyncError::cache_io(dir, e))?;
        }

        let next_version = self.version.wrapping_add(1);
        let doc = RecordDocument {
            schema: RECORD_SCHEMA,
            version: next_version,
            checksum: self.checksum(),
            manifest_version: self.manifest_version.clone(),
            synced_at: self.synced_at,
            bundles: self.bundles.clone(),
        };

        let json = serde_json::to_vec_pretty(&doc).map_err(|e| {
            SyncError::cache_io(path, std::io::Error::new(ErrorKind::InvalidData, e))
        })?;

        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &json).map_err(|e| SyncError::cache_io(&tmp, e))?;
        fs::rename(&tmp, path).map_err(|e| SyncError::cache_io(path, e))?;

        self.version = next_version;
        Ok(())
    }

    /// Record a confirmed hash for a bundle.
    pub fn set(&mut self, bundle: impl Into<String>, hash: impl Into<String>) {
        self.bundles.insert(bundle.into(), hash.into());
        self.synced_at = Some(Utc::now());
    }

    /// Forget a bundle.
    pub fn remove(&mut self, bundle: &str) -> Option<String> {
        self.bundles.remove(bundle)
    }

    /// Recorded hash for a bundle.
    pub fn hash(&self, bundle: &str) -> Option<&str> {
        self.bundles.get(bundle).map(String::as_str)
    }

    /// Whether the bundle is recorded with exactly this hash.
    pub fn is_cached(&self, bundle: &str, hash: &str) -> bool {
        self.hash(bundle).is_some_and(|h| h == hash)
    }

    /// Number of recorded bundles.
    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    /// Whether nothing is recorded.
    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    /// Save counter; increases on every persist.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Release the last commit came from.
    pub fn manifest_version(&self) -> Option<&str> {
        self.manifest_version.as_deref()
    }

    /// Set the release the following commits come from.
    pub fn set_manifest_version(&mut self, version: impl Into<String>) {
        self.manifest_version = Some(version.into());
    }

    /// Time of the last recorded commit.
    pub fn synced_at(&self) -> Option<DateTime<Utc>> {
        self.synced_at
    }

    /// Checksum over the current mapping.
    pub fn checksum(&self) -> u32 {
        mapping_checksum(&self.bundles)
    }

    /// Iterate over recorded (bundle, hash) pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.bundles.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

fn mapping_checksum(bundles: &BTreeMap<String, String>) -> u32 {
    let mut canonical = Vec::new();
    for (name, hash) in bundles {
        canonical.extend_from_slice(name.as_bytes());
        canonical.push(0);
        canonical.extend_from_slice(hash.as_bytes());
        canonical.push(b'\n');
    }
    digest_u32(&canonical)
}
