//! Bundle manifests.
//!
//! A [`Manifest`] is an immutable catalog of bundles: each bundle name maps to
//! a content hash, an ordered dependency list, and an optional variant tag.
//! Two manifests exist during a sync session: the *local* baseline shipped
//! with the application and the *remote* manifest of the latest release.
//!
//! # Format
//!
//! Manifests are stored as JSON:
//!
//! ```text
//! {
//!   "format": 1,
//!   "name": "20240601_Android",
//!   "bundles": [
//!     { "name": "ui/atlas.bundle", "hash": "9f86d0...", "dependencies": ["shared.bundle"] },
//!     { "name": "voice.en", "hash": "2c26b4...", "variant": "en" }
//!   ]
//! }
//! ```
//!
//! Enumeration order is the order of the `bundles` array and is preserved,
//! which keeps download plans deterministic.

mod builder;
mod store;

pub use builder::ManifestBuilder;
pub use store::ManifestStore;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Current manifest document format.
pub const MANIFEST_FORMAT: u32 = 1;

/// Errors produced while decoding or validating a manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The blob is not a valid manifest document.
    #[error("malformed manifest document: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The document declares a format this build does not understand.
    #[error("unsupported manifest format {found} (expected {MANIFEST_FORMAT})")]
    UnsupportedFormat { found: u32 },

    /// The same bundle name appears twice.
    #[error("duplicate bundle entry: {0}")]
    DuplicateBundle(String),

    /// A bundle has no content hash.
    #[error("bundle {0} has an empty hash")]
    EmptyHash(String),

    /// A dependency names a bundle that is not in the manifest.
    #[error("bundle {bundle} depends on unknown bundle {dependency}")]
    UnknownDependency { bundle: String, dependency: String },

    /// A variant tag does not match the bundle name suffix.
    #[error("bundle {bundle} declares variant {variant} but is not named <base>.{variant}")]
    VariantMismatch { bundle: String, variant: String },
}

/// A single bundle entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleEntry {
    /// Bundle name; may contain `/` separators.
    pub name: String,

    /// Content hash (lowercase hex SHA-256 of the payload).
    pub hash: String,

    /// Variant tag, e.g. a locale or quality tier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,

    /// Direct dependencies, in load order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

impl BundleEntry {
    /// Create an entry without variant or dependencies.
    pub fn new(name: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hash: hash.into(),
            variant: None,
            dependencies: Vec::new(),
        }
    }

    /// Base name of a variant bundle (`voice.en` → `voice`).
    ///
    /// Returns `None` for bundles without a variant tag.
    pub fn base_name(&self) -> Option<&str> {
        let variant = self.variant.as_deref()?;
        self.name
            .strip_suffix(variant)
            .and_then(|rest| rest.strip_suffix('.'))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ManifestDocument {
    format: u32,
    #[serde(default)]
    name: String,
    bundles: Vec<BundleEntry>,
}

/// Immutable bundle catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    name: String,
    entries: Vec<BundleEntry>,
    index: HashMap<String, usize>,
}

impl Manifest {
    /// Decode and validate a manifest blob.
    pub fn load(bytes: &[u8]) -> Result<Self, ManifestError> {
        let doc: ManifestDocument = serde_json::from_slice(bytes)?;
        if doc.format != MANIFEST_FORMAT {
            return Err(ManifestError::UnsupportedFormat { found: doc.format });
        }
        Self::from_entries(doc.name, doc.bundles)
    }

    /// Build a manifest from entries, validating names, hashes and dependencies.
    pub fn from_entries(
        name: impl Into<String>,
        entries: Vec<BundleEntry>,
    ) -> Result<Self, ManifestError> {
        let mut index = HashMap::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            if entry.hash.trim().is_empty() {
                return Err(ManifestError::EmptyHash(entry.name.clone()));
            }
            if let Some(variant) = &entry.variant {
                if entry.base_name().map_or(true, str::is_empty) {
                    return Err(ManifestError::VariantMismatch {
                        bundle: entry.name.clone(),
                        variant: variant.clone(),
                    });
                }
            }
            if index.insert(entry.name.clone(), i).is_some() {
                return Err(ManifestError::DuplicateBundle(entry.name.clone()));
            }
        }

        let manifest = Self {
            name: name.into(),
            entries,
            index,
        };

        for entry in &manifest.entries {
            for dep in &entry.dependencies {
                if !manifest.contains(dep) && !manifest.has_variants_for(dep) {
                    return Err(ManifestError::UnknownDependency {
                        bundle: entry.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        Ok(manifest)
    }

    /// An empty manifest.
    pub fn empty() -> Self {
        Self {
            name: String::new(),
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Encode as a manifest blob.
    pub fn to_bytes(&self) -> Vec<u8> {
        let doc = ManifestDocument {
            format: MANIFEST_FORMAT,
            name: self.name.clone(),
            bundles: self.entries.clone(),
        };
        // Serializing plain strings and vectors cannot fail.
        serde_json::to_vec_pretty(&doc).unwrap_or_default()
    }

    /// Manifest name (usually the release version it was built for).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All bundle names, in manifest order.
    pub fn all_bundles(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// All entries, in manifest order.
    pub fn entries(&self) -> &[BundleEntry] {
        &self.entries
    }

    /// Look up an entry by name.
    pub fn entry(&self, name: &str) -> Option<&BundleEntry> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    /// Content hash of a bundle, if present.
    pub fn hash(&self, name: &str) -> Option<&str> {
        self.entry(name).map(|e| e.hash.as_str())
    }

    /// Direct dependencies of a bundle (empty if unknown or dependency-free).
    pub fn dependencies_of(&self, name: &str) -> &[String] {
        self.entry(name)
            .map(|e| e.dependencies.as_slice())
            .unwrap_or(&[])
    }

    /// Bundles that carry a variant tag, in manifest order.
    pub fn bundles_with_variants(&self) -> impl Iterator<Item = &BundleEntry> {
        self.entries.iter().filter(|e| e.variant.is_some())
    }

    /// Whether any variant bundle has the given base name.
    pub fn has_variants_for(&self, base: &str) -> bool {
        self.bundles_with_variants()
            .any(|e| e.base_name() == Some(base))
    }

    /// Whether the manifest lists the bundle.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Number of bundles.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the manifest lists no bundles.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
