//! Incremental manifest construction.

use super::{BundleEntry, Manifest, ManifestError};

/// Builder for [`Manifest`].
///
/// # Example
///
/// ```
/// use bundlepatch::manifest::ManifestBuilder;
///
/// let manifest = ManifestBuilder::new("r1_Android")
///     .bundle("shared.bundle", "h-shared")
///     .bundle_with_deps("ui.bundle", "h-ui", ["shared.bundle"])
///     .build()
///     .unwrap();
///
/// assert_eq!(manifest.dependencies_of("ui.bundle"), ["shared.bundle"]);
/// ```
#[derive(Debug, Default)]
pub struct ManifestBuilder {
    name: String,
    entries: Vec<BundleEntry>,
}

impl ManifestBuilder {
    /// Start a manifest with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    /// Add a dependency-free bundle.
    pub fn bundle(mut self, name: impl Into<String>, hash: impl Into<String>) -> Self {
        self.entries.push(BundleEntry::new(name, hash));
        self
    }

    /// Add a bundle with direct dependencies.
    pub fn bundle_with_deps<I, S>(
        mut self,
        name: impl Into<String>,
        hash: impl Into<String>,
        dependencies: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut entry = BundleEntry::new(name, hash);
        entry.dependencies = dependencies.into_iter().map(Into::into).collect();
        self.entries.push(entry);
        self
    }

    /// Add a variant bundle named `<base>.<variant>`.
    pub fn variant(mut self, base: &str, variant: &str, hash: impl Into<String>) -> Self {
        let mut entry = BundleEntry::new(format!("{}.{}", base, variant), hash);
        entry.variant = Some(variant.to_string());
        self.entries.push(entry);
        self
    }

    /// Add a fully specified entry.
    pub fn entry(mut self, entry: BundleEntry) -> Self {
        self.entries.push(entry);
        self
    }

    /// Push a fully specified entry without consuming the builder.
    pub fn push(&mut self, entry: BundleEntry) {
        self.entries.push(entry);
    }

    /// Validate and build the manifest.
    pub fn build(self) -> Result<Manifest, ManifestError> {
        Manifest::from_entries(self.name, self.entries)
    }
}
