//! Reference-counted registry of loaded bundles.
//!
//! Acquiring a bundle first acquires its dependencies (depth-first, in
//! manifest order), so a resident bundle always has every dependency
//! resident. Each acquisition holds one reference on the bundle and one on
//! each direct dependency; releasing the last reference unloads the bundle
//! and releases those dependency references in turn.
//!
//! The table is mutated through `&mut self` only and is meant to be driven
//! from a single update loop.

mod loader;
mod variant;

pub use loader::{BundleLoader, BundleLocation, FileBundleLoader};
pub use variant::resolve_variant;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache;
use crate::config::SyncConfig;
use crate::manifest::Manifest;
use crate::planner::ExternalBundleSet;
use crate::sync::SyncOutcome;

/// Result type for lifecycle operations.
pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Errors from acquiring or releasing bundles.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    /// Released a bundle that holds no references.
    #[error("bundle {0} is not loaded")]
    NotLoaded(String),

    /// The manifest's dependency graph loops back on itself.
    #[error("dependency cycle: {}", .chain.join(" -> "))]
    DependencyCycle { chain: Vec<String> },

    /// The manifest does not list the bundle.
    #[error("unknown bundle: {0}")]
    UnknownBundle(String),

    /// The loader could not produce content.
    #[error("failed to load {bundle}: {reason}")]
    Load { bundle: String, reason: String },
}

/// A resident bundle.
#[derive(Debug)]
pub struct LoadedBundle<C> {
    name: String,
    content: C,
    ref_count: usize,
    dependencies: Vec<String>,
    location: BundleLocation,
}

impl<C> LoadedBundle<C> {
    /// Resolved bundle name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn content(&self) -> &C {
        &self.content
    }

    pub fn ref_count(&self) -> usize {
        self.ref_count
    }

    /// Direct dependencies, variant-resolved, in load order.
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn location(&self) -> &BundleLocation {
        &self.location
    }
}

/// Loads, shares and unloads bundles.
pub struct BundleLifecycleManager<L: BundleLoader> {
    loader: L,
    manifest: Manifest,
    external: ExternalBundleSet,
    baseline_dir: PathBuf,
    patch_dir: PathBuf,
    preferred_variants: Vec<String>,
    loaded: HashMap<String, LoadedBundle<L::Content>>,
}

impl<L: BundleLoader> std::fmt::Debug for BundleLifecycleManager<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleLifecycleManager")
            .field("baseline_dir", &self.baseline_dir)
            .field("patch_dir", &self.patch_dir)
            .field("resident", &self.loaded.len())
            .finish_non_exhaustive()
    }
}

impl<L: BundleLoader> BundleLifecycleManager<L> {
    /// Create a manager loading according to a sync outcome.
    pub fn new(
        loader: L,
        outcome: SyncOutcome,
        baseline_dir: impl Into<PathBuf>,
        patch_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            loader,
            manifest: outcome.manifest,
            external: outcome.external,
            baseline_dir: baseline_dir.into(),
            patch_dir: patch_dir.into(),
            preferred_variants: Vec::new(),
            loaded: HashMap::new(),
        }
    }

    /// Create a manager using the directories and variants of `config`.
    pub fn from_config(loader: L, outcome: SyncOutcome, config: &SyncConfig) -> Self {
        Self::new(loader, outcome, &config.baseline_dir, &config.cache_dir)
            .with_preferred_variants(config.preferred_variants.clone())
    }

    /// Set accepted variants, most preferred first.
    pub fn with_preferred_variants(mut self, variants: Vec<String>) -> Self {
        self.preferred_variants = variants;
        self
    }

    /// Manifest bundles are resolved against.
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Loader in use.
    pub fn loader(&self) -> &L {
        &self.loader
    }

    /// Name that a request for `name` loads.
    pub fn resolve_variant(&self, name: &str) -> String {
        resolve_variant(&self.manifest, name, &self.preferred_variants)
    }

    /// Where `name` would be loaded from.
    pub fn location_of(&self, name: &str) -> LifecycleResult<BundleLocation> {
        let (root, patched) = if self.external.contains(name) {
            (&self.patch_dir, true)
        } else {
            (&self.baseline_dir, false)
        };
        let path = cache::bundle_path(root, name).map_err(|e| LifecycleError::Load {
            bundle: name.to_string(),
            reason: e.to_string(),
        })?;
        Ok(if patched {
            BundleLocation::PatchCache(path)
        } else {
            BundleLocation::Baseline(path)
        })
    }

    /// Acquire a bundle and its dependency closure.
    ///
    /// On failure every reference taken by this call is given back, so the
    /// table is unchanged.
    pub fn acquire(&mut self, name: &str) -> LifecycleResult<&LoadedBundle<L::Content>> {
        let resolved = self.resolve_variant(name);
        let mut stack = Vec::new();
        let mut taken = Vec::new();

        if let Err(e) = self.acquire_resolved(&resolved, &mut stack, &mut taken) {
            warn!(bundle = %resolved, error = %e, "Acquire failed, rolling back");
            for bundle in taken.iter().rev() {
                self.give_back(bundle);
            }
            return Err(e);
        }

        self.loaded
            .get(&resolved)
            .ok_or(LifecycleError::NotLoaded(resolved))
    }

    fn acquire_resolved(
        &mut self,
        name: &str,
        stack: &mut Vec<String>,
        taken: &mut Vec<String>,
    ) -> LifecycleResult<()> {
        if stack.iter().any(|s| s == name) {
            let mut chain = stack.clone();
            chain.push(name.to_string());
            return Err(LifecycleError::DependencyCycle { chain });
        }

        if let Some(bundle) = self.loaded.get_mut(name) {
            bundle.ref_count += 1;
            taken.push(name.to_string());
            debug!(bundle = %name, refs = bundle.ref_count, "Bundle reference added");
            return Ok(());
        }

        if !self.manifest.contains(name) {
            return Err(LifecycleError::UnknownBundle(name.to_string()));
        }

        stack.push(name.to_string());
        let dependencies: Vec<String> = self
            .manifest
            .dependencies_of(name)
            .iter()
            .map(|dep| self.resolve_variant(dep))
            .collect();

        for dep in &dependencies {
            self.acquire_resolved(dep, stack, taken)?;
        }

        let location = self.location_of(name)?;
        let content = self.loader.load(name, &location)?;
        stack.pop();

        info!(
            bundle = %name,
            patched = location.is_patched(),
            dependencies = dependencies.len(),
            "Bundle loaded"
        );
        self.loaded.insert(
            name.to_string(),
            LoadedBundle {
                name: name.to_string(),
                content,
                ref_count: 1,
                dependencies,
                location,
            },
        );
        taken.push(name.to_string());
        Ok(())
    }

    /// Undo one reference taken during a failed acquire, without cascading.
    fn give_back(&mut self, name: &str) {
        let Some(bundle) = self.loaded.get_mut(name) else {
            return;
        };
        bundle.ref_count -= 1;
        if bundle.ref_count == 0 {
            if let Some(bundle) = self.loaded.remove(name) {
                self.loader.unload(name, bundle.content);
            }
        }
    }

    /// Release one reference to a bundle.
    ///
    /// At zero references the bundle is unloaded and its dependencies are
    /// released. Releasing a bundle that is not resident is an error.
    pub fn release(&mut self, name: &str) -> LifecycleResult<()> {
        let resolved = self.resolve_variant(name);
        self.release_resolved(&resolved)
    }

    fn release_resolved(&mut self, name: &str) -> LifecycleResult<()> {
        let Some(bundle) = self.loaded.get_mut(name) else {
            return Err(LifecycleError::NotLoaded(name.to_string()));
        };

        bundle.ref_count -= 1;
        if bundle.ref_count > 0 {
            debug!(bundle = %name, refs = bundle.ref_count, "Bundle reference released");
            return Ok(());
        }

        let Some(bundle) = self.loaded.remove(name) else {
            return Err(LifecycleError::NotLoaded(name.to_string()));
        };
        self.loader.unload(name, bundle.content);
        info!(bundle = %name, "Bundle unloaded");

        for dep in &bundle.dependencies {
            self.release_resolved(dep)?;
        }
        Ok(())
    }

    /// The bundle, if it and every transitive dependency are resident.
    pub fn get_if_fully_resolved(&self, name: &str) -> Option<&LoadedBundle<L::Content>> {
        let resolved = self.resolve_variant(name);
        let bundle = self.loaded.get(&resolved)?;

        let mut seen = HashSet::new();
        let mut queue: Vec<&str> = vec![resolved.as_str()];
        while let Some(current) = queue.pop() {
            if !seen.insert(current) {
                continue;
            }
            let entry = self.loaded.get(current)?;
            queue.extend(entry.dependencies.iter().map(String::as_str));
        }
        Some(bundle)
    }

    /// Unload everything regardless of reference counts.
    ///
    /// Returns the number of bundles unloaded.
    pub fn release_all(&mut self) -> usize {
        let count = self.loaded.len();
        for (name, bundle) in self.loaded.drain() {
            self.loader.unload(&name, bundle.content);
        }
        if count > 0 {
            info!(bundles = count, "Unloaded all bundles");
        }
        count
    }

    /// Current reference count, 0 when not resident.
    pub fn reference_count(&self, name: &str) -> usize {
        self.loaded
            .get(&self.resolve_variant(name))
            .map_or(0, |b| b.ref_count)
    }

    pub fn is_resident(&self, name: &str) -> bool {
        self.loaded.contains_key(&self.resolve_variant(name))
    }

    pub fn resident_count(&self) -> usize {
        self.loaded.len()
    }

    /// Names of resident bundles, in unspecified order.
    pub fn resident(&self) -> impl Iterator<Item = &str> {
        self.loaded.keys().map(String::as_str)
    }

    /// Baseline bundle directory.
    pub fn baseline_dir(&self) -> &Path {
        &self.baseline_dir
    }

    /// Patch cache directory.
    pub fn patch_dir(&self) -> &Path {
        &self.patch_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestBuilder;
    use std::collections::HashSet;

    /// Loader that records calls and can be told to fail.
    #[derive(Default)]
    struct RecordingLoader {
        loads: Vec<String>,
        unloads: Vec<String>,
        broken: HashSet<String>,
    }

    impl BundleLoader for RecordingLoader {
        type Content = String;

        fn load(&mut self, bundle: &str, location: &BundleLocation) -> LifecycleResult<String> {
            if self.broken.contains(bundle) {
                return Err(LifecycleError::Load {
                    bundle: bundle.to_string(),
                    reason: "broken".to_string(),
                });
            }
            self.loads.push(bundle.to_string());
            Ok(location.path().display().to_string())
        }

        fn unload(&mut self, bundle: &str, _content: String) {
            self.unloads.push(bundle.to_string());
        }
    }

    fn manager(manifest: Manifest, external: &[&str]) -> BundleLifecycleManager<RecordingLoader> {
        let outcome = SyncOutcome {
            version: Some("r2".to_string()),
            manifest,
            external: external.iter().copied().collect(),
        };
        BundleLifecycleManager::new(RecordingLoader::default(), outcome, "/base", "/patch")
    }

    fn tree() -> Manifest {
        // X -> [Y, Z], Y -> [W]
        ManifestBuilder::new("m")
            .bundle("W", "h")
            .bundle_with_deps("Y", "h", ["W"])
            .bundle("Z", "h")
            .bundle_with_deps("X", "h", ["Y", "Z"])
            .build()
            .unwrap()
    }

    #[test]
    fn test_reference_counting() {
        let mut mgr = manager(tree(), &[]);
        mgr.acquire("X").unwrap();
        mgr.acquire("X").unwrap();
        mgr.release("X").unwrap();

        assert!(mgr.is_resident("X"));
        assert_eq!(mgr.reference_count("X"), 1);

        mgr.release("X").unwrap();
        assert!(!mgr.is_resident("X"));
        assert_eq!(mgr.resident_count(), 0);
        assert_eq!(mgr.loader().unloads.len(), 4);
    }

    #[test]
    fn test_dependency_closure_loaded_first() {
        let mut mgr = manager(tree(), &[]);
        let bundle = mgr.acquire("X").unwrap();
        assert_eq!(bundle.dependencies(), ["Y", "Z"]);

        for name in ["W", "Y", "Z", "X"] {
            assert!(mgr.is_resident(name), "{} not resident", name);
        }
        assert_eq!(mgr.loader().loads, vec!["W", "Y", "Z", "X"]);
        assert!(mgr.get_if_fully_resolved("X").is_some());
    }

    #[test]
    fn test_shared_dependency_survives_one_parent() {
        let manifest = ManifestBuilder::new("m")
            .bundle("shared", "h")
            .bundle_with_deps("a", "h", ["shared"])
            .bundle_with_deps("b", "h", ["shared"])
            .build()
            .unwrap();
        let mut mgr = manager(manifest, &[]);
        mgr.acquire("a").unwrap();
        mgr.acquire("b").unwrap();
        assert_eq!(mgr.reference_count("shared"), 2);

        mgr.release("a").unwrap();
        assert!(mgr.is_resident("shared"));
        assert!(mgr.get_if_fully_resolved("b").is_some());
    }

    #[test]
    fn test_double_release_is_not_loaded() {
        let mut mgr = manager(tree(), &[]);
        mgr.acquire("Z").unwrap();
        mgr.release("Z").unwrap();
        assert_eq!(
            mgr.release("Z"),
            Err(LifecycleError::NotLoaded("Z".to_string()))
        );
    }

    #[test]
    fn test_failed_dependency_rolls_back() {
        let mut mgr = manager(tree(), &[]);
        mgr.acquire("W").unwrap();
        mgr.loader.broken.insert("Z".to_string());

        assert!(matches!(mgr.acquire("X"), Err(LifecycleError::Load { .. })));
        assert!(!mgr.is_resident("X"));
        assert!(!mgr.is_resident("Y"));
        assert_eq!(mgr.reference_count("W"), 1);
        assert_eq!(mgr.resident_count(), 1);
    }

    #[test]
    fn test_cycle_detected() {
        let manifest = Manifest::from_entries(
            "m",
            vec![
                {
                    let mut e = crate::manifest::BundleEntry::new("a", "h");
                    e.dependencies = vec!["b".to_string()];
                    e
                },
                {
                    let mut e = crate::manifest::BundleEntry::new("b", "h");
                    e.dependencies = vec!["a".to_string()];
                    e
                },
            ],
        )
        .unwrap();
        let mut mgr = manager(manifest, &[]);

        match mgr.acquire("a") {
            Err(LifecycleError::DependencyCycle { chain }) => {
                assert_eq!(chain, vec!["a", "b", "a"]);
            }
            other => panic!("expected cycle, got {:?}", other.map(|b| b.name().to_string())),
        }
        assert_eq!(mgr.resident_count(), 0);
    }

    #[test]
    fn test_unknown_bundle() {
        let mut mgr = manager(tree(), &[]);
        assert_eq!(
            mgr.acquire("nope").map(|b| b.name().to_string()),
            Err(LifecycleError::UnknownBundle("nope".to_string()))
        );
    }

    #[test]
    fn test_location_follows_external_set() {
        let mut mgr = manager(tree(), &["Y"]);
        mgr.acquire("X").unwrap();

        let y = mgr.get_if_fully_resolved("Y").unwrap();
        assert_eq!(y.location(), &BundleLocation::PatchCache(PathBuf::from("/patch/Y")));
        let w = mgr.get_if_fully_resolved("W").unwrap();
        assert_eq!(w.location(), &BundleLocation::Baseline(PathBuf::from("/base/W")));
    }

    #[test]
    fn test_variants_resolved_for_requests_and_dependencies() {
        let manifest = ManifestBuilder::new("m")
            .variant("voice", "en", "h1")
            .variant("voice", "fr", "h2")
            .bundle_with_deps("scene", "h3", ["voice"])
            .build()
            .unwrap();
        let mut mgr = manager(manifest, &[])
            .with_preferred_variants(vec!["fr".to_string(), "en".to_string()]);

        let scene = mgr.acquire("scene").unwrap();
        assert_eq!(scene.dependencies(), ["voice.fr"]);
        assert!(mgr.is_resident("voice.fr"));
        assert!(mgr.is_resident("voice"));
        assert!(!mgr.loaded.contains_key("voice.en"));
    }

    #[test]
    fn test_bare_variant_dependency_without_preferences_loads() {
        let manifest = ManifestBuilder::new("m")
            .variant("voice", "en", "h1")
            .variant("voice", "fr", "h2")
            .bundle_with_deps("scene", "h3", ["voice"])
            .build()
            .unwrap();
        let mut mgr = manager(manifest, &[]);

        let scene = mgr.acquire("scene").unwrap();
        assert_eq!(scene.dependencies(), ["voice.en"]);
        assert!(mgr.is_resident("voice.en"));
        assert_eq!(mgr.loader().loads, vec!["voice.en", "scene"]);
    }

    #[test]
    fn test_not_fully_resolved_when_dependency_missing() {
        let mut mgr = manager(tree(), &[]);
        mgr.acquire("X").unwrap();
        // Simulate an out-of-band unload of a dependency.
        mgr.loaded.remove("W");
        assert!(mgr.get_if_fully_resolved("X").is_none());
        assert!(mgr.get_if_fully_resolved("Z").is_some());
    }

    #[test]
    fn test_release_all() {
        let mut mgr = manager(tree(), &[]);
        mgr.acquire("X").unwrap();
        mgr.acquire("X").unwrap();
        assert_eq!(mgr.release_all(), 4);
        assert_eq!(mgr.resident_count(), 0);
        assert_eq!(mgr.reference_count("X"), 0);
    }
}
