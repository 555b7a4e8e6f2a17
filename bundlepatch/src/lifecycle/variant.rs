//! Variant selection.
//!
//! A variant bundle carries a tag (`en`, `hd`, ...) and is named
//! `<base>.<tag>`. Requesting either the base name or any of its variants
//! selects the variant whose tag comes first in the preference list. With no
//! listed tag available the request is returned unchanged if the manifest
//! lists it; a bare base name, which the manifest never lists, resolves to
//! its first variant in manifest order.

use crate::manifest::Manifest;

/// Resolve `name` against the variants of `manifest`.
pub fn resolve_variant(manifest: &Manifest, name: &str, preferred: &[String]) -> String {
    let base = manifest
        .entry(name)
        .and_then(|e| e.base_name())
        .unwrap_or(name);

    let first = manifest
        .bundles_with_variants()
        .find(|e| e.base_name() == Some(base))
        .map(|e| e.name.as_str());

    let preferred_match = manifest
        .bundles_with_variants()
        .filter(|e| e.base_name() == Some(base))
        .filter_map(|e| {
            let tag = e.variant.as_deref()?;
            preferred
                .iter()
                .position(|p| p == tag)
                .map(|rank| (rank, e.name.as_str()))
        })
        .min_by_key(|(rank, _)| *rank)
        .map(|(_, variant)| variant);

    match (preferred_match, first) {
        (Some(variant), _) => variant.to_string(),
        (None, Some(first)) if !manifest.contains(name) => first.to_string(),
        _ => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestBuilder;

    fn voices() -> Manifest {
        ManifestBuilder::new("m")
            .variant("bundle", "en", "h1")
            .variant("bundle", "fr", "h2")
            .variant("bundle", "de", "h3")
            .bundle("plain", "h4")
            .build()
            .unwrap()
    }

    fn prefs(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_lowest_preference_index_wins() {
        assert_eq!(resolve_variant(&voices(), "bundle", &prefs(&["en", "fr"])), "bundle.en");
        assert_eq!(resolve_variant(&voices(), "bundle", &prefs(&["fr", "en"])), "bundle.fr");
    }

    #[test]
    fn test_unlisted_variants_fall_back_to_first_variant() {
        assert_eq!(resolve_variant(&voices(), "bundle", &prefs(&["jp"])), "bundle.en");
        assert_eq!(resolve_variant(&voices(), "bundle", &[]), "bundle.en");
    }

    #[test]
    fn test_listed_base_name_is_kept_without_preference() {
        let manifest = ManifestBuilder::new("m")
            .bundle("bundle", "h0")
            .variant("bundle", "fr", "h1")
            .build()
            .unwrap();
        assert_eq!(resolve_variant(&manifest, "bundle", &[]), "bundle");
        assert_eq!(resolve_variant(&manifest, "bundle", &prefs(&["fr"])), "bundle.fr");
    }

    #[test]
    fn test_qualified_request_is_remapped() {
        assert_eq!(resolve_variant(&voices(), "bundle.de", &prefs(&["fr"])), "bundle.fr");
        assert_eq!(resolve_variant(&voices(), "bundle.de", &prefs(&["jp"])), "bundle.de");
    }

    #[test]
    fn test_bundles_without_variants_unchanged() {
        assert_eq!(resolve_variant(&voices(), "plain", &prefs(&["en"])), "plain");
        assert_eq!(resolve_variant(&voices(), "missing", &prefs(&["en"])), "missing");
    }
}
