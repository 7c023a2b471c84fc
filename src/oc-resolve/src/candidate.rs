use semver::Version;

use oc_cache::fbc::{BundleMeta, DeprecationReferenceSchema, DeprecationsMeta, LoadedPackage};
use oc_types::bundle::{DeprecationNotice, DeprecationScope};

#[derive(Debug, Clone)]
pub struct Candidate {
    pub catalog_name: String,
    pub catalog_priority: i32,
    pub bundle: BundleMeta,
    pub version: Version,
    pub channels_in: Vec<String>,
    pub deprecations: Vec<DeprecationNotice>,
}

/// Every bundle of `package_name` found in `loaded`, paired with the
/// channels that list it and the deprecation notices that apply to it.
pub fn candidates_from(catalog_name: &str, catalog_priority: i32, loaded: &LoadedPackage) -> Vec<Candidate> {
    loaded
        .bundles
        .iter()
        .filter_map(|bundle| {
            let version = bundle.version()?;
            let channels_in: Vec<String> = loaded
                .channels
                .iter()
                .filter(|c| c.entries.iter().any(|e| e.name == bundle.name))
                .map(|c| c.name.clone())
                .collect();
            let deprecations = notices_for(loaded.deprecations.as_ref(), &bundle.name, &channels_in);
            Some(Candidate {
                catalog_name: catalog_name.to_string(),
                catalog_priority,
                bundle: bundle.clone(),
                version,
                channels_in,
                deprecations,
            })
        })
        .collect()
}

fn notices_for(deprecations: Option<&DeprecationsMeta>, bundle_name: &str, channels_in: &[String]) -> Vec<DeprecationNotice> {
    let Some(deprecations) = deprecations else {
        return Vec::new();
    };
    deprecations
        .entries
        .iter()
        .filter_map(|entry| {
            let applies = match entry.reference.schema {
                DeprecationReferenceSchema::OlmPackage => true,
                DeprecationReferenceSchema::OlmChannel => entry
                    .reference
                    .name
                    .as_deref()
                    .is_some_and(|n| channels_in.iter().any(|c| c == n)),
                DeprecationReferenceSchema::OlmBundle => {
                    entry.reference.name.as_deref() == Some(bundle_name)
                }
            };
            applies.then(|| DeprecationNotice {
                scope: match entry.reference.schema {
                    DeprecationReferenceSchema::OlmPackage => DeprecationScope::Package,
                    DeprecationReferenceSchema::OlmChannel => DeprecationScope::Channel,
                    DeprecationReferenceSchema::OlmBundle => DeprecationScope::Bundle,
                },
                message: entry.message.clone(),
            })
        })
        .collect()
}
