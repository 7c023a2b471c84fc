// BEGIN LINT CONFIG
// DO NOT EDIT. Automatically generated by bin/gen-lints.
#![allow(unknown_lints)]
#![allow(clippy::style)]
#![allow(clippy::complexity)]
#![warn(clippy::bool_comparison)]
#![warn(clippy::clone_on_ref_ptr)]
#![warn(clippy::no_effect)]
#![warn(clippy::unnecessary_unwrap)]
#![warn(clippy::dbg_macro)]
#![warn(clippy::todo)]
#![warn(clippy::wildcard_dependencies)]
#![warn(clippy::redundant_clone)]
#![warn(clippy::unwrap_used)]
// END LINT CONFIG

//! The resolver (§4.E): walks every serving catalog through the cache
//! client, unions the package's candidates, filters by channel/version/
//! upgrade policy, and ranks the survivors down to a single bundle.
//!
//! Pure over its inputs (once the cache is populated): same catalogs, same
//! cached content, same request, same answer.

mod candidate;
mod request;

pub use candidate::Candidate;
pub use request::{CatalogSource, ResolveRequest};

use oc_cache::{CacheClient, CatalogRef};
use oc_types::bundle::ResolvedBundle;
use oc_types::extension::UpgradeConstraintPolicy;
use oc_types::ReconcileError;
use tracing::{info, warn};

/// Runs §4.E steps 1–6 given catalogs the caller has already filtered to
/// `Serving=True`.
pub async fn resolve(
    catalogs: &[CatalogSource],
    cache: &CacheClient,
    request: &ResolveRequest,
) -> Result<ResolvedBundle, ReconcileError> {
    let mut all_candidates = Vec::new();
    let mut rejections = Vec::new();

    for catalog in catalogs {
        let catalog_ref = CatalogRef {
            name: catalog.name.clone(),
            base_url: Some(catalog.base_url.clone()),
            resolved_digest_ref: Some(catalog.resolved_digest_ref.clone()),
            serving: true,
        };
        let dir = match cache.populate_cache(&catalog_ref).await {
            Ok(dir) => dir,
            Err(e) => {
                warn!(catalog = %catalog.name, error = %e, "resolver: catalog content unavailable");
                rejections.push(format!("{}: content unavailable: {e}", catalog.name));
                continue;
            }
        };

        let loaded = match oc_cache::fbc::load_package(&dir, &request.package_name) {
            Ok(loaded) => loaded,
            Err(e) => {
                rejections.push(format!("{}: malformed catalog content: {e}", catalog.name));
                continue;
            }
        };
        if loaded.is_empty() {
            rejections.push(format!("{}: package {:?} not found", catalog.name, request.package_name));
            continue;
        }

        all_candidates.extend(candidate::candidates_from(&catalog.name, catalog.priority, &loaded));
    }

    let filtered = filter(all_candidates, request, &mut rejections);
    let ranked = rank(filtered);

    match ranked.into_iter().next() {
        Some(winner) => {
            info!(
                catalog = %winner.catalog_name,
                package = %request.package_name,
                version = %winner.version,
                "resolved bundle"
            );
            Ok(to_resolved_bundle(winner))
        }
        None => Err(ReconcileError::terminal(
            "Blocked",
            format!(
                "no bundle satisfies package {:?}: {}",
                request.package_name,
                if rejections.is_empty() {
                    "no catalog served this package".to_string()
                } else {
                    rejections.join("; ")
                }
            ),
        )),
    }
}

fn filter(candidates: Vec<Candidate>, request: &ResolveRequest, rejections: &mut Vec<String>) -> Vec<Candidate> {
    candidates
        .into_iter()
        .filter(|c| {
            if let Some(channels) = &request.channels {
                if !c.channels_in.iter().any(|ch| channels.contains(ch)) {
                    rejections.push(format!(
                        "{} {} {}: not in any requested channel",
                        c.catalog_name, c.bundle.name, c.version
                    ));
                    return false;
                }
            }
            if let Some(req) = &request.version_req {
                if !req.matches(&c.version) {
                    rejections.push(format!(
                        "{} {} {}: does not satisfy version constraint",
                        c.catalog_name, c.bundle.name, c.version
                    ));
                    return false;
                }
            }
            if let Some(installed) = &request.installed_version {
                if request.policy == UpgradeConstraintPolicy::Enforce && &c.version <= installed {
                    rejections.push(format!(
                        "{} {} {}: not a successor of installed version {}",
                        c.catalog_name, c.bundle.name, c.version, installed
                    ));
                    return false;
                }
            }
            true
        })
        .collect()
}

/// Highest version first; ties broken by catalog priority (higher first),
/// then catalog name ascending.
fn rank(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        b.version
            .cmp(&a.version)
            .then_with(|| b.catalog_priority.cmp(&a.catalog_priority))
            .then_with(|| a.catalog_name.cmp(&b.catalog_name))
    });
    candidates
}

fn to_resolved_bundle(c: Candidate) -> ResolvedBundle {
    ResolvedBundle {
        catalog_name: c.catalog_name,
        catalog_priority: c.catalog_priority,
        package_name: c.bundle.package.clone(),
        name: c.bundle.name.clone(),
        version: c.version,
        image_ref: c.bundle.image_ref().unwrap_or_default().to_string(),
        properties: c.bundle.properties.clone(),
        related_images: c
            .bundle
            .related_images
            .iter()
            .filter_map(|v| v.get("image").and_then(|i| i.as_str()).map(str::to_string))
            .collect(),
        channels_in: c.channels_in,
        deprecations: c.deprecations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oc_cache::fbc::{BundleMeta, ChannelEntry, ChannelMeta};
    use semver::Version;
    use serde_json::json;

    fn bundle(name: &str, version: &str) -> BundleMeta {
        BundleMeta {
            package: "foo".to_string(),
            name: name.to_string(),
            image: Some(format!("quay.io/x/foo-bundle:{name}")),
            properties: vec![json!({"type": "olm.package", "value": {"packageName": "foo", "version": version}})],
            related_images: vec![],
        }
    }

    fn candidate(catalog: &str, priority: i32, version: &str) -> Candidate {
        Candidate {
            catalog_name: catalog.to_string(),
            catalog_priority: priority,
            bundle: bundle(&format!("foo.v{version}"), version),
            version: Version::parse(version).unwrap(),
            channels_in: vec!["stable".to_string()],
            deprecations: vec![],
        }
    }

    #[test]
    fn ranks_highest_version_first() {
        let candidates = vec![candidate("a", 0, "1.0.0"), candidate("b", 0, "2.0.0")];
        let ranked = rank(candidates);
        assert_eq!(ranked[0].catalog_name, "b");
    }

    #[test]
    fn ties_broken_by_priority_then_name() {
        let candidates = vec![
            candidate("zzz", 10, "1.0.0"),
            candidate("aaa", 20, "1.0.0"),
            candidate("bbb", 20, "1.0.0"),
        ];
        let ranked = rank(candidates);
        assert_eq!(ranked[0].catalog_name, "aaa");
    }

    #[test]
    fn enforce_policy_rejects_non_successor() {
        let candidates = vec![candidate("a", 0, "1.0.0")];
        let request = ResolveRequest {
            package_name: "foo".to_string(),
            version_req: None,
            channels: None,
            policy: UpgradeConstraintPolicy::Enforce,
            installed_version: Some(Version::parse("1.0.0").unwrap()),
        };
        let mut rejections = Vec::new();
        let filtered = filter(candidates, &request, &mut rejections);
        assert!(filtered.is_empty());
        assert_eq!(rejections.len(), 1);
    }

    #[test]
    fn self_certified_policy_allows_any_version() {
        let candidates = vec![candidate("a", 0, "0.9.0")];
        let request = ResolveRequest {
            package_name: "foo".to_string(),
            version_req: None,
            channels: None,
            policy: UpgradeConstraintPolicy::SelfCertified,
            installed_version: Some(Version::parse("1.0.0").unwrap()),
        };
        let mut rejections = Vec::new();
        let filtered = filter(candidates, &request, &mut rejections);
        assert_eq!(filtered.len(), 1);
    }

    #[test]
    fn channel_filter_excludes_bundles_outside_requested_channels() {
        let mut c = candidate("a", 0, "1.0.0");
        c.channels_in = vec!["alpha".to_string()];
        let request = ResolveRequest {
            package_name: "foo".to_string(),
            version_req: None,
            channels: Some(vec!["stable".to_string()]),
            policy: UpgradeConstraintPolicy::Enforce,
            installed_version: None,
        };
        let mut rejections = Vec::new();
        let filtered = filter(vec![c], &request, &mut rejections);
        assert!(filtered.is_empty());
    }

    #[test]
    fn bundle_in_channel_is_discovered_via_channel_entries() {
        let loaded = oc_cache::fbc::LoadedPackage {
            package: None,
            channels: vec![ChannelMeta {
                package: "foo".to_string(),
                name: "stable".to_string(),
                entries: vec![ChannelEntry {
                    name: "foo.v1.0.0".to_string(),
                    replaces: None,
                    skips: vec![],
                    skip_range: None,
                }],
            }],
            bundles: vec![bundle("foo.v1.0.0", "1.0.0")],
            deprecations: None,
        };
        let candidates = candidate::candidates_from("cat", 0, &loaded);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].channels_in, vec!["stable".to_string()]);
    }
}
