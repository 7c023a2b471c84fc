use semver::{Version, VersionReq};

use oc_types::extension::UpgradeConstraintPolicy;

/// One catalog's identity and reachable content, as observed by the
/// extension reconciler before calling the resolver. Catalogs not
/// `Serving=True` must be filtered out by the caller (§4.E step 1).
#[derive(Debug, Clone)]
pub struct CatalogSource {
    pub name: String,
    pub priority: i32,
    pub base_url: String,
    pub resolved_digest_ref: String,
}

/// A desired package, as carried by `ClusterExtension.spec.source.catalog`.
#[derive(Debug, Clone)]
pub struct ResolveRequest {
    pub package_name: String,
    pub version_req: Option<VersionReq>,
    pub channels: Option<Vec<String>>,
    pub policy: UpgradeConstraintPolicy,
    pub installed_version: Option<Version>,
}
