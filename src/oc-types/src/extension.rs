//! The `ClusterExtension` custom resource: a request to install a single
//! bundle from a package served by one or more `Catalog`s.

use kube::CustomResource;
use schemars::JsonSchema;
use semver::VersionReq;
use serde::{Deserialize, Serialize};

use crate::condition::Conditions;

/// Reserved identity that routes the reconciler's auth boundary through
/// synthetic-user impersonation instead of service-account impersonation.
pub const SYNTHETIC_USER: &str = "olm.synthetic-user";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "olm.operatorframework.io",
    version = "v1",
    kind = "ClusterExtension",
    singular = "clusterextension",
    plural = "clusterextensions",
    status = "ClusterExtensionStatus",
    shortname = "clusterextension"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterExtensionSpec {
    pub namespace: String,
    pub service_account: ServiceAccountRef,
    pub source: ExtensionSource,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccountRef {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum ExtensionSource {
    Catalog(CatalogSourceConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSourceConfig {
    pub package_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<Vec<String>>,
    #[serde(default)]
    pub upgrade_constraint_policy: UpgradeConstraintPolicy,
}

impl CatalogSourceConfig {
    pub fn version_req(&self) -> Result<Option<VersionReq>, semver::Error> {
        self.version.as_deref().map(VersionReq::parse).transpose()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum UpgradeConstraintPolicy {
    #[default]
    Enforce,
    SelfCertified,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterExtensionStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed: Option<InstalledBundle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<ResolvedBundleRef>,
    #[serde(default)]
    pub conditions: Conditions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InstalledBundle {
    pub bundle: InstalledBundleRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InstalledBundleRef {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedBundleRef {
    pub catalog: String,
    pub package: String,
    pub version: String,
    pub image_ref: String,
}
