//! The `Catalog` custom resource.
//!
//! This specification chose the `ClusterCatalog` shape (not the legacy
//! `v1alpha1` `Catalog`) per the migration decision recorded in
//! `DESIGN.md`: one cluster-scoped resource per catalog, identical field
//! names across API versions.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::condition::Conditions;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "olm.operatorframework.io",
    version = "v1",
    kind = "ClusterCatalog",
    singular = "clustercatalog",
    plural = "clustercatalogs",
    status = "CatalogStatus",
    shortname = "clustercatalog"
)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSpec {
    pub source: CatalogSource,
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum CatalogSource {
    Image(ImageSource),
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImageSource {
    pub ref_: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_seconds: Option<u64>,
}

impl ImageSource {
    /// `true` if `ref_` already carries a `sha256:` digest.
    pub fn is_digest_pinned(&self) -> bool {
        self.ref_.contains('@')
    }

    /// Per §3: digest-pinned refs must not carry a poll interval.
    pub fn validate(&self) -> Result<(), String> {
        if self.is_digest_pinned() && self.poll_interval_seconds.is_some() {
            return Err("pollInterval is forbidden when ref is digest-pinned".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CatalogStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_source: Option<ResolvedSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urls: Option<CatalogUrls>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_unpacked: Option<DateTime<Utc>>,
    #[serde(default)]
    pub conditions: Conditions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedSource {
    pub image: ResolvedImageSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedImageSource {
    #[serde(rename = "ref")]
    pub ref_: String,
    pub last_successful_poll_attempt: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CatalogUrls {
    pub base: String,
}

/// Alias matching the component-design prose, which calls this object
/// `Catalog` throughout; the CRD kind is `ClusterCatalog`.
pub type Catalog = ClusterCatalog;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_pinned_with_poll_interval_is_rejected() {
        let src = ImageSource {
            ref_: "quay.io/x/cat@sha256:deadbeef".to_string(),
            poll_interval_seconds: Some(60),
        };
        assert!(src.validate().is_err());
    }

    #[test]
    fn tag_ref_with_poll_interval_is_accepted() {
        let src = ImageSource {
            ref_: "quay.io/x/cat:latest".to_string(),
            poll_interval_seconds: Some(60),
        };
        assert!(src.validate().is_ok());
    }
}
