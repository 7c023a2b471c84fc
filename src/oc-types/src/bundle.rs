//! `ResolvedBundle`: the pure value the resolver (4.E) hands to the
//! extension reconciler (4.I) within a single reconcile. It has no
//! lifecycle of its own beyond that handoff.

use semver::Version;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeprecationNotice {
    /// `Package`, `Channel`, or `Bundle`.
    pub scope: DeprecationScope,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeprecationScope {
    Package,
    Channel,
    Bundle,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedBundle {
    pub catalog_name: String,
    pub catalog_priority: i32,
    pub package_name: String,
    pub name: String,
    pub version: Version,
    pub image_ref: String,
    pub properties: Vec<serde_json::Value>,
    pub related_images: Vec<String>,
    pub channels_in: Vec<String>,
    pub deprecations: Vec<DeprecationNotice>,
}

impl ResolvedBundle {
    pub fn is_deprecated(&self) -> bool {
        !self.deprecations.is_empty()
    }
}
