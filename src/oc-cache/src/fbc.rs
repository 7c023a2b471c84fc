//! Typed views over the four well-known FBC schemas (`olm.package`,
//! `olm.channel`, `olm.bundle`, `olm.deprecations`), read back from the
//! `<package>/<schema>/<name>.json` tree this crate materializes. The wire
//! shape itself is out of this pipeline's scope; these types exist only so
//! the resolver doesn't have to re-parse raw JSON.

use std::path::Path;

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageMeta {
    pub name: String,
    #[serde(default)]
    pub default_channel: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelEntry {
    pub name: String,
    #[serde(default)]
    pub replaces: Option<String>,
    #[serde(default)]
    pub skips: Vec<String>,
    #[serde(default)]
    pub skip_range: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMeta {
    pub package: String,
    pub name: String,
    #[serde(default)]
    pub entries: Vec<ChannelEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleMeta {
    pub package: String,
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub properties: Vec<serde_json::Value>,
    #[serde(default)]
    pub related_images: Vec<serde_json::Value>,
}

impl BundleMeta {
    /// The `olm.package` property carries `{packageName, version}`; every
    /// bundle blob must have exactly one.
    pub fn version(&self) -> Option<Version> {
        self.properties
            .iter()
            .find(|p| p.get("type").and_then(|t| t.as_str()) == Some("olm.package"))
            .and_then(|p| p.get("value"))
            .and_then(|v| v.get("version"))
            .and_then(|v| v.as_str())
            .and_then(|s| Version::parse(s).ok())
    }

    pub fn image_ref(&self) -> Option<&str> {
        self.image.as_deref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeprecationReferenceSchema {
    OlmPackage,
    OlmChannel,
    OlmBundle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeprecationReference {
    pub schema: DeprecationReferenceSchema,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeprecationEntry {
    pub reference: DeprecationReference,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeprecationsMeta {
    pub package: String,
    #[serde(default)]
    pub entries: Vec<DeprecationEntry>,
}

/// Everything known about one package within one catalog's cached content.
#[derive(Debug, Clone, Default)]
pub struct LoadedPackage {
    pub package: Option<PackageMeta>,
    pub channels: Vec<ChannelMeta>,
    pub bundles: Vec<BundleMeta>,
    pub deprecations: Option<DeprecationsMeta>,
}

impl LoadedPackage {
    pub fn is_empty(&self) -> bool {
        self.package.is_none() && self.channels.is_empty() && self.bundles.is_empty()
    }

    /// Names of bundles that appear in `channel`'s entry list.
    pub fn bundle_names_in_channel(&self, channel: &str) -> Vec<&str> {
        self.channels
            .iter()
            .filter(|c| c.name == channel)
            .flat_map(|c| c.entries.iter().map(|e| e.name.as_str()))
            .collect()
    }
}

/// Reads back the `<dir>/<package>/<schema>/*.json` layout [`materialize`]
/// writes. A missing package subdirectory yields an empty (not erroring)
/// [`LoadedPackage`], matching §4.E's "missing packages yield empty but not
/// error".
pub fn load_package(root: &Path, package: &str) -> Result<LoadedPackage> {
    let dir = root.join(package);
    let mut out = LoadedPackage::default();
    if !dir.is_dir() {
        return Ok(out);
    }

    for schema in ["olm.package", "olm.channel", "olm.bundle", "olm.deprecations"] {
        let schema_dir = dir.join(schema);
        if !schema_dir.is_dir() {
            continue;
        }
        for entry in std::fs::read_dir(&schema_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().map(|ext| ext != "json").unwrap_or(true) {
                continue;
            }
            let raw = std::fs::read_to_string(&path)?;
            let parse_err = |source: serde_json::Error| Error::MalformedBlob {
                path: path.clone(),
                source: std::sync::Arc::new(source),
            };
            match schema {
                "olm.package" => out.package = Some(serde_json::from_str(&raw).map_err(parse_err)?),
                "olm.channel" => out.channels.push(serde_json::from_str(&raw).map_err(parse_err)?),
                "olm.bundle" => out.bundles.push(serde_json::from_str(&raw).map_err(parse_err)?),
                "olm.deprecations" => {
                    out.deprecations = Some(serde_json::from_str(&raw).map_err(parse_err)?)
                }
                _ => unreachable!(),
            }
        }
    }
    Ok(out)
}
