//! Rendering a bundle root into Kubernetes objects is a pure
//! `Bundle -> []Object` function whose concrete templating engine is out of
//! scope here; callers plug one in via [`Renderer`].

use std::path::Path;

use oc_types::revision::{CollisionProtection, Phase, PhaseObject};
use serde_json::Value;

use crate::error::{Error, Result};

pub trait Renderer: Send + Sync {
    /// Render the unpacked bundle at `bundle_root` into an ordered list of
    /// phases. Phase order is apply order.
    fn render(&self, bundle_root: &Path) -> Result<Vec<Phase>>;
}

/// A minimal reference renderer: every `*.json` file directly under
/// `<bundle_root>/manifests/` is one Kubernetes object, all placed in a
/// single `"objects"` phase in directory-listing order.
///
/// This stands in for the real templating engine the host would inject; it
/// performs no templating of its own.
#[derive(Debug, Default, Clone, Copy)]
pub struct ManifestDirRenderer;

impl Renderer for ManifestDirRenderer {
    fn render(&self, bundle_root: &Path) -> Result<Vec<Phase>> {
        let manifests_dir = bundle_root.join("manifests");
        let mut entries: Vec<_> = match std::fs::read_dir(&manifests_dir) {
            Ok(entries) => entries.collect::<std::result::Result<_, _>>()?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::Render {
                    path: manifests_dir,
                    message: "no manifests/ directory in bundle root".to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        entries.sort_by_key(|e| e.file_name());

        let mut objects = Vec::new();
        for entry in entries {
            let path = entry.path();
            if path.extension().map(|ext| ext != "json").unwrap_or(true) {
                continue;
            }
            let raw = std::fs::read_to_string(&path)?;
            let object: Value = serde_json::from_str(&raw).map_err(|e| Error::Render {
                path: path.clone(),
                message: e.to_string(),
            })?;
            objects.push(PhaseObject { object, collision_protection: CollisionProtection::Prevent });
        }

        if objects.is_empty() {
            return Err(Error::Render {
                path: manifests_dir,
                message: "no object manifests found".to_string(),
            });
        }

        Ok(vec![Phase { name: "objects".to_string(), objects }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_json_manifests_in_sorted_order() {
        let root = tempfile::tempdir().unwrap();
        let manifests = root.path().join("manifests");
        std::fs::create_dir_all(&manifests).unwrap();
        std::fs::write(manifests.join("b.json"), r#"{"kind":"ConfigMap","metadata":{"name":"b"}}"#).unwrap();
        std::fs::write(manifests.join("a.json"), r#"{"kind":"ConfigMap","metadata":{"name":"a"}}"#).unwrap();

        let phases = ManifestDirRenderer.render(root.path()).unwrap();
        assert_eq!(phases.len(), 1);
        let names: Vec<_> = phases[0]
            .objects
            .iter()
            .map(|o| o.object["metadata"]["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn missing_manifests_dir_is_a_render_error() {
        let root = tempfile::tempdir().unwrap();
        assert!(ManifestDirRenderer.render(root.path()).is_err());
    }
}
