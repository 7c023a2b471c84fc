use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use oci_client::manifest::OciDescriptor;
use oci_client::secrets::RegistryAuth;
use oci_client::{Client, Reference};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{Error, Result};
use crate::INDEX_CONFIGS_LABEL;

pub struct PulledImage {
    pub manifest_digest: String,
    pub manifest_bytes: Vec<u8>,
    pub config: ImageConfig,
    pub layers: Vec<PulledLayer>,
    /// Keeps the layer blobs' backing directory alive for the lifetime of
    /// this value; dropped (and removed) once the caller is done with it.
    _blobs_dir: tempfile::TempDir,
}

pub struct PulledLayer {
    pub descriptor: OciDescriptor,
    pub path: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
pub struct ImageConfig {
    #[serde(default)]
    pub config: ImageConfigInner,
}

#[derive(Debug, Default, Deserialize)]
pub struct ImageConfigInner {
    #[serde(default, rename = "Labels")]
    pub labels: BTreeMap<String, String>,
}

pub async fn pull_image(
    client: &Client,
    reference: &Reference,
    auth: &RegistryAuth,
) -> Result<PulledImage> {
    let (manifest, manifest_digest, config_json) = client
        .pull_manifest_and_config(reference, auth)
        .await
        .map_err(|e| Error::Registry(e.to_string()))?;

    let manifest_bytes =
        serde_json::to_vec(&manifest).map_err(|e| Error::ManifestParse(e.to_string()))?;
    let config: ImageConfig =
        serde_json::from_str(&config_json).map_err(|e| Error::ManifestParse(e.to_string()))?;

    let blobs_dir = tempfile::TempDir::new().map_err(Error::Io)?;

    // The registry client tolerates concurrent blob pulls; we still pull
    // layers one at a time here, matching the sequential-apply loop below
    // (ordering of layer application matters for overlay semantics).
    let mut layers = Vec::with_capacity(manifest.layers.len());
    for (i, descriptor) in manifest.layers.iter().enumerate() {
        let path = blobs_dir.path().join(format!("{i}.layer"));
        let file = tokio::fs::File::create(&path).await.map_err(Error::Io)?;
        let mut writer = tokio::io::BufWriter::new(file);
        client
            .pull_blob(reference, descriptor, &mut writer)
            .await
            .map_err(|e| Error::Registry(e.to_string()))?;
        writer.flush().await.map_err(Error::Io)?;
        layers.push(PulledLayer {
            descriptor: descriptor.clone(),
            path,
        });
    }

    Ok(PulledImage {
        manifest_digest,
        manifest_bytes,
        config,
        layers,
        _blobs_dir: blobs_dir,
    })
}

/// Reads the `operators.operatorframework.io.index.configs.v1` label and
/// returns the subdirectory it names, if present.
pub fn select_config_label(config: &ImageConfig) -> Result<Option<PathBuf>> {
    Ok(config
        .config
        .labels
        .get(INDEX_CONFIGS_LABEL)
        .map(PathBuf::from))
}

/// Decompress and apply each layer to `target`, keeping only entries under
/// `subdir`, rewriting ownership to the current process's uid/gid, and
/// adding owner read+execute bits. Mirrors a single-layer-at-a-time `tar`
/// apply, the same shape as a container runtime's rootfs unpack.
pub async fn apply_layers(layers: &[PulledLayer], subdir: &Path, target: &Path) -> Result<()> {
    for layer in layers {
        let path = layer.path.clone();
        let media_type = layer.descriptor.media_type.clone();
        let subdir = subdir.to_path_buf();
        let target = target.to_path_buf();
        tokio::task::spawn_blocking(move || apply_layer_blocking(&path, &media_type, &subdir, &target))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))??;
    }
    Ok(())
}

fn apply_layer_blocking(
    layer_path: &Path,
    media_type: &str,
    subdir: &Path,
    target: &Path,
) -> Result<()> {
    let file = std::fs::File::open(layer_path).map_err(Error::Io)?;
    let reader: Box<dyn std::io::Read> = if media_type.contains("gzip") {
        Box::new(flate2::read::GzDecoder::new(file))
    } else if media_type.contains("zstd") {
        Box::new(zstd::stream::read::Decoder::new(file).map_err(Error::Io)?)
    } else {
        Box::new(file)
    };
    let mut archive = tar::Archive::new(reader);

    #[cfg(unix)]
    let (uid, gid) = (current_uid(), current_gid());

    for entry in archive.entries().map_err(Error::Io)? {
        let mut entry = entry.map_err(Error::Io)?;
        let entry_path = entry.path().map_err(Error::Io)?.into_owned();

        let Some(relative) = strip_subdir(&entry_path, subdir) else {
            continue;
        };
        if relative.as_os_str().is_empty() {
            continue;
        }
        if relative
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            debug!(?entry_path, "skipping path-traversal entry");
            continue;
        }
        if entry.header().entry_type().is_symlink() {
            debug!(?entry_path, "skipping symlink entry");
            continue;
        }

        let dest = target.join(&relative);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(Error::Io)?;
        }

        entry.unpack(&dest).map_err(Error::Io)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::{chown, PermissionsExt};
            let _ = chown(&dest, Some(uid), Some(gid));
            if let Ok(meta) = std::fs::metadata(&dest) {
                let mut perms = meta.permissions();
                perms.set_mode(perms.mode() | 0o500);
                let _ = std::fs::set_permissions(&dest, perms);
            }
        }
    }
    Ok(())
}

fn strip_subdir(entry_path: &Path, subdir: &Path) -> Option<PathBuf> {
    let normalized_subdir: PathBuf = subdir
        .components()
        .filter(|c| !matches!(c, Component::RootDir | Component::CurDir))
        .collect();
    if normalized_subdir.as_os_str().is_empty() {
        return Some(entry_path.to_path_buf());
    }
    entry_path
        .strip_prefix(&normalized_subdir)
        .ok()
        .map(|p| p.to_path_buf())
}

#[cfg(unix)]
fn current_uid() -> u32 {
    // SAFETY: `getuid(2)` has no preconditions and never fails.
    unsafe { libc::getuid() }
}

#[cfg(unix)]
fn current_gid() -> u32 {
    // SAFETY: `getgid(2)` has no preconditions and never fails.
    unsafe { libc::getgid() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_matching_subdir_prefix() {
        let stripped = strip_subdir(Path::new("configs/foo.yaml"), Path::new("configs"));
        assert_eq!(stripped, Some(PathBuf::from("foo.yaml")));
    }

    #[test]
    fn rejects_entries_outside_subdir() {
        let stripped = strip_subdir(Path::new("other/foo.yaml"), Path::new("configs"));
        assert_eq!(stripped, None);
    }

    #[test]
    fn empty_subdir_keeps_full_path() {
        let stripped = strip_subdir(Path::new("foo.yaml"), Path::new(""));
        assert_eq!(stripped, Some(PathBuf::from("foo.yaml")));
    }
}
