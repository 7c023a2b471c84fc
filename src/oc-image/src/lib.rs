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
#![warn(clippy::unwrap_used)]
// END LINT CONFIG

//! Resolves an image reference to a canonical digest, pulls it, and applies
//! its labeled subtree into a content-addressed, read-only directory.
//!
//! See [`Puller::unpack`] for the full contract.

mod auth;
mod cache;
mod error;
mod policy;
mod reference;
mod unpack;

pub use auth::AuthContext;
pub use error::{Error, Result};
pub use policy::{InsecureAcceptAnything, SignaturePolicy};

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use oci_client::client::{ClientConfig, ClientProtocol};
use oci_client::Client;
use tracing::{info, instrument, warn};

use cache::OwnerLocks;
use reference::CanonicalReference;

/// Label whose value names the subdirectory (within each layer) that holds
/// the FBC or bundle content to unpack.
pub const INDEX_CONFIGS_LABEL: &str = "operators.operatorframework.io.index.configs.v1";

/// Outcome of a successful [`Puller::unpack`] call.
#[derive(Debug, Clone)]
pub struct UnpackResult {
    pub fs_root: PathBuf,
    pub canonical_ref: String,
    pub unpacked_at: DateTime<Utc>,
}

/// Pulls images into `<root>/<owner>/<digest>` content-addressed directories.
pub struct Puller {
    root: PathBuf,
    client_protocol: ClientProtocol,
    policy: Arc<dyn SignaturePolicy>,
    locks: OwnerLocks,
}

impl Puller {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            client_protocol: ClientProtocol::Https,
            policy: Arc::new(InsecureAcceptAnything),
            locks: OwnerLocks::default(),
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn SignaturePolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Allow plain HTTP registries (`--tls-verify-skip`-equivalent for
    /// on-cluster mirrors). Never reached for public registries in
    /// production, but kept configurable for the same reason the source
    /// makes it a flag.
    pub fn with_insecure_http(mut self) -> Self {
        self.client_protocol = ClientProtocol::HttpsExcept(vec![]);
        self
    }

    /// Implements the contract in component design §4.A.
    #[instrument(skip(self, auth), fields(owner = %owner, image_ref = %image_ref))]
    pub async fn unpack(
        &self,
        owner: &str,
        image_ref: &str,
        auth: &AuthContext,
    ) -> Result<UnpackResult> {
        let parsed = reference::parse(image_ref)?;

        let client = Client::new(ClientConfig {
            protocol: self.client_protocol.clone(),
            extra_root_certificates: auth.extra_root_certificates.clone(),
            ..Default::default()
        });
        let registry_auth = auth.registry_auth_for(&parsed);

        let _guard = self.locks.lock(owner).await;

        let canonical = reference::resolve_canonical(&client, &parsed, &registry_auth).await?;
        let target = self.root.join(owner).join(canonical.digest_dir_name());

        if target.is_dir() {
            let unpacked_at = cache::read_unpacked_at(&target).await?;
            info!(digest = %canonical.digest, "unpack cache hit, skipping pull");
            return Ok(UnpackResult {
                fs_root: target,
                canonical_ref: canonical.reference_string(),
                unpacked_at,
            });
        }

        match self
            .unpack_fresh(&client, &registry_auth, &canonical, &target, &parsed)
            .await
        {
            Ok(unpacked_at) => {
                self.gc_sibling_digests(owner, &canonical).await;
                Ok(UnpackResult {
                    fs_root: target,
                    canonical_ref: canonical.reference_string(),
                    unpacked_at,
                })
            }
            Err(e) => {
                if target.exists() {
                    let _ = cache::remove_writable(&target).await;
                }
                Err(e)
            }
        }
    }

    async fn unpack_fresh(
        &self,
        client: &Client,
        registry_auth: &oci_client::secrets::RegistryAuth,
        canonical: &CanonicalReference,
        target: &std::path::Path,
        original_ref: &oci_client::Reference,
    ) -> Result<DateTime<Utc>> {
        let owner_dir = target.parent().unwrap_or(target).to_path_buf();
        tokio::fs::create_dir_all(&owner_dir)
            .await
            .map_err(Error::Io)?;
        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&owner_dir)
            .map_err(Error::Io)?;

        let pull = unpack::pull_image(client, &canonical.reference, registry_auth).await?;

        self.policy.validate(&pull.manifest_digest, &pull.manifest_bytes)?;

        let subdir = unpack::select_config_label(&pull.config)?.ok_or_else(|| {
            if canonical.was_already_digest_pinned(original_ref) {
                Error::MissingFbcLabelTerminal
            } else {
                Error::MissingFbcLabelTransient
            }
        })?;

        unpack::apply_layers(&pull.layers, &subdir, staging.path()).await?;

        // Written before lock-down: once the tree is 0500/0400 the owner no
        // longer has write permission on the directory itself.
        let unpacked_at = oc_types::time::now_truncated();
        cache::write_unpacked_at(staging.path(), unpacked_at).await?;

        cache::lock_down_tree(staging.path()).await?;

        tokio::fs::create_dir_all(target.parent().unwrap_or(target))
            .await
            .map_err(Error::Io)?;
        match tokio::fs::rename(staging.path(), target).await {
            Ok(()) => {}
            Err(e) if target.is_dir() => {
                // Another racer for the same owner+digest won; our staging
                // dir is discarded when `staging` drops.
                warn!(error = %e, "rename raced with a concurrent unpack of the same digest");
            }
            Err(e) => return Err(Error::Io(e)),
        }
        // `staging`'s directory no longer exists at its original path after a
        // successful rename; dropping it is then a no-op best-effort cleanup.

        Ok(unpacked_at)
    }

    async fn gc_sibling_digests(&self, owner: &str, canonical: &CanonicalReference) {
        let owner_dir = self.root.join(owner);
        let Ok(mut entries) = tokio::fs::read_dir(&owner_dir).await else {
            return;
        };
        let keep = canonical.digest_dir_name();
        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry.file_name() != std::ffi::OsString::from(&keep) {
                let path = entry.path();
                if let Err(e) = cache::remove_writable(&path).await {
                    warn!(?path, error = %e, "failed to garbage-collect sibling digest directory");
                }
            }
        }
    }

    /// `Cleanup(owner)`: tolerant of a missing owner subtree.
    pub async fn cleanup(&self, owner: &str) -> Result<()> {
        let owner_dir = self.root.join(owner);
        cache::remove_writable(&owner_dir).await
    }

    /// Names of the owner subdirectories currently present under the unpack
    /// root, for the garbage-collection sweep in §4.C.
    pub async fn owners(&self) -> Result<Vec<String>> {
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(Error::Io(e)),
        };
        while let Some(entry) = entries.next_entry().await.map_err(Error::Io)? {
            if let Ok(name) = entry.file_name().into_string() {
                out.push(name);
            }
        }
        Ok(out)
    }
}

/// Fingerprint of a CA directory's contents: file name paired with its
/// modification time. Cheap enough to recompute every poll.
async fn ca_dir_fingerprint(dir: &std::path::Path) -> std::io::Result<Vec<(std::ffi::OsString, std::time::SystemTime)>> {
    let mut out = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let modified = entry.metadata().await?.modified()?;
        out.push((entry.file_name(), modified));
    }
    out.sort();
    Ok(out)
}

/// Polls `dir` for changes and exits the process when one is observed. The
/// system trust store loaded into `ClientConfig` isn't hot-reloadable, so
/// the supervisor (kubelet) restarting the process is how a CA rotation
/// actually takes effect, matching `--pull-cas-dir`/`--catalogd-cas-dir`'s
/// documented restart-on-change behavior.
pub fn spawn_ca_dir_watch(dir: std::path::PathBuf, poll_interval: std::time::Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut last = ca_dir_fingerprint(&dir).await.ok();
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let current = ca_dir_fingerprint(&dir).await.ok();
            if current != last {
                warn!(dir = %dir.display(), "CA directory changed, restarting to reload trust roots");
                std::process::exit(1);
            }
            last = current;
        }
    })
}
