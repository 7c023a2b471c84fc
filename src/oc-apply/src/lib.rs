#![warn(clippy::unwrap_used, clippy::todo, clippy::dbg_macro)]
#![allow(clippy::needless_return)]

//! The applier (§4.H): `Apply(extension, bundleRoot) -> (releaseDesc, error)`.
//!
//! Renders a bundle root into phases, stamps owner reference and
//! managed-by label onto every object, applies each phase under the
//! stable field owner, and records the applied set as a
//! `ClusterExtensionRevision`.

mod error;
pub mod owner;
mod phases;
mod render;
pub mod revision;

use std::path::Path;

use kube::Client;
use tracing::instrument;

pub use error::{Error, Result};
pub use phases::FIELD_MANAGER;
pub use render::{ManifestDirRenderer, Renderer};
pub use revision::CleanupProgress;

/// Identity of the owning `ClusterExtension`, threaded through render,
/// owner-stamp, and revision-record steps.
pub struct Owner<'a> {
    pub name: &'a str,
    pub uid: &'a str,
    pub namespace: &'a str,
}

#[derive(Debug, Clone)]
pub struct ReleaseDescription {
    pub revision: i64,
    pub phase_names: Vec<String>,
    pub object_count: usize,
}

/// Render `bundle_root`, stamp and apply every object phase by phase, and
/// record the result as a new (or, if unchanged, the existing) revision.
#[instrument(skip(client, renderer), fields(extension = %owner.name))]
pub async fn apply(
    client: &Client,
    renderer: &dyn Renderer,
    bundle_root: &Path,
    owner: &Owner<'_>,
) -> Result<ReleaseDescription> {
    let mut rendered_phases = renderer.render(bundle_root)?;

    for phase in &mut rendered_phases {
        for phase_object in &mut phase.objects {
            self::owner::stamp(&mut phase_object.object, owner.name, owner.uid);
        }
    }

    for phase in &rendered_phases {
        let objects: Vec<_> = phase.objects.iter().map(|o| o.object.clone()).collect();
        phases::apply_phase(client, &phase.name, &objects).await?;
    }

    let existing = revision::list_for_extension(client, owner.namespace, owner.name).await?;
    let revision_number = revision::next_revision_number(&existing);
    let object_count = rendered_phases.iter().map(|p| p.objects.len()).sum();
    let phase_names = rendered_phases.iter().map(|p| p.name.clone()).collect();

    revision::record_revision(client, owner.namespace, owner.name, owner.uid, revision_number, rendered_phases).await?;

    Ok(ReleaseDescription { revision: revision_number, phase_names, object_count })
}

/// Rendered objects that apply currently needs for preflighting, without
/// running the apply itself.
pub fn render_for_preflight(renderer: &dyn Renderer, bundle_root: &Path) -> Result<Vec<serde_json::Value>> {
    let phases = renderer.render(bundle_root)?;
    Ok(phases.into_iter().flat_map(|p| p.objects.into_iter().map(|o| o.object)).collect())
}
