//! Tracking `ClusterExtensionRevision` objects for one extension: computing
//! the next revision number, recording an applied phase set, and the
//! newest-first uninstall cleanup sweep (§4.H, §4.I step 2/5).

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{DeleteParams, ListParams, ObjectMeta, PostParams};
use kube::{Api, Client, ResourceExt};
use tracing::{info, instrument};

use oc_types::revision::{validate_update, ClusterExtensionRevision, ClusterExtensionRevisionSpec, Phase};

use crate::error::{Error, Result};

/// Label carrying the owning extension's name, used to list an extension's
/// revisions without a dedicated index.
pub const EXTENSION_LABEL: &str = "olm.operatorframework.io/extension-name";

#[instrument(skip(client))]
pub async fn list_for_extension(client: &Client, namespace: &str, extension_name: &str) -> Result<Vec<ClusterExtensionRevision>> {
    let api: Api<ClusterExtensionRevision> = Api::namespaced(client.clone(), namespace);
    let lp = ListParams::default().labels(&format!("{EXTENSION_LABEL}={extension_name}"));
    let mut list = api.list(&lp).await?.items;
    list.sort_by_key(|r| r.spec.revision);
    Ok(list)
}

pub fn next_revision_number(existing: &[ClusterExtensionRevision]) -> i64 {
    existing.iter().map(|r| r.spec.revision).max().unwrap_or(0) + 1
}

/// Create (or, if present, validate-then-leave) the revision recording this
/// applied phase set. A revision is created once and never mutated again
/// once its phases are non-empty; re-running with the same inputs must be a
/// no-op rather than an error.
#[instrument(skip(client, phases))]
pub async fn record_revision(
    client: &Client,
    namespace: &str,
    extension_name: &str,
    extension_uid: &str,
    revision_number: i64,
    phases: Vec<Phase>,
) -> Result<()> {
    let api: Api<ClusterExtensionRevision> = Api::namespaced(client.clone(), namespace);
    let name = format!("{extension_name}-{revision_number}");

    let next_spec = ClusterExtensionRevisionSpec { revision: revision_number, phases };

    if let Some(existing) = api.get_opt(&name).await? {
        return validate_update(&existing.spec, &next_spec)
            .map_err(|e| Error::RevisionImmutable(revision_number, e));
    }

    let owner_reference = OwnerReference {
        api_version: "olm.operatorframework.io/v1".to_string(),
        kind: "ClusterExtension".to_string(),
        name: extension_name.to_string(),
        uid: extension_uid.to_string(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    };

    let revision = ClusterExtensionRevision {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(namespace.to_string()),
            labels: Some([(EXTENSION_LABEL.to_string(), extension_name.to_string())].into_iter().collect()),
            owner_references: Some(vec![owner_reference]),
            ..Default::default()
        },
        spec: next_spec,
    };

    api.create(&PostParams::default(), &revision).await?;
    info!(revision = revision_number, "recorded cluster extension revision");
    Ok(())
}

/// One step of the newest-first uninstall cleanup: delete the most recent
/// remaining revision and report whether deletion is fully complete.
/// Callers loop this as an `AwaitingPrecondition` step until `Done` is
/// returned — a revision that cannot be deleted (host finalizer, host
/// garbage collection) blocks the next one from starting.
pub enum CleanupProgress {
    Done,
    StillDeleting { name: String },
    Deleted { name: String },
}

#[instrument(skip(client))]
pub async fn cleanup_step(client: &Client, namespace: &str, extension_name: &str) -> Result<CleanupProgress> {
    let api: Api<ClusterExtensionRevision> = Api::namespaced(client.clone(), namespace);
    let mut existing = list_for_extension(client, namespace, extension_name).await?;
    existing.sort_by_key(|r| std::cmp::Reverse(r.spec.revision));

    let Some(newest) = existing.first() else {
        return Ok(CleanupProgress::Done);
    };
    let name = newest.name_any();

    if newest.meta().deletion_timestamp.is_some() {
        return Ok(CleanupProgress::StillDeleting { name });
    }

    api.delete(&name, &DeleteParams::default()).await?;
    Ok(CleanupProgress::Deleted { name })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn revision(n: i64) -> ClusterExtensionRevision {
        ClusterExtensionRevision {
            metadata: ObjectMeta { name: Some(format!("ext-{n}")), ..Default::default() },
            spec: ClusterExtensionRevisionSpec { revision: n, phases: vec![] },
        }
    }

    #[test]
    fn next_revision_number_starts_at_one() {
        assert_eq!(next_revision_number(&[]), 1);
    }

    #[test]
    fn next_revision_number_increments_from_max() {
        let existing = vec![revision(1), revision(3), revision(2)];
        assert_eq!(next_revision_number(&existing), 4);
    }
}
