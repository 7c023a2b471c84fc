//! On-start and periodic garbage collection (§4.C): anything left on disk
//! whose owning `Catalog` no longer exists is removed. A sweep never touches
//! an owner it's unsure about — listing the live set failing leaves the
//! whole sweep a no-op for that tick rather than risking a false delete.

use std::collections::HashSet;

use kube::api::ListParams;
use kube::{Api, ResourceExt};
use oc_types::catalog::ClusterCatalog;
use tracing::{info, warn};

use crate::reconcile::Context;

pub async fn sweep(ctx: &Context) {
    let live = match Api::<ClusterCatalog>::all(ctx.client.clone())
        .list(&ListParams::default())
        .await
    {
        Ok(list) => list.items.iter().map(|c| c.name_any()).collect::<HashSet<_>>(),
        Err(e) => {
            warn!(error = %e, "gc: failed to list catalogs, skipping sweep");
            return;
        }
    };

    match ctx.puller.owners().await {
        Ok(owners) => {
            for owner in owners {
                if live.contains(&owner) {
                    continue;
                }
                info!(catalog = %owner, "gc: removing orphaned unpack cache entry");
                if let Err(e) = ctx.puller.cleanup(&owner).await {
                    warn!(catalog = %owner, error = %e, "gc: failed to clean up unpack cache");
                }
            }
        }
        Err(e) => warn!(error = %e, "gc: failed to enumerate unpack cache owners"),
    }

    match ctx.store.owners().await {
        Ok(owners) => {
            for owner in owners {
                if live.contains(&owner) {
                    continue;
                }
                info!(catalog = %owner, "gc: removing orphaned catalog storage entry");
                if let Err(e) = ctx.store.delete(&owner).await {
                    warn!(catalog = %owner, error = %e, "gc: failed to clean up catalog storage");
                }
            }
        }
        Err(e) => warn!(error = %e, "gc: failed to enumerate catalog storage owners"),
    }
}
