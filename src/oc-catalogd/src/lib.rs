// BEGIN LINT CONFIG
// DO NOT EDIT. Automatically generated by bin/gen-lints.
#![allow(unknown_lints)]
#![allow(clippy::style)]
#![allow(clippy::complexity)]
#![warn(clippy::bool_comparison)]
#![warn(clippy::clone_on_ref_ptr)]
#![warn(clippy::todo)]
#![warn(clippy::unwrap_used)]
// END LINT CONFIG

//! The Catalog reconciler (§4.C): unpack → store → publish URLs → update
//! status, in that order. Readers of the HTTP API only ever observe
//! `Serving=True` after a `Store` call has completed.

pub mod gc;
mod reconcile;

pub use reconcile::{error_policy, reconcile, Context, Error};

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::runtime::{watcher, Controller};
use kube::{Api, Client};
use oc_types::catalog::ClusterCatalog;
use tracing::warn;

/// Drives the Catalog controller loop until the process is asked to shut
/// down. Each object is reconciled serially; distinct objects reconcile in
/// parallel, matching the host's watch-based dispatch model (§5).
pub async fn run(client: Client, ctx: Arc<Context>) -> anyhow::Result<()> {
    let catalogs = Api::<ClusterCatalog>::all(client);
    Controller::new(catalogs, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile::reconcile, reconcile::error_policy, ctx)
        .for_each(|res| async move {
            if let Err(e) = res {
                warn!(error = %e, "reconcile failed");
            }
        })
        .await;
    Ok(())
}

/// Spawns the periodic (~12h) unpack-cache / storage garbage collection
/// sweep described in §4.C, in addition to the on-start sweep.
pub fn spawn_gc_loop(ctx: Arc<Context>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        gc::sweep(&ctx).await;
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            gc::sweep(&ctx).await;
        }
    })
}

/// Keeps the aggregated pull-secret auth file (§4.F) current by re-running
/// `PullSecretReconciler::sync` on a fixed interval. `ClusterCatalog` has no
/// per-catalog service account to layer in, so the global pull secret is
/// the only source.
pub fn spawn_pull_secret_loop(
    reconciler: Arc<oc_auth::PullSecretReconciler>,
    global_pull_secret: Option<(String, String)>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let global_pull_secret = global_pull_secret.as_ref().map(|(ns, name)| (ns.as_str(), name.as_str()));
        loop {
            if let Err(e) = reconciler.sync(global_pull_secret, None).await {
                warn!(error = %e, "pull secret sync failed, auth file left unchanged");
            }
            tokio::time::sleep(interval).await;
        }
    })
}
