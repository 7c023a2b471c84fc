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

//! The ClusterExtension reconciler (§4.I): resolve -> unpack -> preflight
//! -> apply, as an ordered, idempotent step sequence.

mod reconcile;

pub use reconcile::{default_renderer, error_policy, reconcile, Context, Error, FINALIZER};

use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::{watcher, Controller};
use kube::{Api, Client};
use oc_types::extension::ClusterExtension;
use tracing::warn;

/// Drives the ClusterExtension controller loop until the process is asked
/// to shut down. Each object reconciles serially; distinct objects
/// reconcile in parallel, matching the Catalog loop's dispatch model (§5).
pub async fn run(client: Client, ctx: Arc<Context>) -> anyhow::Result<()> {
    let extensions = Api::<ClusterExtension>::all(client);
    Controller::new(extensions, watcher::Config::default())
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
