use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kube::api::{Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Api, Client, ResourceExt};
use oci_client::client::Certificate;
use tracing::{info, warn};

use oc_catalog_store::CatalogStore;
use oc_image::{AuthContext, Puller};
use oc_types::catalog::{CatalogSource, CatalogStatus, ClusterCatalog, ResolvedImageSource, ResolvedSource};
use oc_types::condition::{reasons, types};

pub struct Context {
    pub client: Client,
    pub puller: Arc<Puller>,
    pub store: Arc<CatalogStore>,
    /// e.g. `https://catalogd.olm-system.svc`; `{base}/catalogs/{name}` is
    /// the externally advertised URL for a catalog.
    pub external_base_url: String,
    pub default_requeue: Duration,
    /// Where the pull-secret reconciler's aggregated auth file lives;
    /// read fresh on every catalog image pull (§4.F).
    pub pull_secret_auth_path: PathBuf,
    /// Extra trust roots for registry pulls, loaded once at startup from
    /// `--pull-cas-dir`.
    pub pull_extra_cas: Vec<Certificate>,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid catalog spec: {0}")]
    InvalidSpec(String),
    #[error(transparent)]
    Image(#[from] oc_image::Error),
    #[error(transparent)]
    Store(#[from] oc_catalog_store::Error),
    #[error(transparent)]
    Kube(#[from] kube::Error),
}

pub fn error_policy(catalog: Arc<ClusterCatalog>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!(catalog = %catalog.name_any(), %error, "catalog reconcile failed");
    Action::requeue(Duration::from_secs(30))
}

pub async fn reconcile(catalog: Arc<ClusterCatalog>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = catalog.name_any();
    let generation = catalog.meta().generation.unwrap_or(0);

    let CatalogSource::Image(image_source) = &catalog.spec.source;
    if let Err(msg) = image_source.validate() {
        return terminal(&ctx, &catalog, generation, "InvalidConfiguration", msg).await;
    }

    let mut auth = AuthContext::from_docker_config_file(&ctx.pull_secret_auth_path).await;
    auth.extra_root_certificates = ctx.pull_extra_cas.clone();
    let unpacked = match ctx.puller.unpack(&name, &image_source.ref_, &auth).await {
        Ok(u) => u,
        Err(e) => {
            let reconcile_err: oc_types::ReconcileError = e.into();
            return finish_with_error(&ctx, &catalog, generation, reconcile_err).await;
        }
    };

    ctx.store.store(&name, &unpacked.fs_root).await?;

    let base = format!("{}/catalogs/{}", ctx.external_base_url.trim_end_matches('/'), name);

    let original_status = catalog.status.clone().unwrap_or_default();
    let mut status = original_status.clone();
    status.resolved_source = Some(ResolvedSource {
        image: ResolvedImageSource {
            ref_: unpacked.canonical_ref.clone(),
            last_successful_poll_attempt: unpacked.unpacked_at,
        },
    });
    status.urls = Some(oc_types::catalog::CatalogUrls { base });
    status.last_unpacked = Some(unpacked.unpacked_at);

    let now = Utc::now();
    let mut changed = status.resolved_source != original_status.resolved_source
        || status.urls != original_status.urls
        || status.last_unpacked != original_status.last_unpacked;
    changed |= status.conditions.set(
        types::SERVING,
        oc_types::condition::ConditionStatus::True,
        reasons::AVAILABLE,
        "the catalog's content is being served",
        generation,
        now,
    );
    changed |= status.conditions.set(
        types::PROGRESSING,
        oc_types::condition::ConditionStatus::False,
        reasons::SUCCEEDED,
        "the catalog is up to date",
        generation,
        now,
    );

    if changed {
        patch_status(&ctx.client, &name, &status).await?;
    }
    info!(catalog = %name, digest = %unpacked.canonical_ref, "catalog reconciled");

    let requeue = if image_source.is_digest_pinned() {
        Action::await_change()
    } else {
        let interval = image_source
            .poll_interval_seconds
            .map(Duration::from_secs)
            .unwrap_or(ctx.default_requeue);
        Action::requeue(interval)
    };
    Ok(requeue)
}

async fn terminal(
    ctx: &Arc<Context>,
    catalog: &ClusterCatalog,
    generation: i64,
    reason: &str,
    message: String,
) -> Result<Action, Error> {
    finish_with_error(
        ctx,
        catalog,
        generation,
        oc_types::ReconcileError::terminal(reason, message),
    )
    .await
}

async fn finish_with_error(
    ctx: &Arc<Context>,
    catalog: &ClusterCatalog,
    generation: i64,
    error: oc_types::ReconcileError,
) -> Result<Action, Error> {
    let name = catalog.name_any();
    let mut status = catalog.status.clone().unwrap_or_default();
    let now = Utc::now();

    // §4.C: never clear `Serving=True` on a failed unpack; the previous
    // successfully-served content stays live until a later reconcile
    // replaces it.
    let mut changed = false;
    if !status.conditions.is_true(types::SERVING) {
        changed |= status.conditions.set(
            types::SERVING,
            oc_types::condition::ConditionStatus::False,
            reasons::UNAVAILABLE,
            error.message.clone(),
            generation,
            now,
        );
    }

    let (progressing_status, progressing_reason) = match error.terminality {
        oc_types::Terminality::Terminal => (oc_types::condition::ConditionStatus::False, error.reason.clone()),
        _ => (oc_types::condition::ConditionStatus::True, reasons::RETRYING.to_string()),
    };
    changed |= status.conditions.set(
        types::PROGRESSING,
        progressing_status,
        &progressing_reason,
        error.message.clone(),
        generation,
        now,
    );

    if changed {
        patch_status(&ctx.client, &name, &status).await?;
    }

    match error.terminality {
        oc_types::Terminality::Terminal => Ok(Action::await_change()),
        _ => Ok(Action::requeue(Duration::from_secs(30))),
    }
}

async fn patch_status(client: &Client, name: &str, status: &CatalogStatus) -> Result<(), Error> {
    let api: Api<ClusterCatalog> = Api::all(client.clone());
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::default(), &Patch::Merge(patch))
        .await?;
    Ok(())
}
