use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kube::api::{Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Api, Client, ResourceExt};
use tracing::{info, warn};

use oc_apply::{ManifestDirRenderer, Owner, Renderer};
use oc_auth::{PullSecretReconciler, TokenGetter};
use oc_cache::CacheClient;
use oc_image::{AuthContext, Puller};
use oc_resolve::{CatalogSource as ResolveCatalogSource, ResolveRequest};
use oc_types::catalog::ClusterCatalog;
use oc_types::condition::{reasons, types, ConditionStatus};
use oc_types::extension::{ClusterExtension, ClusterExtensionStatus, ExtensionSource, InstalledBundle, InstalledBundleRef, ResolvedBundleRef, SYNTHETIC_USER};
use oc_types::{ReconcileError, Terminality};

pub const FINALIZER: &str = "olm.operatorframework.io/extension-cleanup";

pub struct Context {
    pub client: Client,
    /// The config the default `client` was built from; cloned and mutated
    /// per-extension to build impersonated/token-bearing clients (§4.F).
    pub base_config: kube::config::Config,
    pub cache: Arc<CacheClient>,
    pub puller: Arc<Puller>,
    pub token_getter: Arc<TokenGetter>,
    pub renderer: Arc<dyn Renderer>,
    /// Set when the RBAC pre-authorization preflight is enabled.
    pub rbac_preauthorization: bool,
    pub default_requeue: Duration,
    /// Root directory for the per (namespace, service account) aggregated
    /// pull-secret auth files (§4.F).
    pub auth_cache_dir: PathBuf,
    /// Namespace/name of a pull secret aggregated into every extension's
    /// pull credentials, in addition to its service account's.
    pub global_pull_secret: Option<(String, String)>,
}

/// Aggregates the extension's service-account pull secrets (plus the global
/// pull secret, if configured) into that extension's auth file, then reads
/// it back. The synthetic user has no backing `ServiceAccount` to look up
/// `imagePullSecrets` for, so only the global secret applies to it.
async fn extension_auth_context(ctx: &Context, extension: &ClusterExtension) -> AuthContext {
    let sa_name = &extension.spec.service_account.name;
    let service_account = (sa_name != SYNTHETIC_USER).then(|| (extension.spec.namespace.clone(), sa_name.clone()));

    if ctx.global_pull_secret.is_none() && service_account.is_none() {
        return AuthContext::anonymous();
    }

    let auth_path = ctx.auth_cache_dir.join(format!("{}-{}.json", extension.spec.namespace, sa_name));
    let reconciler = PullSecretReconciler::new(ctx.client.clone(), auth_path.clone());
    let global_ref = ctx.global_pull_secret.as_ref().map(|(ns, n)| (ns.as_str(), n.as_str()));
    let sa_ref = service_account.as_ref().map(|(ns, n)| (ns.as_str(), n.as_str()));
    if let Err(e) = reconciler.sync(global_ref, sa_ref).await {
        warn!(extension = %extension.name_any(), error = %e, "pull secret sync failed, pulling with previously aggregated credentials if any");
    }
    AuthContext::from_docker_config_file(&auth_path).await
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Kube(#[from] kube::Error),
    #[error(transparent)]
    Auth(#[from] oc_auth::Error),
    #[error(transparent)]
    Apply(#[from] oc_apply::Error),
}

pub fn error_policy(extension: Arc<ClusterExtension>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!(extension = %extension.name_any(), %error, "extension reconcile failed");
    Action::requeue(Duration::from_secs(30))
}

#[allow(clippy::unnecessary_unwrap)]
pub async fn reconcile(extension: Arc<ClusterExtension>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = extension.name_any();
    let generation = extension.meta().generation.unwrap_or(0);

    // 1. HandleFinalizers.
    if extension.meta().deletion_timestamp.is_some() {
        return handle_deletion(&ctx, &extension).await;
    }
    ensure_finalizer(&ctx.client, &name).await?;

    // 2. RetrieveRevisionStates. Whether a revision has ever been recorded
    // is consulted below, together with the resolved version, to decide
    // whether steps 4/5 need to run at all.
    let revisions = oc_apply::revision::list_for_extension(&ctx.client, &extension.spec.namespace, &name).await?;
    let installed_version = extension
        .status
        .as_ref()
        .and_then(|s| s.installed.as_ref())
        .and_then(|i| semver::Version::parse(&i.bundle.version).ok());

    // 3. ResolveBundle.
    let ExtensionSource::Catalog(source) = &extension.spec.source;
    let version_req = match source.version_req() {
        Ok(req) => req,
        Err(e) => {
            return terminal(&ctx, &extension, generation, "InvalidConfiguration", e.to_string()).await;
        }
    };
    let catalogs = match serving_catalogs(&ctx.client).await {
        Ok(c) => c,
        Err(e) => return Err(e.into()),
    };
    let request = ResolveRequest {
        package_name: source.package_name.clone(),
        version_req,
        channels: source.channels.clone(),
        policy: source.upgrade_constraint_policy,
        installed_version,
    };
    let resolved = match oc_resolve::resolve(&catalogs, &ctx.cache, &request).await {
        Ok(resolved) => resolved,
        Err(e) => return finish_with_error(&ctx, &extension, generation, e).await,
    };

    let original_status = extension.status.clone().unwrap_or_default();
    let mut status = original_status.clone();
    status.resolution = Some(ResolvedBundleRef {
        catalog: resolved.catalog_name.clone(),
        package: resolved.package_name.clone(),
        version: resolved.version.to_string(),
        image_ref: resolved.image_ref.clone(),
    });

    // Nothing to do: the resolved version is already installed and at least
    // one revision has been recorded for it. Steps 4/5 (unpack, apply) are
    // skipped entirely rather than minting a new ClusterExtensionRevision on
    // every poll of an unchanged extension (§8, §4.I).
    let up_to_date = !revisions.is_empty() && installed_version.as_ref() == Some(&resolved.version);

    let release = if up_to_date {
        None
    } else {
        // 4. UnpackBundle, keyed by the extension's name.
        let auth = extension_auth_context(&ctx, &extension).await;
        let unpacked = match ctx.puller.unpack(&name, &resolved.image_ref, &auth).await {
            Ok(u) => u,
            Err(e) => {
                let reconcile_err: ReconcileError = e.into();
                return finish_with_error(&ctx, &extension, generation, reconcile_err).await;
            }
        };

        // 5. ApplyBundle: preflights in the extension's auth context, then apply.
        let auth_client = match oc_auth::client_for_extension(
            ctx.base_config.clone(),
            &ctx.token_getter,
            &name,
            &extension.spec.namespace,
            &extension.spec.service_account.name,
        )
        .await
        {
            Ok(client) => client,
            Err(e) => {
                let reconcile_err: ReconcileError = ReconcileError::transient("InvalidConfiguration", e);
                return finish_with_error(&ctx, &extension, generation, reconcile_err).await;
            }
        };

        let rendered = match oc_apply::render_for_preflight(ctx.renderer.as_ref(), &unpacked.fs_root) {
            Ok(rendered) => rendered,
            Err(e) => {
                let reconcile_err: ReconcileError = e.into();
                return finish_with_error(&ctx, &extension, generation, reconcile_err).await;
            }
        };

        let rbac_identity = if ctx.rbac_preauthorization {
            Some(oc_preflight::Identity {
                username: format!("system:serviceaccount:{}:{}", extension.spec.namespace, extension.spec.service_account.name),
                groups: vec![],
            })
        } else {
            None
        };
        if let Err(e) = oc_preflight::run(&auth_client, &rendered, rbac_identity.as_ref()).await {
            let reconcile_err: ReconcileError = e.into();
            return finish_with_error(&ctx, &extension, generation, reconcile_err).await;
        }

        let extension_uid = extension.uid().unwrap_or_default();
        let owner = Owner { name: &name, uid: &extension_uid, namespace: &extension.spec.namespace };
        match oc_apply::apply(&auth_client, ctx.renderer.as_ref(), &unpacked.fs_root, &owner).await {
            Ok(release) => Some(release),
            Err(e) => {
                let reconcile_err: ReconcileError = e.into();
                return finish_with_error(&ctx, &extension, generation, reconcile_err).await;
            }
        }
    };

    status.installed = Some(InstalledBundle {
        bundle: InstalledBundleRef { name: resolved.name.clone(), version: resolved.version.to_string() },
    });

    let now = Utc::now();
    let mut changed = status.resolution != original_status.resolution || status.installed != original_status.installed;
    changed |= status.conditions.set(types::INSTALLED, ConditionStatus::True, reasons::SUCCEEDED, format!("installed bundle {} ({})", resolved.name, resolved.version), generation, now);
    changed |= status.conditions.set(types::PROGRESSING, ConditionStatus::False, reasons::SUCCEEDED, "up to date", generation, now);
    changed |= set_deprecation_conditions(&mut status, &resolved, generation, now);

    if changed {
        patch_status(&ctx.client, &name, &status).await?;
    }
    match &release {
        Some(release) => info!(extension = %name, revision = release.revision, objects = release.object_count, "extension reconciled"),
        None => info!(extension = %name, "extension already up to date, no host writes"),
    }

    Ok(Action::requeue(ctx.default_requeue))
}

/// Returns whether any condition actually changed.
fn set_deprecation_conditions(
    status: &mut ClusterExtensionStatus,
    resolved: &oc_types::bundle::ResolvedBundle,
    generation: i64,
    now: chrono::DateTime<Utc>,
) -> bool {
    use oc_types::bundle::DeprecationScope;
    let scoped = |scope: DeprecationScope| resolved.deprecations.iter().find(|d| d.scope == scope);

    let overall = if resolved.is_deprecated() { ConditionStatus::True } else { ConditionStatus::False };
    let mut changed = status.conditions.set(types::DEPRECATED, overall, reasons::AVAILABLE, summarize(&resolved.deprecations), generation, now);

    for (cond_type, scope) in [
        (types::PACKAGE_DEPRECATED, DeprecationScope::Package),
        (types::CHANNEL_DEPRECATED, DeprecationScope::Channel),
        (types::BUNDLE_DEPRECATED, DeprecationScope::Bundle),
    ] {
        changed |= match scoped(scope) {
            Some(notice) => status.conditions.set(cond_type, ConditionStatus::True, reasons::AVAILABLE, notice.message.clone(), generation, now),
            None => status.conditions.set(cond_type, ConditionStatus::False, reasons::AVAILABLE, "not deprecated", generation, now),
        };
    }
    changed
}

fn summarize(notices: &[oc_types::bundle::DeprecationNotice]) -> String {
    if notices.is_empty() {
        "not deprecated".to_string()
    } else {
        notices.iter().map(|n| n.message.as_str()).collect::<Vec<_>>().join("; ")
    }
}

async fn serving_catalogs(client: &Client) -> Result<Vec<ResolveCatalogSource>, kube::Error> {
    let api: Api<ClusterCatalog> = Api::all(client.clone());
    let list = api.list(&kube::api::ListParams::default()).await?;
    Ok(list
        .items
        .into_iter()
        .filter(|c| c.status.as_ref().map(|s| s.conditions.is_true(types::SERVING)).unwrap_or(false))
        .filter_map(|c| {
            let status = c.status?;
            let urls = status.urls?;
            let resolved = status.resolved_source?;
            Some(ResolveCatalogSource {
                name: c.metadata.name?,
                priority: c.spec.priority,
                base_url: urls.base,
                resolved_digest_ref: resolved.image.ref_,
            })
        })
        .collect())
}

async fn ensure_finalizer(client: &Client, name: &str) -> Result<(), kube::Error> {
    let api: Api<ClusterExtension> = Api::all(client.clone());
    let existing = api.get(name).await?;
    if existing.finalizers().iter().any(|f| f == FINALIZER) {
        return Ok(());
    }
    let mut finalizers = existing.finalizers().to_vec();
    finalizers.push(FINALIZER.to_string());
    let patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });
    api.patch(name, &PatchParams::default(), &Patch::Merge(patch)).await?;
    Ok(())
}

async fn remove_finalizer(client: &Client, name: &str) -> Result<(), kube::Error> {
    let api: Api<ClusterExtension> = Api::all(client.clone());
    let existing = api.get(name).await?;
    let finalizers: Vec<String> = existing.finalizers().iter().filter(|f| f.as_str() != FINALIZER).cloned().collect();
    let patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });
    api.patch(name, &PatchParams::default(), &Patch::Merge(patch)).await?;
    Ok(())
}

/// Newest-first revision cleanup, one step per reconcile so a stuck
/// deletion doesn't block the controller loop (§4.H, §5 cancellation).
async fn handle_deletion(ctx: &Arc<Context>, extension: &ClusterExtension) -> Result<Action, Error> {
    let name = extension.name_any();
    if !extension.finalizers().iter().any(|f| f == FINALIZER) {
        return Ok(Action::await_change());
    }

    match oc_apply::revision::cleanup_step(&ctx.client, &extension.spec.namespace, &name).await? {
        oc_apply::CleanupProgress::Done => {
            remove_finalizer(&ctx.client, &name).await?;
            info!(extension = %name, "uninstall cleanup complete");
            Ok(Action::await_change())
        }
        oc_apply::CleanupProgress::Deleted { name: revision } | oc_apply::CleanupProgress::StillDeleting { name: revision } => {
            info!(extension = %name, revision, "waiting on revision garbage collection");
            Ok(Action::requeue(Duration::from_secs(5)))
        }
    }
}

async fn terminal(ctx: &Arc<Context>, extension: &ClusterExtension, generation: i64, reason: &str, message: String) -> Result<Action, Error> {
    finish_with_error(ctx, extension, generation, ReconcileError::terminal(reason, message)).await
}

async fn finish_with_error(ctx: &Arc<Context>, extension: &ClusterExtension, generation: i64, error: ReconcileError) -> Result<Action, Error> {
    let name = extension.name_any();
    let mut status = extension.status.clone().unwrap_or_default();
    let now = Utc::now();

    let (progressing_status, progressing_reason) = match error.terminality {
        Terminality::Terminal => (ConditionStatus::False, error.reason.clone()),
        _ => (ConditionStatus::True, reasons::RETRYING.to_string()),
    };
    let changed = status.conditions.set(types::PROGRESSING, progressing_status, &progressing_reason, error.message.clone(), generation, now);

    if changed {
        patch_status(&ctx.client, &name, &status).await?;
    }

    match error.terminality {
        Terminality::Terminal => Ok(Action::await_change()),
        Terminality::AwaitingPrecondition => Ok(Action::requeue(Duration::from_secs(5))),
        Terminality::Transient => Ok(Action::requeue(Duration::from_secs(30))),
    }
}

async fn patch_status(client: &Client, name: &str, status: &ClusterExtensionStatus) -> Result<(), kube::Error> {
    let api: Api<ClusterExtension> = Api::all(client.clone());
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::default(), &Patch::Merge(patch)).await?;
    Ok(())
}

/// Used by the binary to build the default reference renderer.
pub fn default_renderer() -> Arc<dyn Renderer> {
    Arc::new(ManifestDirRenderer)
}
