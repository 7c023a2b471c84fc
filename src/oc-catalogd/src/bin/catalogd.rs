use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum_server::tls_rustls::RustlsConfig;
use clap::Parser;
use kube::Client;
use oc_auth::PullSecretReconciler;
use oc_catalog_store::CatalogStore;
use oc_catalogd::Context;
use oc_image::Puller;
use tracing_subscriber::EnvFilter;

/// Unpacks `ClusterCatalog` images and serves their content over HTTP.
#[derive(Parser, Debug)]
#[command(name = "catalogd")]
struct Args {
    /// Root directory for the unpack cache and persisted catalog content.
    #[arg(long, default_value = "/var/cache/catalogd")]
    cache_path: PathBuf,

    /// Address the catalog content HTTP API listens on.
    #[arg(long, default_value = "0.0.0.0:8443")]
    catalogs_server_addr: String,

    /// Base URL other components use to reach this catalogd, e.g.
    /// `https://catalogd-service.olmv1-system.svc`.
    #[arg(long)]
    external_address: String,

    #[arg(long)]
    tls_cert: Option<PathBuf>,
    #[arg(long)]
    tls_key: Option<PathBuf>,
    /// `Modern` or `Intermediate`, mirroring the host's TLS profile names.
    #[arg(long, default_value = "Intermediate")]
    tls_profile: String,

    /// Namespace/name of a `kubernetes.io/dockerconfigjson` secret aggregated
    /// into every pull's credentials, in addition to per-catalog secrets.
    #[arg(long, value_parser = parse_namespaced_name)]
    global_pull_secret: Option<(String, String)>,

    /// Directory of trusted CAs for registry pulls; watched for changes
    /// (the process restarts so the reloaded trust store takes effect).
    #[arg(long)]
    pull_cas_dir: Option<PathBuf>,

    /// Interval between unpack-cache / storage garbage-collection sweeps.
    #[arg(long, value_parser = parse_duration, default_value = "12h")]
    gc_interval: Duration,

    /// Interval between pull-secret re-aggregation sweeps.
    #[arg(long, value_parser = parse_duration, default_value = "2m")]
    pull_secret_sync_interval: Duration,

    /// Interval at which `--pull-cas-dir` is polled for changes.
    #[arg(long, value_parser = parse_duration, default_value = "1m")]
    cas_watch_interval: Duration,
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let (value, unit) = s.split_at(s.len() - 1);
    let value: u64 = value.parse().map_err(|_| format!("invalid duration: {s}"))?;
    match unit {
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        _ => Err(format!("invalid duration unit in {s}, expected one of s/m/h")),
    }
}

/// Parses `<namespace>/<name>`.
fn parse_namespaced_name(s: &str) -> Result<(String, String), String> {
    let (ns, name) = s
        .split_once('/')
        .ok_or_else(|| format!("expected <namespace>/<name>, got {s:?}"))?;
    Ok((ns.to_string(), name.to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let args = Args::parse();
    if args.tls_cert.is_some() != args.tls_key.is_some() {
        anyhow::bail!("--tls-cert and --tls-key must be set together");
    }

    let client = Client::try_default().await?;

    let unpack_root = args.cache_path.join("unpack");
    let storage_root = args.cache_path.join("catalogs");
    tokio::fs::create_dir_all(&unpack_root).await?;
    tokio::fs::create_dir_all(&storage_root).await?;

    let puller = Arc::new(Puller::new(unpack_root));
    let store = Arc::new(CatalogStore::new(storage_root, true));

    let pull_extra_cas = match &args.pull_cas_dir {
        Some(dir) => {
            oc_image::AuthContext::anonymous()
                .with_extra_cas_from_dir(dir)
                .await?
                .extra_root_certificates
        }
        None => Vec::new(),
    };
    let pull_secret_auth_path = std::env::temp_dir().join(format!("operator-controller-global-pull-secrets-{}.json", std::process::id()));

    let ctx = Arc::new(Context {
        client: client.clone(),
        puller,
        store: store.clone(),
        external_base_url: args.external_address,
        default_requeue: Duration::from_secs(600),
        pull_secret_auth_path: pull_secret_auth_path.clone(),
        pull_extra_cas,
    });

    let gc_handle = oc_catalogd::spawn_gc_loop(ctx.clone(), args.gc_interval);

    let pull_secret_reconciler = Arc::new(PullSecretReconciler::new(client.clone(), pull_secret_auth_path));
    let pull_secret_handle = oc_catalogd::spawn_pull_secret_loop(pull_secret_reconciler, args.global_pull_secret, args.pull_secret_sync_interval);

    let cas_watch_handle = args
        .pull_cas_dir
        .as_ref()
        .map(|dir| oc_image::spawn_ca_dir_watch(dir.clone(), args.cas_watch_interval));

    let app = oc_catalog_store::router(store);
    let addr: std::net::SocketAddr = args.catalogs_server_addr.parse()?;

    let http_server: std::pin::Pin<Box<dyn std::future::Future<Output = std::io::Result<()>> + Send>> = match (args.tls_cert, args.tls_key) {
        (Some(cert), Some(key)) => {
            let tls_config = RustlsConfig::from_pem_file(cert, key).await?;
            Box::pin(async move { axum_server::bind_rustls(addr, tls_config).serve(app.into_make_service()).await })
        }
        _ => {
            let listener = tokio::net::TcpListener::bind(addr).await?;
            Box::pin(async move { axum::serve(listener, app).await })
        }
    };

    tokio::select! {
        res = oc_catalogd::run(client, ctx) => res?,
        res = http_server => res?,
    }
    gc_handle.abort();
    pull_secret_handle.abort();
    if let Some(handle) = cas_watch_handle {
        handle.abort();
    }
    Ok(())
}
