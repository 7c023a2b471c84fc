use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kube::Client;
use oc_auth::TokenGetter;
use oc_cache::CacheClient;
use oc_controller::Context;
use oc_image::Puller;
use tracing_subscriber::EnvFilter;

/// Resolves, unpacks, preflights, and applies a single bundle install per
/// `ClusterExtension`.
#[derive(Parser, Debug)]
#[command(name = "controller")]
struct Args {
    /// Root directory for the per-extension bundle unpack cache.
    #[arg(long, default_value = "/var/cache/clusterextension-controller/unpack")]
    unpack_cache_path: PathBuf,

    /// Root directory for cached catalog content (FBC trees fetched from
    /// catalogd's HTTP API).
    #[arg(long, default_value = "/var/cache/clusterextension-controller/catalogs")]
    catalog_cache_path: PathBuf,

    /// Root directory for the per-extension aggregated pull-secret auth
    /// files (§4.F).
    #[arg(long, default_value = "/var/cache/clusterextension-controller/pull-secrets")]
    auth_cache_path: PathBuf,

    /// Namespace/name of a pull secret aggregated into every extension's
    /// pull credentials, in addition to its service account's.
    #[arg(long, value_parser = parse_namespaced_name)]
    global_pull_secret: Option<(String, String)>,

    /// Directory of trusted CAs for catalogd's HTTPS content API; watched
    /// for changes (the process restarts so the reloaded trust store takes
    /// effect).
    #[arg(long)]
    catalogd_cas_dir: Option<PathBuf>,

    /// Interval at which `--catalogd-cas-dir` is polled for changes.
    #[arg(long, value_parser = parse_duration, default_value = "1m")]
    cas_watch_interval: Duration,

    /// Enable the RBAC pre-authorization preflight.
    #[arg(long, default_value_t = false)]
    feature_preflight_permissions: bool,

    /// Requeue interval for a successfully reconciled, up-to-date extension.
    #[arg(long, value_parser = parse_duration, default_value = "10m")]
    default_requeue: Duration,
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

/// Builds the `reqwest::Client` used to fetch catalog content from
/// catalogd's HTTP(S) API, trusting every CA found in `--catalogd-cas-dir`
/// in addition to the system roots.
async fn build_cache_http_client(cas_dir: Option<&PathBuf>) -> anyhow::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if let Some(dir) = cas_dir {
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let pem = tokio::fs::read(entry.path()).await?;
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(&pem)?);
        }
    }
    Ok(builder.build()?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let args = Args::parse();

    let base_config = kube::Config::infer().await?;
    let client = Client::try_from(base_config.clone())?;

    tokio::fs::create_dir_all(&args.unpack_cache_path).await?;
    tokio::fs::create_dir_all(&args.catalog_cache_path).await?;
    tokio::fs::create_dir_all(&args.auth_cache_path).await?;

    let puller = Arc::new(Puller::new(args.unpack_cache_path));
    let http_client = build_cache_http_client(args.catalogd_cas_dir.as_ref()).await?;
    let cache = Arc::new(CacheClient::new(args.catalog_cache_path, http_client));
    let token_getter = Arc::new(TokenGetter::new(client.clone()));

    let ctx = Arc::new(Context {
        client: client.clone(),
        base_config,
        cache,
        puller,
        token_getter,
        renderer: oc_controller::default_renderer(),
        rbac_preauthorization: args.feature_preflight_permissions,
        default_requeue: args.default_requeue,
        auth_cache_dir: args.auth_cache_path,
        global_pull_secret: args.global_pull_secret,
    });

    let cas_watch_handle = args
        .catalogd_cas_dir
        .as_ref()
        .map(|dir| oc_image::spawn_ca_dir_watch(dir.clone(), args.cas_watch_interval));

    let result = oc_controller::run(client, ctx).await;
    if let Some(handle) = cas_watch_handle {
        handle.abort();
    }
    result
}
