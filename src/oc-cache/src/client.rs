use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};

use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{info, instrument, warn};

use crate::error::{Error, Result};

type Key = (String, String);

/// Per-`(catalog-name, digest)` exclusive locks: at most one in-flight
/// populate per key, mirroring `oc-image`'s per-owner unpack lock.
#[derive(Default)]
struct KeyLocks {
    inner: StdMutex<HashMap<Key, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    async fn lock(&self, key: &Key) -> OwnedMutexGuard<()> {
        let entry = {
            let mut map = self.inner.lock().expect("cache key lock map poisoned");
            map.entry(key.clone()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        entry.lock_owned().await
    }
}

/// Filesystem-backed cache of catalog content, keyed by `(catalog-name,
/// resolved-digest)`. Content is materialized as `<root>/<name>/<digest>/
/// <package>/<schema>/<name>.json`, the tree layout [`crate::fbc::load_package`]
/// reads back.
pub struct CacheClient {
    root: PathBuf,
    http: reqwest::Client,
    locks: KeyLocks,
    memo: RwLock<HashMap<Key, Result<PathBuf>>>,
}

impl CacheClient {
    pub fn new(root: impl Into<PathBuf>, http: reqwest::Client) -> Self {
        Self {
            root: root.into(),
            http,
            locks: KeyLocks::default(),
            memo: RwLock::new(HashMap::new()),
        }
    }

    fn key_dir(&self, name: &str, digest: &str) -> PathBuf {
        self.root.join(name).join(digest.replace(':', "_"))
    }

    /// `Get(name, digest)`: the cached tree root, the cached error, or
    /// `None` if this key has never been populated.
    pub async fn get(&self, name: &str, digest: &str) -> Option<Result<PathBuf>> {
        self.memo.read().await.get(&(name.to_string(), digest.to_string())).cloned()
    }

    /// `Put(name, digest, lines, error_to_cache)`: materialize `lines` (the
    /// JSON-lines body of a `/api/v1/all` response) into the tree, or record
    /// `error_to_cache` as the entry's value. A pre-existing successful entry
    /// short-circuits and discards the new input.
    pub async fn put(&self, name: &str, digest: &str, lines: &str) -> Result<PathBuf> {
        let key = (name.to_string(), digest.to_string());
        if let Some(existing @ Ok(_)) = self.get(name, digest).await {
            return existing;
        }
        let dir = self.key_dir(name, digest);
        let lines = lines.to_string();
        let result = {
            let dir = dir.clone();
            tokio::task::spawn_blocking(move || materialize(&dir, &lines))
                .await
                .map_err(|e| Error::Io(Arc::new(std::io::Error::other(e))))
                .and_then(|r| r)
                .map(|()| dir)
        };
        self.memo.write().await.insert(key, result.clone());
        result
    }

    pub async fn put_error(&self, name: &str, digest: &str, error: Error) -> Result<PathBuf> {
        let key = (name.to_string(), digest.to_string());
        if let Some(existing @ Ok(_)) = self.get(name, digest).await {
            return existing;
        }
        self.memo.write().await.insert(key, Err(error.clone()));
        Err(error)
    }

    /// `PopulateCache(catalog)`: fetch `<catalog.urls.base>/api/v1/all` and
    /// populate this key. Validates the catalog is `Serving=True` with a
    /// resolved digest first (§4.D).
    #[instrument(skip(self, catalog), fields(catalog = %catalog.name))]
    pub async fn populate_cache(&self, catalog: &CatalogRef) -> Result<PathBuf> {
        let digest = catalog.digest()?;
        let key = (catalog.name.clone(), digest.clone());

        if let Some(cached) = self.get(&catalog.name, &digest).await {
            return cached;
        }

        let _guard = self.locks.lock(&key).await;
        if let Some(cached) = self.get(&catalog.name, &digest).await {
            return cached;
        }

        let url = format!("{}/api/v1/all", catalog.base_url.trim_end_matches('/'));
        let response = match self.http.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                return self
                    .put_error(&catalog.name, &digest, Error::Transport { url, message: e.to_string() })
                    .await
            }
        };
        if !response.status().is_success() {
            let status = response.status();
            return self.put_error(&catalog.name, &digest, Error::BadStatus { url, status }).await;
        }
        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => {
                return self
                    .put_error(&catalog.name, &digest, Error::Transport { url, message: e.to_string() })
                    .await
            }
        };

        info!(bytes = body.len(), "populated catalog cache entry");
        self.put(&catalog.name, &digest, &body).await
    }
}

/// The subset of a Catalog's observed state this crate needs, decoupled from
/// `oc_types::catalog::ClusterCatalog` so this crate doesn't need a `kube`
/// dependency.
#[derive(Debug, Clone)]
pub struct CatalogRef {
    pub name: String,
    pub base_url: Option<String>,
    pub resolved_digest_ref: Option<String>,
    pub serving: bool,
}

impl CatalogRef {
    fn digest(&self) -> Result<String> {
        if !self.serving {
            return Err(Error::CatalogNotReady(self.name.clone()));
        }
        let ref_ = self
            .resolved_digest_ref
            .as_deref()
            .ok_or_else(|| Error::CatalogNotReady(self.name.clone()))?;
        self.base_url
            .as_deref()
            .ok_or_else(|| Error::CatalogNotReady(self.name.clone()))?;
        ref_
            .rsplit_once('@')
            .map(|(_, digest)| digest.to_string())
            .ok_or_else(|| Error::CatalogNotReady(self.name.clone()))
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }
}

/// Writes one newline-terminated JSON document per line of `lines` into
/// `<dir>/<package>/<schema>/<name>.json`, staged in a sibling temp
/// directory and renamed in so a concurrent reader never sees a partial
/// tree.
fn materialize(dir: &Path, lines: &str) -> Result<()> {
    let parent = dir.parent().unwrap_or(dir);
    std::fs::create_dir_all(parent)?;
    let staging = tempfile::Builder::new().prefix(".staging-").tempdir_in(parent)?;

    let mut counters: HashMap<(String, String), u32> = HashMap::new();
    let stream = serde_json::Deserializer::from_str(lines).into_iter::<Value>();
    for value in stream {
        let value = value.map_err(|e| Error::MalformedBlob {
            path: dir.to_path_buf(),
            source: Arc::new(e),
        })?;
        let Some(schema) = value.get("schema").and_then(Value::as_str) else {
            continue;
        };
        let package = value
            .get("package")
            .and_then(Value::as_str)
            .or_else(|| if schema == "olm.package" { value.get("name").and_then(Value::as_str) } else { None })
            .unwrap_or("_")
            .to_string();
        let name = value.get("name").and_then(Value::as_str).unwrap_or("_").to_string();

        let schema_dir = staging.path().join(&package).join(schema);
        std::fs::create_dir_all(&schema_dir)?;

        let counter = counters.entry((package, schema.to_string())).or_insert(0);
        let file_name = if *counter == 0 {
            format!("{name}.json")
        } else {
            format!("{name}-{counter}.json")
        };
        *counter += 1;

        let serialized = serde_json::to_vec_pretty(&value).map_err(|e| Error::MalformedBlob {
            path: dir.to_path_buf(),
            source: Arc::new(e),
        })?;
        std::fs::write(schema_dir.join(file_name), serialized)?;
    }

    // `dir` is content-addressed by digest: if another populate already won
    // the race, its content is identical and staging is simply discarded.
    match std::fs::rename(staging.path(), dir) {
        Ok(()) => Ok(()),
        Err(e) if dir.is_dir() => {
            warn!(error = %e, "materialize raced with a concurrent populate of the same key");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn materialize_groups_blobs_by_package_and_schema() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("cat").join("sha256_abc");
        let lines = concat!(
            "{\"schema\":\"olm.package\",\"name\":\"foo\"}\n",
            "{\"schema\":\"olm.channel\",\"package\":\"foo\",\"name\":\"stable\"}\n",
            "{\"schema\":\"olm.bundle\",\"package\":\"foo\",\"name\":\"foo.v1.0.0\"}\n",
        );
        materialize(&dir, lines).unwrap();
        assert!(dir.join("foo/olm.package/foo.json").is_file());
        assert!(dir.join("foo/olm.channel/stable.json").is_file());
        assert!(dir.join("foo/olm.bundle/foo.v1.0.0.json").is_file());
    }

    #[tokio::test]
    async fn get_returns_none_for_unpopulated_key() {
        let root = tempfile::tempdir().unwrap();
        let client = CacheClient::new(root.path(), reqwest::Client::new());
        assert!(client.get("cat", "sha256:abc").await.is_none());
    }

    #[tokio::test]
    async fn put_is_idempotent_after_success() {
        let root = tempfile::tempdir().unwrap();
        let client = CacheClient::new(root.path(), reqwest::Client::new());
        let lines = "{\"schema\":\"olm.package\",\"name\":\"foo\"}\n";
        let first = client.put("cat", "sha256:abc", lines).await.unwrap();
        let second = client.put("cat", "sha256:abc", "garbage that would fail to parse").await.unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn catalog_ref_requires_serving_and_digest() {
        let not_serving = CatalogRef {
            name: "cat".to_string(),
            base_url: Some("http://x".to_string()),
            resolved_digest_ref: Some("x/y@sha256:abc".to_string()),
            serving: false,
        };
        assert!(not_serving.digest().is_err());

        let ready = CatalogRef {
            name: "cat".to_string(),
            base_url: Some("http://x".to_string()),
            resolved_digest_ref: Some("x/y@sha256:abc".to_string()),
            serving: true,
        };
        assert_eq!(ready.digest().unwrap(), "sha256:abc");
    }
}
