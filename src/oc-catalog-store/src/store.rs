use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{info, instrument};

use crate::error::{Error, Result};
use crate::index::{index_key, Index, IndexEntry};

pub(crate) struct CatalogEntry {
    pub data_path: PathBuf,
    pub index: Index,
    pub last_modified: DateTime<Utc>,
}

/// Persists one unpacked FBC per catalog name, and hands out read-locked
/// snapshots for the HTTP layer to stream from.
///
/// Readers and the final rename of a `store` both take the same per-catalog
/// lock, so a reader never observes a half-swapped `data.json`; the (I/O
/// heavy) work of re-serializing the FBC into JSON-lines happens before the
/// lock is acquired, so writers don't block readers during that phase.
pub struct CatalogStore {
    root: PathBuf,
    build_index: bool,
    catalogs: RwLock<HashMap<String, Arc<RwLock<CatalogEntry>>>>,
}

impl CatalogStore {
    pub fn new(root: impl Into<PathBuf>, build_index: bool) -> Self {
        Self {
            root: root.into(),
            build_index,
            catalogs: RwLock::new(HashMap::new()),
        }
    }

    fn catalog_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    async fn entry_for(&self, name: &str) -> Arc<RwLock<CatalogEntry>> {
        if let Some(existing) = self.catalogs.read().await.get(name) {
            return existing.clone();
        }
        self.catalogs
            .write()
            .await
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(RwLock::new(CatalogEntry {
                    data_path: PathBuf::new(),
                    index: Index::default(),
                    last_modified: DateTime::<Utc>::MIN_UTC,
                }))
            })
            .clone()
    }

    /// `Store(name, fs)`: atomically replace `name`'s content with the FBC
    /// found under `fs_root`.
    #[instrument(skip(self), fields(catalog = %name))]
    pub async fn store(&self, name: &str, fs_root: &Path) -> Result<()> {
        let dir = self.catalog_dir(name);
        tokio::fs::create_dir_all(&dir).await.map_err(Error::Io)?;

        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&dir)
            .map_err(Error::Io)?;
        let staged_data = staging.path().join("data.json");
        let index = build_data_json(fs_root, &staged_data, self.build_index).await?;

        let final_data = dir.join("data.json");

        let entry_lock = self.entry_for(name).await;
        let mut entry = entry_lock.write().await;
        tokio::fs::rename(&staged_data, &final_data)
            .await
            .map_err(Error::Io)?;
        entry.data_path = final_data;
        entry.index = index;
        entry.last_modified = Utc::now();
        info!(blobs = entry.index.0.len(), "stored catalog content");
        Ok(())
    }

    pub async fn content_exists(&self, name: &str) -> bool {
        tokio::fs::metadata(self.catalog_dir(name).join("data.json"))
            .await
            .is_ok()
    }

    /// Tolerant of `name` not existing.
    pub async fn delete(&self, name: &str) -> Result<()> {
        self.catalogs.write().await.remove(name);
        match tokio::fs::remove_dir_all(self.catalog_dir(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    pub(crate) async fn snapshot(&self, name: &str) -> Option<Arc<RwLock<CatalogEntry>>> {
        self.catalogs.read().await.get(name).cloned()
    }

    /// Names of the catalog subdirectories currently present on disk, for
    /// the garbage-collection sweep in §4.C.
    pub async fn owners(&self) -> Result<Vec<String>> {
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(Error::Io(e)),
        };
        while let Some(entry) = entries.next_entry().await.map_err(Error::Io)? {
            if let Ok(name) = entry.file_name().into_string() {
                out.push(name);
            }
        }
        Ok(out)
    }
}

/// Walk `fs_root`, concatenate every `*.json` FBC blob as newline-terminated
/// compact JSON into `dest`, and (if `build_index`) return the byte-range
/// index over `(schema, package, name)`.
async fn build_data_json(fs_root: &Path, dest: &Path, build_index: bool) -> Result<Index> {
    let fs_root = fs_root.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || build_data_json_blocking(&fs_root, &dest, build_index))
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))?
}

fn build_data_json_blocking(fs_root: &Path, dest: &Path, build_index: bool) -> Result<Index> {
    use std::io::Write;

    let mut writer = std::io::BufWriter::new(std::fs::File::create(dest).map_err(Error::Io)?);
    let mut entries = Vec::new();
    let mut offset: u64 = 0;

    let mut paths: Vec<PathBuf> = walkdir::WalkDir::new(fs_root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
        .map(|e| e.into_path())
        .collect();
    paths.sort();

    for path in paths {
        let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
        for blob in parse_json_stream(&raw, &path)? {
            let line = serde_json::to_string(&blob).map_err(|e| Error::MalformedBlob {
                path: path.clone(),
                source: e,
            })?;
            writer.write_all(line.as_bytes()).map_err(Error::Io)?;
            writer.write_all(b"\n").map_err(Error::Io)?;
            let length = line.len() as u64 + 1;

            if build_index {
                if let Some((schema, package, name)) = index_key(&blob) {
                    entries.push(IndexEntry {
                        schema,
                        package,
                        name,
                        offset,
                        length,
                    });
                }
            }
            offset += length;
        }
    }
    writer.flush().map_err(Error::Io)?;
    Ok(Index(entries))
}

/// A single FBC file may hold one JSON object, a JSON array of objects, or
/// multiple whitespace-separated JSON documents (the common textual forms
/// an FBC export tool produces).
fn parse_json_stream(raw: &str, path: &Path) -> Result<Vec<Value>> {
    let mut out = Vec::new();
    let stream = serde_json::Deserializer::from_str(raw).into_iter::<Value>();
    for value in stream {
        let value = value.map_err(|e| Error::MalformedBlob {
            path: path.to_path_buf(),
            source: e,
        })?;
        match value {
            Value::Array(items) => out.extend(items),
            other => out.push(other),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_fbc(dir: &Path, name: &str, contents: &str) {
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    #[tokio::test]
    async fn store_then_read_round_trips_blobs() {
        let fs_dir = tempfile::tempdir().unwrap();
        write_fbc(
            fs_dir.path(),
            "package.json",
            r#"{"schema":"olm.package","name":"foo"}"#,
        );
        write_fbc(
            fs_dir.path(),
            "bundles.json",
            r#"[{"schema":"olm.bundle","package":"foo","name":"foo.v1.0.0"},
                {"schema":"olm.bundle","package":"foo","name":"foo.v1.1.0"}]"#,
        );

        let store_root = tempfile::tempdir().unwrap();
        let store = CatalogStore::new(store_root.path(), true);
        store.store("c", fs_dir.path()).await.unwrap();

        assert!(store.content_exists("c").await);
        let snapshot = store.snapshot("c").await.unwrap();
        let entry = snapshot.read().await;
        assert_eq!(entry.index.0.len(), 3);
        let data = tokio::fs::read_to_string(&entry.data_path).await.unwrap();
        assert_eq!(data.lines().count(), 3);
    }

    #[tokio::test]
    async fn delete_is_tolerant_of_absence() {
        let store_root = tempfile::tempdir().unwrap();
        let store = CatalogStore::new(store_root.path(), true);
        store.delete("never-existed").await.unwrap();
    }
}
