use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex as StdMutex;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{Error, Result};

/// Name of the sidecar file recording `unpacked_at`. Written before the
/// tree is locked down so it can be read back without a write-unlock.
const UNPACKED_AT_FILE: &str = ".unpacked-at";

/// Per-owner exclusive locks, so two `unpack` calls for the same owner (but
/// possibly different digests) can't interleave their "already exists"
/// check with a concurrent writer. Calls for distinct owners proceed fully
/// in parallel.
#[derive(Default)]
pub struct OwnerLocks {
    inner: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl OwnerLocks {
    pub async fn lock(&self, owner: &str) -> OwnedMutexGuard<()> {
        let entry = {
            let mut map = self.inner.lock().expect("owner lock map poisoned");
            map.entry(owner.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        entry.lock_owned().await
    }
}

pub async fn write_unpacked_at(target: &Path, t: DateTime<Utc>) -> Result<()> {
    tokio::fs::write(target.join(UNPACKED_AT_FILE), t.to_rfc3339())
        .await
        .map_err(Error::Io)
}

pub async fn read_unpacked_at(target: &Path) -> Result<DateTime<Utc>> {
    let raw = tokio::fs::read_to_string(target.join(UNPACKED_AT_FILE))
        .await
        .map_err(Error::Io)?;
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::ManifestParse(format!("corrupt unpack timestamp: {e}")))
}

/// Walk `root` and set directories to 0500, regular files to 0400. Symlinks
/// are left untouched and never chased.
pub async fn lock_down_tree(root: &Path) -> Result<()> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || lock_down_tree_blocking(&root))
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))?
}

#[cfg(unix)]
fn lock_down_tree_blocking(root: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    for entry in walkdir::WalkDir::new(root).contents_first(true) {
        let entry = entry.map_err(|e| Error::Io(std::io::Error::other(e)))?;
        let file_type = entry.file_type();
        if file_type.is_symlink() {
            continue;
        }
        let mode = if file_type.is_dir() { 0o500 } else { 0o400 };
        let perms = std::fs::Permissions::from_mode(mode);
        std::fs::set_permissions(entry.path(), perms).map_err(Error::Io)?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn lock_down_tree_blocking(_root: &Path) -> Result<()> {
    Ok(())
}

/// `chmod` the subtree writable, then remove it recursively. Tolerant of a
/// missing path.
pub async fn remove_writable(path: &Path) -> Result<()> {
    if tokio::fs::metadata(path).await.is_err() {
        return Ok(());
    }
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || remove_writable_blocking(&owned))
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))?
}

#[cfg(unix)]
fn remove_writable_blocking(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    if !path.exists() {
        return Ok(());
    }
    for entry in walkdir::WalkDir::new(path) {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        if entry.file_type().is_symlink() {
            continue;
        }
        let mode = if entry.file_type().is_dir() { 0o700 } else { 0o600 };
        let _ = std::fs::set_permissions(entry.path(), std::fs::Permissions::from_mode(mode));
    }
    std::fs::remove_dir_all(path).map_err(Error::Io)
}

#[cfg(not(unix))]
fn remove_writable_blocking(path: &Path) -> Result<()> {
    if path.is_dir() {
        std::fs::remove_dir_all(path).map_err(Error::Io)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn owner_locks_serialize_same_owner() {
        let locks = OwnerLocks::default();
        let _g1 = locks.lock("catalog-a").await;
        // A second lock attempt for a *different* owner must not block on
        // the first; this mirrors "concurrent readers/writers across
        // owners proceed in parallel".
        let g2 = tokio::time::timeout(std::time::Duration::from_millis(50), locks.lock("catalog-b")).await;
        assert!(g2.is_ok());
    }

    #[tokio::test]
    async fn remove_writable_tolerates_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        remove_writable(&missing).await.unwrap();
    }
}
