//! Directory-backed stores.
//!
//! ```text
//! <root>/
//!   static-v1/
//!     <sha256(url)>.entry     one JSON metadata line, then the raw body
//!   dynamic-v1/
//!     ...
//! ```
//!
//! Entries are written to a temporary file in the store directory and renamed
//! into place, so a reader sees either the previous entry or the new one.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::debug;

use super::{CacheEntry, CacheError, CacheStorage, EntryMeta};

const ENTRY_EXT: &str = "entry";

/// Durable [`CacheStorage`] rooted at a directory.
#[derive(Debug)]
pub struct DiskStorage {
    root: PathBuf,
    tmp_seq: AtomicU64,
}

impl DiskStorage {
    /// Uses `root` as the storage directory, creating it if necessary.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] if the directory cannot be created.
    pub async fn open_root(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        debug!(root = %root.display(), "disk cache ready");
        Ok(Self {
            root,
            tmp_seq: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn store_dir(&self, name: &str) -> Result<PathBuf, CacheError> {
        if name.is_empty()
            || name.starts_with('.')
            || name.contains(['/', '\\'])
        {
            return Err(CacheError::InvalidName(name.to_owned()));
        }
        Ok(self.root.join(name))
    }

    fn entry_path(&self, name: &str, url: &str) -> Result<PathBuf, CacheError> {
        Ok(self
            .store_dir(name)?
            .join(format!("{}.{ENTRY_EXT}", url_digest(url))))
    }
}

/// Hex SHA-256 of a URL, used as the entry file stem.
fn url_digest(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())
}

fn corrupt(store: &str, reason: impl Into<String>) -> CacheError {
    CacheError::Corrupt {
        store: store.to_owned(),
        reason: reason.into(),
    }
}

#[async_trait]
impl CacheStorage for DiskStorage {
    async fn open(&self, name: &str) -> Result<(), CacheError> {
        fs::create_dir_all(self.store_dir(name)?).await?;
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool, CacheError> {
        match fs::metadata(self.store_dir(name)?).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        match fs::remove_dir_all(self.store_dir(name)?).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        let mut names = Vec::new();
        let mut dir = fs::read_dir(&self.root).await?;
        while let Some(item) = dir.next_entry().await? {
            if !item.file_type().await?.is_dir() {
                continue;
            }
            if let Some(name) = item.file_name().to_str() {
                names.push(name.to_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn match_in(&self, name: &str, url: &str) -> Result<Option<CacheEntry>, CacheError> {
        let raw = match fs::read(self.entry_path(name, url)?).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let split = raw
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| corrupt(name, "missing metadata line"))?;
        let meta: EntryMeta = serde_json::from_slice(&raw[..split])
            .map_err(|e| corrupt(name, e.to_string()))?;
        let body = Bytes::copy_from_slice(&raw[split + 1..]);

        CacheEntry::from_meta(name, meta, body).map(Some)
    }

    async fn put(&self, name: &str, url: &str, entry: CacheEntry) -> Result<(), CacheError> {
        let dir = self.store_dir(name)?;
        fs::create_dir_all(&dir).await?;

        let mut raw = serde_json::to_vec(&entry.meta()).map_err(|e| corrupt(name, e.to_string()))?;
        raw.push(b'\n');
        raw.extend_from_slice(entry.body());

        let seq = self.tmp_seq.fetch_add(1, Ordering::Relaxed);
        let tmp = dir.join(format!(".tmp-{}-{seq}", std::process::id()));
        fs::write(&tmp, &raw).await?;
        if let Err(e) = fs::rename(&tmp, self.entry_path(name, url)?).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn len(&self, name: &str) -> Result<usize, CacheError> {
        let mut dir = match fs::read_dir(self.store_dir(name)?).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let mut count = 0;
        while let Some(item) = dir.next_entry().await? {
            if item.path().extension().is_some_and(|ext| ext == ENTRY_EXT) {
                count += 1;
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{Response, StatusCode};

    fn entry(body: &'static str) -> CacheEntry {
        CacheEntry::from_response(
            &Response::new(StatusCode::Ok)
                .header("Content-Type", "text/html")
                .body(body),
        )
    }

    #[tokio::test]
    async fn put_then_match_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskStorage::open_root(dir.path()).await.unwrap();
        storage.put("static-v1", "/style.css", entry("a{}")).await.unwrap();
        drop(storage);

        let reopened = DiskStorage::open_root(dir.path()).await.unwrap();
        let hit = reopened
            .match_in("static-v1", "/style.css")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit, entry("a{}"));
        assert_eq!(reopened.len("static-v1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn body_may_contain_newlines() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskStorage::open_root(dir.path()).await.unwrap();
        storage
            .put("dynamic-v1", "/", entry("<html>\n<body>\n</html>"))
            .await
            .unwrap();
        let hit = storage.match_in("dynamic-v1", "/").await.unwrap().unwrap();
        assert_eq!(hit.body().as_ref(), b"<html>\n<body>\n</html>");
    }

    #[tokio::test]
    async fn overwrite_keeps_one_entry() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskStorage::open_root(dir.path()).await.unwrap();
        storage.put("dynamic-v1", "/", entry("old")).await.unwrap();
        storage.put("dynamic-v1", "/", entry("new")).await.unwrap();
        assert_eq!(storage.len("dynamic-v1").await.unwrap(), 1);
        let hit = storage.match_in("dynamic-v1", "/").await.unwrap().unwrap();
        assert_eq!(hit.body().as_ref(), b"new");
    }

    #[tokio::test]
    async fn keys_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskStorage::open_root(dir.path()).await.unwrap();
        storage.open("static-v2").await.unwrap();
        storage.open("dynamic-v1").await.unwrap();
        assert_eq!(
            storage.keys().await.unwrap(),
            vec!["dynamic-v1".to_owned(), "static-v2".to_owned()]
        );
        assert!(storage.delete("dynamic-v1").await.unwrap());
        assert!(!storage.has("dynamic-v1").await.unwrap());
        assert!(!storage.delete("dynamic-v1").await.unwrap());
    }

    #[tokio::test]
    async fn rejects_path_like_names() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskStorage::open_root(dir.path()).await.unwrap();
        assert!(matches!(
            storage.open("../escape").await,
            Err(CacheError::InvalidName(_))
        ));
    }

    #[tokio::test]
    async fn truncated_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskStorage::open_root(dir.path()).await.unwrap();
        storage.open("static-v1").await.unwrap();
        let path = storage.entry_path("static-v1", "/x.js").unwrap();
        fs::write(&path, b"{\"status\":200").await.unwrap();
        assert!(matches!(
            storage.match_in("static-v1", "/x.js").await,
            Err(CacheError::Corrupt { .. })
        ));
    }
}
