//! Named response stores, the key-value collaborator behind the controller.
//!
//! A [`CacheStorage`] holds any number of named stores (`static-v1`,
//! `dynamic-v1`, ...). Each store maps a request URL to one immutable
//! [`CacheEntry`]; writing the same URL again replaces the whole entry.
//!
//! Two backends are provided:
//!
//! - [`MemoryStorage`] — process-local, with an optional per-store byte quota.
//! - [`DiskStorage`] — one directory per store, one file per entry.
//!
//! Stores never evict on their own. Growth is bounded only by the quota, and
//! a write that would exceed it fails with [`CacheError::QuotaExceeded`].

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::http::{Headers, Response, StatusCode};

mod disk;
mod memory;

pub use disk::DiskStorage;
pub use memory::MemoryStorage;

/// Errors surfaced by a [`CacheStorage`] backend.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("store {store} would exceed its quota of {limit} bytes")]
    QuotaExceeded { store: String, limit: usize },

    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt cache entry in {store}: {reason}")]
    Corrupt { store: String, reason: String },

    #[error("cache lock poisoned")]
    Poisoned,

    #[error("invalid store name {0:?}")]
    InvalidName(String),
}

/// Builds the versioned store name for a generation, e.g. `static-v1`.
///
/// # Examples
///
/// ```
/// assert_eq!(swcache::cache::cache_name("static", "v1"), "static-v1");
/// ```
pub fn cache_name(prefix: &str, version: &str) -> String {
    format!("{prefix}-{version}")
}

/// A captured response: status, end-to-end headers and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    status: StatusCode,
    headers: Headers,
    body: Bytes,
}

impl CacheEntry {
    /// Captures `response` for storage. The body buffer is shared, not copied.
    pub fn from_response(response: &Response) -> Self {
        Self {
            status: response.status(),
            headers: response.headers().clone(),
            body: response.body_ref().clone(),
        }
    }

    /// Rebuilds a servable response from the entry.
    pub fn to_response(&self) -> Response {
        Response::from_parts(self.status, self.headers.clone(), self.body.clone())
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Approximate stored size in bytes, used for quota accounting.
    pub fn size(&self) -> usize {
        self.body.len()
            + self
                .headers
                .iter()
                .map(|(k, v)| k.len() + v.len())
                .sum::<usize>()
    }

    fn meta(&self) -> EntryMeta {
        EntryMeta {
            status: self.status.as_u16(),
            headers: self.headers.clone(),
        }
    }

    fn from_meta(store: &str, meta: EntryMeta, body: Bytes) -> Result<Self, CacheError> {
        let status = StatusCode::from_u16(meta.status).ok_or_else(|| CacheError::Corrupt {
            store: store.to_owned(),
            reason: format!("unknown status {}", meta.status),
        })?;
        Ok(Self {
            status,
            headers: meta.headers,
            body,
        })
    }
}

// On-disk metadata line written ahead of an entry's body.
#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    status: u16,
    headers: Headers,
}

/// A set of named response stores.
///
/// Mirrors the host cache API a controller is written against: stores are
/// opened by name, listed, deleted wholesale, and read or written one URL at a
/// time. Implementations must be safe to share across tasks; concurrent writes
/// to the same URL resolve as last-write-wins.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Creates the named store if it does not exist yet.
    async fn open(&self, name: &str) -> Result<(), CacheError>;

    /// Returns `true` if the named store exists.
    async fn has(&self, name: &str) -> Result<bool, CacheError>;

    /// Deletes the named store and all of its entries. Returns `false` if it did not exist.
    async fn delete(&self, name: &str) -> Result<bool, CacheError>;

    /// Lists every store name in ascending order.
    async fn keys(&self) -> Result<Vec<String>, CacheError>;

    /// Looks up `url` in one store. A missing store is a miss.
    async fn match_in(&self, name: &str, url: &str) -> Result<Option<CacheEntry>, CacheError>;

    /// Writes `entry` under `url`, replacing any previous entry. Creates the store if needed.
    async fn put(&self, name: &str, url: &str, entry: CacheEntry) -> Result<(), CacheError>;

    /// Number of entries in the named store (zero when it does not exist).
    async fn len(&self, name: &str) -> Result<usize, CacheError>;

    /// Looks up `url` across every store, in [`keys`](Self::keys) order, and
    /// returns the first hit.
    async fn match_any(&self, url: &str) -> Result<Option<CacheEntry>, CacheError> {
        for name in self.keys().await? {
            if let Some(entry) = self.match_in(&name, url).await? {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }
}
