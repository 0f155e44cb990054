use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;

use super::{CacheEntry, CacheError, CacheStorage};

#[derive(Debug, Default)]
struct Store {
    entries: HashMap<String, CacheEntry>,
    bytes: usize,
}

/// In-process [`CacheStorage`].
///
/// Store names are kept ordered so [`CacheStorage::keys`] and
/// [`CacheStorage::match_any`] are deterministic. An optional quota caps the
/// bytes held by each individual store.
///
/// # Examples
///
/// ```
/// use swcache::cache::{CacheStorage, MemoryStorage};
///
/// # #[tokio::main] async fn main() {
/// let storage = MemoryStorage::new();
/// storage.open("static-v1").await.unwrap();
/// assert_eq!(storage.keys().await.unwrap(), vec!["static-v1".to_owned()]);
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MemoryStorage {
    stores: RwLock<BTreeMap<String, Store>>,
    max_store_bytes: Option<usize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps every store at `limit` bytes (see [`CacheEntry::size`]).
    pub fn with_quota(limit: usize) -> Self {
        Self {
            stores: RwLock::default(),
            max_store_bytes: Some(limit),
        }
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn open(&self, name: &str) -> Result<(), CacheError> {
        let mut stores = self.stores.write().map_err(|_| CacheError::Poisoned)?;
        stores.entry(name.to_owned()).or_default();
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool, CacheError> {
        let stores = self.stores.read().map_err(|_| CacheError::Poisoned)?;
        Ok(stores.contains_key(name))
    }

    async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        let mut stores = self.stores.write().map_err(|_| CacheError::Poisoned)?;
        Ok(stores.remove(name).is_some())
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        let stores = self.stores.read().map_err(|_| CacheError::Poisoned)?;
        Ok(stores.keys().cloned().collect())
    }

    async fn match_in(&self, name: &str, url: &str) -> Result<Option<CacheEntry>, CacheError> {
        let stores = self.stores.read().map_err(|_| CacheError::Poisoned)?;
        Ok(stores
            .get(name)
            .and_then(|store| store.entries.get(url))
            .cloned())
    }

    async fn put(&self, name: &str, url: &str, entry: CacheEntry) -> Result<(), CacheError> {
        let mut stores = self.stores.write().map_err(|_| CacheError::Poisoned)?;

        // A rejected write must not leave a new, empty store behind.
        let (held, replaced) = stores.get(name).map_or((0, 0), |store| {
            (store.bytes, store.entries.get(url).map_or(0, CacheEntry::size))
        });
        let projected = held - replaced + entry.size();
        if let Some(limit) = self.max_store_bytes.filter(|&limit| projected > limit) {
            return Err(CacheError::QuotaExceeded {
                store: name.to_owned(),
                limit,
            });
        }

        let store = stores.entry(name.to_owned()).or_default();
        store.bytes = projected;
        store.entries.insert(url.to_owned(), entry);
        Ok(())
    }

    async fn len(&self, name: &str) -> Result<usize, CacheError> {
        let stores = self.stores.read().map_err(|_| CacheError::Poisoned)?;
        Ok(stores.get(name).map_or(0, |store| store.entries.len()))
    }
}
