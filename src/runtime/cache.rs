//! # Local Indexed Cache
//!
//! Point-in-time mirror of the watched resources, keyed by [`ObjectKey`].
//!
//! The cache is shared-read, single-writer: the notification bridge owns the
//! only [`CacheWriter`], workers and the resync ticker hold [`Cache`] readers.
//! Entries are replaced wholesale on every observed update, so readers always
//! see one complete snapshot of an object, never a partially applied one.

use crate::store::ObjectKey;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::watch;

type Entries<K> = Arc<RwLock<HashMap<ObjectKey, Arc<K>>>>;

/// Read handle to the cache
pub struct Cache<K> {
    entries: Entries<K>,
    synced: watch::Receiver<bool>,
}

/// Write handle to the cache, owned by the notification bridge
pub struct CacheWriter<K> {
    entries: Entries<K>,
    synced: watch::Sender<bool>,
}

impl<K> Clone for Cache<K> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            synced: self.synced.clone(),
        }
    }
}

impl<K> std::fmt::Debug for Cache<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("len", &self.len())
            .field("synced", &self.has_synced())
            .finish()
    }
}

impl<K> std::fmt::Debug for CacheWriter<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheWriter").finish_non_exhaustive()
    }
}

/// Create an empty, not yet synced cache
#[must_use]
pub fn cache<K>() -> (Cache<K>, CacheWriter<K>) {
    let entries: Entries<K> = Arc::new(RwLock::new(HashMap::new()));
    let (tx, rx) = watch::channel(false);
    (
        Cache {
            entries: Arc::clone(&entries),
            synced: rx,
        },
        CacheWriter {
            entries,
            synced: tx,
        },
    )
}

impl<K> Cache<K> {
    /// Last observed copy of an object
    pub fn get(&self, key: &ObjectKey) -> Option<Arc<K>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Every cached object
    pub fn list(&self) -> Vec<Arc<K>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Every cached key
    pub fn keys(&self) -> Vec<ObjectKey> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the first full listing has been applied
    pub fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Wait until the first full listing has been applied
    ///
    /// Returns `false` if the writer went away before the cache ever synced.
    pub async fn wait_for_sync(&self) -> bool {
        let mut rx = self.synced.clone();
        let synced = rx.wait_for(|synced| *synced).await.is_ok();
        synced
    }
}

impl<K> CacheWriter<K> {
    /// Insert or replace an entry, returning the previous one
    pub fn upsert(&self, key: ObjectKey, obj: K) -> Option<Arc<K>> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, Arc::new(obj))
    }

    /// Remove an entry, returning it
    pub fn remove(&self, key: &ObjectKey) -> Option<Arc<K>> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    pub fn get(&self, key: &ObjectKey) -> Option<Arc<K>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn keys(&self) -> Vec<ObjectKey> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Record that a full listing has been applied; idempotent
    pub fn mark_synced(&self) {
        self.synced.send_if_modified(|synced| !std::mem::replace(synced, true));
    }
}
