//! # Object Store
//!
//! The external, authoritative resource store as seen by the controller.
//!
//! Everything the controller does against the API server goes through the
//! [`ObjectStore`] trait so the runtime, the lifecycle logic and the tests
//! share one seam:
//!
//! - [`KubeStore`] talks to a real cluster through `kube::Api`
//! - [`MemoryStore`] is an in-process store with the same semantics
//!   (optimistic concurrency, finalizer-deferred deletion, watch feed)

mod kube_store;
mod memory;

pub use self::kube_store::KubeStore;
pub use self::memory::{Journal, JournalEntry, MemoryStore, Op};

use kube::{Resource, ResourceExt};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt;
use thiserror::Error;

/// Stable identifier of a watched object: `(namespace, name)` or `(name)` when cluster scoped
///
/// Used as cache key and as work queue item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    /// Key of a cluster scoped object
    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    /// Key of a namespaced object
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// Extract the key of an object
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::MissingName`] when the object carries no name
    /// (for example a notification for a partially populated object).
    pub fn from_resource<K: Resource>(obj: &K) -> Result<Self, KeyError> {
        let meta = obj.meta();
        match meta.name.as_deref() {
            Some(name) if !name.is_empty() => Ok(Self {
                namespace: meta.namespace.clone(),
                name: name.to_string(),
            }),
            _ => Err(KeyError::MissingName),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Failure to derive an [`ObjectKey`] from an object
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("object has no metadata.name")]
    MissingName,
}

/// Errors returned by the external store
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error("conflict writing {0}: the object has been modified")]
    Conflict(String),
    #[error("API error {code}: {message}")]
    Api { code: u16, message: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid object: {0}")]
    Invalid(String),
}

impl StoreError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }

    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// One notification of the change feed
///
/// Mirrors the `kube_runtime` watcher protocol: a (re)list is framed by
/// `Init` .. `InitDone` with one `InitApply` per existing object, after which
/// live changes arrive as `Apply` / `Delete`.
#[derive(Debug, Clone)]
pub enum WatchEvent<K> {
    /// A (re)list started
    Init,
    /// An object present at (re)list time
    InitApply(K),
    /// The (re)list is complete; every existing object has been delivered
    InitDone,
    /// An object was created or modified
    Apply(K),
    /// An object was erased from the store
    Delete(K),
}

/// The operations the controller consumes from the external store, per resource type
#[async_trait]
pub trait ObjectStore<K>: Send + Sync
where
    K: Clone + Send + Sync + 'static,
{
    /// Fetch the current copy; `None` when the object does not exist
    async fn get(&self, key: &ObjectKey) -> StoreResult<Option<K>>;

    /// Create a new object; `AlreadyExists` when the key is taken
    async fn create(&self, obj: &K) -> StoreResult<K>;

    /// Replace metadata and spec; `Conflict` when the version token is stale
    async fn replace(&self, obj: &K) -> StoreResult<K>;

    /// Replace the status block; `Conflict` when the version token is stale
    async fn replace_status(&self, obj: &K) -> StoreResult<K>;

    /// Request deletion; `NotFound` when already gone
    async fn delete(&self, key: &ObjectKey) -> StoreResult<()>;

    /// One-shot listing of every object in scope
    async fn list(&self) -> StoreResult<Vec<K>>;

    /// Infinite change feed, restarted by the caller on error
    fn watch(&self) -> BoxStream<'static, StoreResult<WatchEvent<K>>>;
}

/// Whether the object carries a deletion marker
pub fn is_marked_for_deletion<K: Resource>(obj: &K) -> bool {
    obj.meta().deletion_timestamp.is_some()
}

/// Whether the object carries the given finalizer
pub fn has_finalizer<K: Resource>(obj: &K, finalizer: &str) -> bool {
    obj.finalizers().iter().any(|f| f == finalizer)
}

/// Version token of an object (empty when never persisted)
pub fn version_of<K: Resource>(obj: &K) -> String {
    obj.resource_version().unwrap_or_default()
}
