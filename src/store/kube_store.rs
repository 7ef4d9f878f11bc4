//! # Kubernetes Store
//!
//! [`ObjectStore`] implementation backed by the API server.

use super::{ObjectKey, ObjectStore, StoreError, StoreResult, WatchEvent};
use crate::constants::CONTROLLER_NAME;
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use kube::api::{DeleteParams, ListParams, PostParams};
use kube::{Api, Client, Resource};
use kube_runtime::{watcher, WatchStreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::sync::Arc;

type ApiFactory<K> = Arc<dyn Fn(Option<&str>) -> Api<K> + Send + Sync>;

/// Typed access to one resource type on the API server
///
/// Cluster scoped types are built with [`KubeStore::cluster`], namespaced
/// types with [`KubeStore::namespaced`]. The namespaced variant lists and
/// watches across all namespaces and addresses individual objects through the
/// namespace carried by their [`ObjectKey`].
pub struct KubeStore<K> {
    apis: ApiFactory<K>,
}

impl<K> Clone for KubeStore<K> {
    fn clone(&self) -> Self {
        Self {
            apis: Arc::clone(&self.apis),
        }
    }
}

impl<K> std::fmt::Debug for KubeStore<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore")
            .field("kind", &std::any::type_name::<K>())
            .finish()
    }
}

impl<K> KubeStore<K>
where
    K: Resource<Scope = k8s_openapi::ClusterResourceScope> + Clone + DeserializeOwned + Debug,
    K::DynamicType: Default,
{
    pub fn cluster(client: Client) -> Self {
        Self {
            apis: Arc::new(move |_: Option<&str>| Api::all(client.clone())),
        }
    }
}

impl<K> KubeStore<K>
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
    K::DynamicType: Default,
{
    pub fn namespaced(client: Client) -> Self {
        Self {
            apis: Arc::new(move |ns: Option<&str>| match ns {
                Some(ns) => Api::namespaced(client.clone(), ns),
                None => Api::all(client.clone()),
            }),
        }
    }
}

impl<K> KubeStore<K> {
    fn api(&self, namespace: Option<&str>) -> Api<K> {
        (self.apis)(namespace)
    }
}

/// Map a kube client error onto the store taxonomy
///
/// `conflict_means_exists` selects how HTTP 409 is read: on create it means
/// the name is taken, on writes it means the version token is stale.
fn map_kube_error(err: kube::Error, what: &str, conflict_means_exists: bool) -> StoreError {
    match err {
        kube::Error::Api(resp) if resp.code == 404 => StoreError::NotFound(what.to_string()),
        kube::Error::Api(resp) if resp.code == 409 && conflict_means_exists => {
            StoreError::AlreadyExists(what.to_string())
        }
        kube::Error::Api(resp) if resp.code == 409 => StoreError::Conflict(what.to_string()),
        kube::Error::Api(resp) => StoreError::Api {
            code: resp.code,
            message: resp.message,
        },
        other => StoreError::Transport(other.to_string()),
    }
}

/// Body of a status PUT
///
/// The whole object goes over the wire: the API server takes `status` as is,
/// so fields cleared locally are cleared remotely, and rejects a stale
/// `metadata.resourceVersion` with 409.
fn status_body<K: Serialize>(obj: &K) -> StoreResult<Vec<u8>> {
    serde_json::to_vec(obj).map_err(|e| StoreError::Invalid(e.to_string()))
}

fn key_of<K: Resource>(obj: &K) -> StoreResult<ObjectKey> {
    ObjectKey::from_resource(obj).map_err(|e| StoreError::Invalid(e.to_string()))
}

#[async_trait]
impl<K> ObjectStore<K> for KubeStore<K>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug + Send + Sync + 'static,
    K::DynamicType: Default,
{
    async fn get(&self, key: &ObjectKey) -> StoreResult<Option<K>> {
        self.api(key.namespace.as_deref())
            .get_opt(&key.name)
            .await
            .map_err(|e| map_kube_error(e, &key.to_string(), false))
    }

    async fn create(&self, obj: &K) -> StoreResult<K> {
        let key = key_of(obj)?;
        let pp = PostParams {
            field_manager: Some(CONTROLLER_NAME.to_string()),
            ..PostParams::default()
        };
        self.api(key.namespace.as_deref())
            .create(&pp, obj)
            .await
            .map_err(|e| map_kube_error(e, &key.to_string(), true))
    }

    async fn replace(&self, obj: &K) -> StoreResult<K> {
        let key = key_of(obj)?;
        let pp = PostParams {
            field_manager: Some(CONTROLLER_NAME.to_string()),
            ..PostParams::default()
        };
        self.api(key.namespace.as_deref())
            .replace(&key.name, &pp, obj)
            .await
            .map_err(|e| map_kube_error(e, &key.to_string(), false))
    }

    async fn replace_status(&self, obj: &K) -> StoreResult<K> {
        let key = key_of(obj)?;
        let pp = PostParams {
            field_manager: Some(CONTROLLER_NAME.to_string()),
            ..PostParams::default()
        };
        self.api(key.namespace.as_deref())
            .replace_status(&key.name, &pp, status_body(obj)?)
            .await
            .map_err(|e| map_kube_error(e, &key.to_string(), false))
    }

    async fn delete(&self, key: &ObjectKey) -> StoreResult<()> {
        self.api(key.namespace.as_deref())
            .delete(&key.name, &DeleteParams::background())
            .await
            .map(|_| ())
            .map_err(|e| map_kube_error(e, &key.to_string(), false))
    }

    async fn list(&self) -> StoreResult<Vec<K>> {
        self.api(None)
            .list(&ListParams::default())
            .await
            .map(|list| list.items)
            .map_err(|e| map_kube_error(e, std::any::type_name::<K>(), false))
    }

    fn watch(&self) -> futures::stream::BoxStream<'static, StoreResult<WatchEvent<K>>> {
        watcher(self.api(None), watcher::Config::default())
            .default_backoff()
            .map_ok(|event| match event {
                watcher::Event::Init => WatchEvent::Init,
                watcher::Event::InitApply(obj) => WatchEvent::InitApply(obj),
                watcher::Event::InitDone => WatchEvent::InitDone,
                watcher::Event::Apply(obj) => WatchEvent::Apply(obj),
                watcher::Event::Delete(obj) => WatchEvent::Delete(obj),
            })
            .map_err(|e| StoreError::Transport(e.to_string()))
            .boxed()
    }
}
