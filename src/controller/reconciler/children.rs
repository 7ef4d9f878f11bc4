//! # Child Resources
//!
//! Desired state of every resource provisioned for an attendee, and the
//! existence check + create step shared by all of them.
//!
//! Children are only ever created, never updated: a child that exists is
//! left alone whatever its content.

use crate::constants::{
    ATTENDEE_SERVICE_ACCOUNT_NAME, ATTENDEE_TOKEN_SECRET_NAME, CONTROLLER_NAME, WORKLOAD_REPLICAS,
};
use crate::controller::reconciler::types::ReconcilerError;
use crate::observability::metrics;
use crate::store::{ObjectKey, ObjectStore};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, Namespace, PodSpec, PodTemplateSpec, Secret, ServiceAccount,
};
use k8s_openapi::api::rbac::v1::{RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::ObjectMeta;
use kube::Resource;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Label naming the attendee a child belongs to
pub const ATTENDEE_LABEL: &str = "provisioner.k8s.carsonoid.net/attendee";

/// Status key of the attendee namespace
pub const CHILD_NAMESPACE: &str = "namespace";
/// Status key of the attendee service account
pub const CHILD_SERVICE_ACCOUNT: &str = "serviceaccount";
/// Status key of the attendee role binding
pub const CHILD_ROLE_BINDING: &str = "rolebinding";

/// Status key of the service account token secret
pub fn token_secret_child() -> String {
    format!("secret:{ATTENDEE_TOKEN_SECRET_NAME}")
}

/// Status key of a workload deployment
pub fn deployment_child(app: &str) -> String {
    format!("deployment:{app}")
}

fn labels(attendee: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app.kubernetes.io/managed-by".to_string(), CONTROLLER_NAME.to_string()),
        (ATTENDEE_LABEL.to_string(), attendee.to_string()),
    ])
}

fn meta(name: &str, namespace: Option<&str>, attendee: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(ToString::to_string),
        labels: Some(labels(attendee)),
        ..Default::default()
    }
}

/// Isolated namespace holding everything else
pub fn namespace(name: &str, attendee: &str) -> Namespace {
    Namespace {
        metadata: meta(name, None, attendee),
        ..Default::default()
    }
}

pub fn service_account(namespace: &str, attendee: &str) -> ServiceAccount {
    ServiceAccount {
        metadata: meta(ATTENDEE_SERVICE_ACCOUNT_NAME, Some(namespace), attendee),
        ..Default::default()
    }
}

/// Long-lived token for the attendee service account, filled in by the
/// cluster's token controller
pub fn token_secret(namespace: &str, attendee: &str) -> Secret {
    let mut metadata = meta(ATTENDEE_TOKEN_SECRET_NAME, Some(namespace), attendee);
    metadata.annotations = Some(BTreeMap::from([(
        "kubernetes.io/service-account.name".to_string(),
        ATTENDEE_SERVICE_ACCOUNT_NAME.to_string(),
    )]));
    Secret {
        metadata,
        type_: Some("kubernetes.io/service-account-token".to_string()),
        ..Default::default()
    }
}

/// Grants `cluster_role` to the attendee service account within its namespace
pub fn role_binding(namespace: &str, attendee: &str, cluster_role: &str) -> RoleBinding {
    RoleBinding {
        metadata: meta(ATTENDEE_SERVICE_ACCOUNT_NAME, Some(namespace), attendee),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: cluster_role.to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: ATTENDEE_SERVICE_ACCOUNT_NAME.to_string(),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }]),
    }
}

pub fn deployment(namespace: &str, attendee: &str, app: &str, image: &str) -> Deployment {
    let selector = BTreeMap::from([("app".to_string(), app.to_string())]);
    let mut pod_labels = labels(attendee);
    pod_labels.extend(selector.clone());
    Deployment {
        metadata: meta(app, Some(namespace), attendee),
        spec: Some(DeploymentSpec {
            replicas: Some(WORKLOAD_REPLICAS),
            selector: LabelSelector {
                match_labels: Some(selector),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(pod_labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "web".to_string(),
                        image: Some(image.to_string()),
                        ports: Some(vec![ContainerPort {
                            container_port: 80,
                            name: Some("http".to_string()),
                            protocol: Some("TCP".to_string()),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Result of [`ensure_present`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ensured {
    Existed,
    Created,
}

/// Create `desired` unless an object with its key already exists
///
/// `child` is the status key of the resource; its prefix labels the
/// `children_created_total` metric.
pub async fn ensure_present<K>(
    store: &dyn ObjectStore<K>,
    desired: &K,
    child: &str,
) -> Result<Ensured, ReconcilerError>
where
    K: Resource + Clone + Send + Sync + 'static,
{
    let key = ObjectKey::from_resource(desired).map_err(|e| ReconcilerError::Invalid(e.to_string()))?;
    if store.get(&key).await?.is_some() {
        debug!(child = child, resource.key = %key, "Child present");
        return Ok(Ensured::Existed);
    }

    match store.create(desired).await {
        Ok(_) => {
            let kind = child.split(':').next().unwrap_or(child);
            metrics::increment_children_created(kind);
            info!("➕ Created {} {}", child, key);
            Ok(Ensured::Created)
        }
        // Lost a race with another writer; presence is all that matters
        Err(e) if e.is_already_exists() => Ok(Ensured::Existed),
        Err(source) => Err(ReconcilerError::ChildCreation {
            child: child.to_string(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, Op, StoreError};

    #[test]
    fn test_child_keys() {
        assert_eq!(token_secret_child(), "secret:attendee-token");
        assert_eq!(deployment_child("app1"), "deployment:app1");
    }

    #[test]
    fn test_token_secret_is_bound_to_service_account() {
        let secret = token_secret("wa-jane", "jane");
        assert_eq!(secret.type_.as_deref(), Some("kubernetes.io/service-account-token"));
        let annotations = secret.metadata.annotations.unwrap();
        assert_eq!(annotations["kubernetes.io/service-account.name"], "attendee");
        assert_eq!(secret.metadata.namespace.as_deref(), Some("wa-jane"));
    }

    #[test]
    fn test_role_binding_targets_cluster_role() {
        let binding = role_binding("wa-jane", "jane", "podlabeler");
        assert_eq!(binding.role_ref.kind, "ClusterRole");
        assert_eq!(binding.role_ref.name, "podlabeler");
        let subject = &binding.subjects.unwrap()[0];
        assert_eq!(subject.kind, "ServiceAccount");
        assert_eq!(subject.namespace.as_deref(), Some("wa-jane"));
    }

    #[test]
    fn test_deployment_selector_matches_pod_labels() {
        let deploy = deployment("wa-jane", "jane", "app1", "nginx:1.12");
        let spec = deploy.spec.unwrap();
        assert_eq!(spec.replicas, Some(2));
        let selector = spec.selector.match_labels.unwrap();
        let pod_labels = spec.template.metadata.unwrap().labels.unwrap();
        for (k, v) in &selector {
            assert_eq!(pod_labels.get(k), Some(v));
        }
        let container = &spec.template.spec.unwrap().containers[0];
        assert_eq!(container.image.as_deref(), Some("nginx:1.12"));
        assert_eq!(container.ports.as_ref().unwrap()[0].container_port, 80);
    }

    #[tokio::test]
    async fn test_ensure_present_creates_once() {
        let store = MemoryStore::<Namespace>::new();
        let desired = namespace("wa-jane", "jane");
        assert_eq!(
            ensure_present(&store, &desired, CHILD_NAMESPACE).await.unwrap(),
            Ensured::Created
        );
        assert_eq!(
            ensure_present(&store, &desired, CHILD_NAMESPACE).await.unwrap(),
            Ensured::Existed
        );
        assert_eq!(store.journal().of(Op::Create).len(), 1);
    }

    #[tokio::test]
    async fn test_ensure_present_never_updates_existing() {
        let store = MemoryStore::<Namespace>::new();
        let mut existing = namespace("wa-jane", "someone-else");
        existing.metadata.labels = None;
        store.insert(existing);
        ensure_present(&store, &namespace("wa-jane", "jane"), CHILD_NAMESPACE)
            .await
            .unwrap();
        assert!(store.journal().of(Op::Replace).is_empty());
        let stored = store.snapshot(&ObjectKey::cluster("wa-jane")).unwrap();
        assert!(stored.metadata.labels.is_none());
    }

    #[tokio::test]
    async fn test_ensure_present_treats_already_exists_as_present() {
        let store = MemoryStore::<Namespace>::new();
        store.fail_next(Op::Create, StoreError::AlreadyExists("wa-jane".into()));
        let ensured = ensure_present(&store, &namespace("wa-jane", "jane"), CHILD_NAMESPACE)
            .await
            .unwrap();
        assert_eq!(ensured, Ensured::Existed);
    }

    #[tokio::test]
    async fn test_ensure_present_wraps_create_failure() {
        let store = MemoryStore::<Namespace>::new();
        store.fail_next(Op::Create, StoreError::Transport("down".into()));
        let err = ensure_present(&store, &namespace("wa-jane", "jane"), CHILD_NAMESPACE)
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcilerError::ChildCreation { ref child, .. } if child == "namespace"));
    }
}
