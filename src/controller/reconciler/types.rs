//! # Types
//!
//! Core types for the reconciler.

use crate::config::ConfigHandle;
use crate::controller::reconciler::notifications::Notifier;
use crate::crd::WorkshopAttendee;
use crate::store::{KubeStore, ObjectStore, StoreError};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::RoleBinding;
use kube::Client;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("failed to create {child}: {source}")]
    ChildCreation {
        child: String,
        #[source]
        source: StoreError,
    },
    #[error("namespace {0} still present after {1:?}")]
    TeardownTimedOut(String, Duration),
    #[error("teardown interrupted by shutdown")]
    Cancelled,
    #[error("failed to render kubeconfig: {0}")]
    Kubeconfig(#[from] serde_yaml::Error),
    #[error("invalid attendee: {0}")]
    Invalid(String),
}

/// Access to every resource type the reconciler reads or writes
#[derive(Clone)]
pub struct Stores {
    pub attendees: Arc<dyn ObjectStore<WorkshopAttendee>>,
    pub namespaces: Arc<dyn ObjectStore<Namespace>>,
    pub service_accounts: Arc<dyn ObjectStore<ServiceAccount>>,
    pub secrets: Arc<dyn ObjectStore<Secret>>,
    pub role_bindings: Arc<dyn ObjectStore<RoleBinding>>,
    pub deployments: Arc<dyn ObjectStore<Deployment>>,
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}

impl Stores {
    /// Stores backed by the API server
    pub fn kube(client: &Client) -> Self {
        Self {
            attendees: Arc::new(KubeStore::<WorkshopAttendee>::cluster(client.clone())),
            namespaces: Arc::new(KubeStore::<Namespace>::cluster(client.clone())),
            service_accounts: Arc::new(KubeStore::<ServiceAccount>::namespaced(client.clone())),
            secrets: Arc::new(KubeStore::<Secret>::namespaced(client.clone())),
            role_bindings: Arc::new(KubeStore::<RoleBinding>::namespaced(client.clone())),
            deployments: Arc::new(KubeStore::<Deployment>::namespaced(client.clone())),
        }
    }
}

/// Reconciler context shared by every worker
///
/// Holds no per-attendee state: everything an attendee needs is read from the
/// stores at the start of each pass, so concurrent passes for distinct
/// attendees never interfere.
#[derive(Clone)]
pub struct Reconciler {
    pub stores: Stores,
    pub config: ConfigHandle,
    pub notifier: Arc<dyn Notifier>,
    /// Interrupts teardown waits on shutdown
    pub shutdown: CancellationToken,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config.current())
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(
        stores: Stores,
        config: ConfigHandle,
        notifier: Arc<dyn Notifier>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            stores,
            config,
            notifier,
            shutdown,
        }
    }
}
