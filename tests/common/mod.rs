//! Common test utilities
//!
//! In-memory stores sharing one journal, a recording notifier, attendee
//! fixtures and a reconciler wired to all of them.

#![allow(dead_code, reason = "not every test binary uses every helper")]

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::RoleBinding;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use workshop_provisioner::config::{self, ConfigPublisher, ControllerConfig};
use workshop_provisioner::controller::reconciler::{Notifier, NotifyError, Reconciler, Stores};
use workshop_provisioner::crd::{AttendeePhase, WorkshopAttendee, WorkshopAttendeeSpec};
use workshop_provisioner::store::{Journal, JournalEntry, MemoryStore, ObjectKey, ObjectStore, Op};

/// Notifier recording every attendee it was asked to notify
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_ready(&self, attendee: &WorkshopAttendee, _kubeconfig: &str) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .unwrap()
            .push(attendee.metadata.name.clone().unwrap_or_default());
        Ok(())
    }
}

/// Configuration with a single workload and short teardown timings
pub fn test_config() -> ControllerConfig {
    ControllerConfig {
        workload_apps: vec!["app1".to_string()],
        teardown_poll_interval_secs: 1,
        teardown_max_wait_secs: 10,
        resync_interval_secs: 0,
        ..ControllerConfig::default()
    }
}

pub fn attendee(name: &str) -> WorkshopAttendee {
    WorkshopAttendee::new(
        name,
        WorkshopAttendeeSpec {
            email: format!("{name}@example.com"),
        },
    )
}

/// Reconciler over in-memory stores
#[derive(Debug)]
pub struct Harness {
    pub journal: Arc<Journal>,
    pub attendees: MemoryStore<WorkshopAttendee>,
    pub namespaces: MemoryStore<Namespace>,
    pub service_accounts: MemoryStore<ServiceAccount>,
    pub secrets: MemoryStore<Secret>,
    pub role_bindings: MemoryStore<RoleBinding>,
    pub deployments: MemoryStore<Deployment>,
    pub notifier: Arc<RecordingNotifier>,
    pub config: ConfigPublisher,
    pub shutdown: CancellationToken,
    pub reconciler: Arc<Reconciler>,
}

impl Harness {
    pub fn new(config: ControllerConfig) -> Self {
        let journal = Journal::new();
        let attendees = MemoryStore::with_journal(Arc::clone(&journal));
        let namespaces = MemoryStore::with_journal(Arc::clone(&journal));
        let service_accounts = MemoryStore::with_journal(Arc::clone(&journal));
        let secrets = MemoryStore::with_journal(Arc::clone(&journal));
        let role_bindings = MemoryStore::with_journal(Arc::clone(&journal));
        let deployments = MemoryStore::with_journal(Arc::clone(&journal));
        let notifier = Arc::new(RecordingNotifier::default());
        let shutdown = CancellationToken::new();
        let (publisher, handle) = config::channel(config);
        let stores = Stores {
            attendees: Arc::new(attendees.clone()),
            namespaces: Arc::new(namespaces.clone()),
            service_accounts: Arc::new(service_accounts.clone()),
            secrets: Arc::new(secrets.clone()),
            role_bindings: Arc::new(role_bindings.clone()),
            deployments: Arc::new(deployments.clone()),
        };
        let reconciler = Arc::new(Reconciler::new(
            stores,
            handle,
            Arc::clone(&notifier) as Arc<dyn Notifier>,
            shutdown.clone(),
        ));
        Self {
            journal,
            attendees,
            namespaces,
            service_accounts,
            secrets,
            role_bindings,
            deployments,
            notifier,
            config: publisher,
            shutdown,
            reconciler,
        }
    }

    /// Reconciler sharing this harness's children, config and notifier but
    /// reading attendees through `attendees`
    pub fn reconciler_over(&self, attendees: Arc<dyn ObjectStore<WorkshopAttendee>>) -> Reconciler {
        let stores = Stores {
            attendees,
            namespaces: Arc::new(self.namespaces.clone()),
            service_accounts: Arc::new(self.service_accounts.clone()),
            secrets: Arc::new(self.secrets.clone()),
            role_bindings: Arc::new(self.role_bindings.clone()),
            deployments: Arc::new(self.deployments.clone()),
        };
        Reconciler::new(
            stores,
            self.config.subscribe(),
            Arc::clone(&self.notifier) as Arc<dyn Notifier>,
            self.shutdown.clone(),
        )
    }

    /// Latest stored copy of an attendee
    pub fn attendee(&self, name: &str) -> Option<WorkshopAttendee> {
        self.attendees.snapshot(&ObjectKey::cluster(name))
    }

    pub fn phase(&self, name: &str) -> Option<AttendeePhase> {
        self.attendee(name)?.status?.state
    }

    /// Child creations in call order, as `Kind/name`
    pub fn creations(&self) -> Vec<String> {
        self.journal
            .of(Op::Create)
            .into_iter()
            .map(|JournalEntry { kind, key, .. }| {
                format!("{}/{}", kind, key.map(|k| k.name).unwrap_or_default())
            })
            .collect()
    }
}
