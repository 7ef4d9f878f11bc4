//! # Provisioning
//!
//! The convergence pass of a live attendee.
//!
//! Every pass walks the same ordered list of steps: finalizer, namespace,
//! service account, token secret, role binding, then one deployment per
//! configured app. Each step is an existence check followed by a create;
//! the first failing create ends the pass. A creation re-stamps the phase as
//! Creating, and a pass that started in Creating and created nothing
//! publishes the kubeconfig, moves to Ready and notifies the attendee.

use crate::config::ControllerConfig;
use crate::constants::{ATTENDEE_SERVICE_ACCOUNT_NAME, ATTENDEE_TOKEN_SECRET_NAME};
use crate::controller::backoff::ConflictBackoff;
use crate::controller::reconciler::children::{
    self, deployment_child, ensure_present, token_secret_child, Ensured, CHILD_NAMESPACE,
    CHILD_ROLE_BINDING, CHILD_SERVICE_ACCOUNT,
};
use crate::controller::reconciler::finalizer::ensure_finalizer;
use crate::controller::reconciler::kubeconfig::{render_kubeconfig, token_from_secret};
use crate::controller::reconciler::lifecycle::{should_finalize, transition, LifecycleEvent};
use crate::controller::reconciler::status::{update_status, StatusWrite};
use crate::controller::reconciler::types::{Reconciler, ReconcilerError};
use crate::crd::{AttendeePhase, WorkshopAttendee};
use crate::observability::metrics;
use crate::store::{is_marked_for_deletion, ObjectKey, ObjectStore};
use chrono::Utc;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, warn};

impl Reconciler {
    /// Converge an attendee towards its provisioned state
    pub async fn converge(&self, attendee: WorkshopAttendee) -> Result<(), ReconcilerError> {
        let key = ObjectKey::from_resource(&attendee).map_err(|e| ReconcilerError::Invalid(e.to_string()))?;
        let config = self.config.current();
        let backoff = ConflictBackoff::with_steps(config.conflict_retry_steps);

        // The cached copy may lag; decisions are made on the authoritative one
        let Some(latest) = self.stores.attendees.get(&key).await? else {
            debug!(resource.key = %key, "Attendee gone, nothing to converge");
            return Ok(());
        };
        if is_marked_for_deletion(&latest) {
            return self.teardown(latest).await;
        }

        let recorded = latest.status.as_ref().and_then(|s| s.state);
        let recorded_ns = latest.status.as_ref().and_then(|s| s.namespace.clone());
        let ns = recorded_ns
            .clone()
            .unwrap_or_else(|| config.attendee_namespace(&latest.name_any()));
        if recorded.is_none() || recorded_ns.is_none() {
            if recorded.is_none() {
                info!("🆕 New attendee {} ({})", key, latest.spec.email);
            }
            // Pin the namespace before any child exists
            let write = update_status(self.stores.attendees.as_ref(), &key, backoff.clone(), |s| {
                s.state = transition(s.state, LifecycleEvent::FirstObserved);
                s.namespace.get_or_insert_with(|| ns.clone());
            })
            .await?;
            if matches!(write, StatusWrite::Gone) {
                return Ok(());
            }
        }
        let observed = transition(recorded, LifecycleEvent::FirstObserved);

        let Some(latest) = ensure_finalizer(self.stores.attendees.as_ref(), &key, backoff.clone()).await?
        else {
            return Ok(());
        };
        // Deletion may have been requested between the read above and the finalizer write
        if is_marked_for_deletion(&latest) {
            return self.teardown(latest).await;
        }
        let ns = recorded_namespace(&latest).unwrap_or(ns);

        let created = self.ensure_children(&key, &latest, &ns, &config, &backoff).await?;
        if should_finalize(observed, created) {
            self.finalize(&key, &latest, &ns, &config, backoff).await?;
        } else if created > 0 {
            debug!(resource.key = %key, created, "Children created this pass");
        }
        Ok(())
    }

    /// Run every child step in order; returns how many children were created
    async fn ensure_children(
        &self,
        key: &ObjectKey,
        attendee: &WorkshopAttendee,
        ns: &str,
        config: &ControllerConfig,
        backoff: &ConflictBackoff,
    ) -> Result<usize, ReconcilerError> {
        let name = attendee.name_any();
        let stores = &self.stores;

        let mut created = 0;
        created += self
            .ensure_child(
                key,
                stores.namespaces.as_ref(),
                &children::namespace(ns, &name),
                CHILD_NAMESPACE,
                backoff,
            )
            .await?;
        created += self
            .ensure_child(
                key,
                stores.service_accounts.as_ref(),
                &children::service_account(ns, &name),
                CHILD_SERVICE_ACCOUNT,
                backoff,
            )
            .await?;
        created += self
            .ensure_child(
                key,
                stores.secrets.as_ref(),
                &children::token_secret(ns, &name),
                &token_secret_child(),
                backoff,
            )
            .await?;
        created += self
            .ensure_child(
                key,
                stores.role_bindings.as_ref(),
                &children::role_binding(ns, &name, &config.attendee_cluster_role),
                CHILD_ROLE_BINDING,
                backoff,
            )
            .await?;
        for app in &config.workload_apps {
            created += self
                .ensure_child(
                    key,
                    stores.deployments.as_ref(),
                    &children::deployment(ns, &name, app, &config.workload_image),
                    &deployment_child(app),
                    backoff,
                )
                .await?;
        }
        Ok(created)
    }

    async fn ensure_child<K>(
        &self,
        key: &ObjectKey,
        store: &dyn ObjectStore<K>,
        desired: &K,
        child: &str,
        backoff: &ConflictBackoff,
    ) -> Result<usize, ReconcilerError>
    where
        K: Resource + Clone + Send + Sync + 'static,
    {
        if ensure_present(store, desired, child).await? == Ensured::Existed {
            return Ok(0);
        }
        let now = Utc::now();
        update_status(self.stores.attendees.as_ref(), key, backoff.clone(), |s| {
            s.children.insert(child.to_string(), now);
            s.state = transition(s.state, LifecycleEvent::ChildCreated);
        })
        .await?;
        Ok(1)
    }

    /// Publish the kubeconfig, move to Ready and notify the attendee
    ///
    /// The phase is re-checked against the latest copy inside the status
    /// write, so the notification goes out at most once per crossing even
    /// when passes race.
    async fn finalize(
        &self,
        key: &ObjectKey,
        attendee: &WorkshopAttendee,
        ns: &str,
        config: &ControllerConfig,
        backoff: ConflictBackoff,
    ) -> Result<(), ReconcilerError> {
        let secret_key = ObjectKey::namespaced(ns, ATTENDEE_TOKEN_SECRET_NAME);
        let token = match self.stores.secrets.get(&secret_key).await? {
            Some(secret) => token_from_secret(&secret),
            None => None,
        };
        let token = token.unwrap_or_else(|| {
            warn!(
                "⚠️ Token for {} not populated yet, publishing kubeconfig without credentials",
                secret_key
            );
            String::new()
        });
        let kubeconfig = render_kubeconfig(&config.cluster_addr, ns, ATTENDEE_SERVICE_ACCOUNT_NAME, &token)?;

        let email = attendee.spec.email.clone();
        let write = update_status(self.stores.attendees.as_ref(), key, backoff, |s| {
            if s.state != Some(AttendeePhase::Creating) {
                return;
            }
            s.state = transition(s.state, LifecycleEvent::AllChildrenPresent);
            s.kubeconfig = Some(kubeconfig.clone());
            s.notified = Some(email.clone());
            s.last_error = None;
            s.last_error_time = None;
        })
        .await?;

        let StatusWrite::Written(ready) = write else {
            debug!(resource.key = %key, "Attendee left Creating concurrently, not finalizing");
            return Ok(());
        };
        info!("✅ Attendee {} is ready", key);

        match self.notifier.notify_ready(&ready, &kubeconfig).await {
            Ok(()) => metrics::increment_notifications(),
            // Delivery is best effort; the kubeconfig is in the status either way
            Err(e) => warn!("Failed to notify {}: {}", key, e),
        }
        Ok(())
    }
}

/// Namespace recorded on the attendee when it was first provisioned
pub(crate) fn recorded_namespace(attendee: &WorkshopAttendee) -> Option<String> {
    attendee.status.as_ref().and_then(|s| s.namespace.clone())
}
