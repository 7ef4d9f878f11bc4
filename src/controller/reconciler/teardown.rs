//! # Teardown
//!
//! Removal of an attendee carrying a deletion marker.
//!
//! Deleting the attendee namespace cascades to every other child, so
//! teardown only deletes the namespace, polls until the store no longer
//! returns it, then releases the finalizer. The wait is bounded by
//! `teardown_max_wait` and interrupted by shutdown; both end the pass with an
//! error so the key is retried.

use crate::config::ControllerConfig;
use crate::constants::ATTENDEE_FINALIZER;
use crate::controller::backoff::ConflictBackoff;
use crate::controller::reconciler::finalizer::remove_finalizer;
use crate::controller::reconciler::lifecycle::{transition, LifecycleEvent};
use crate::controller::reconciler::provision::recorded_namespace;
use crate::controller::reconciler::status::{update_status, StatusWrite};
use crate::controller::reconciler::types::{Reconciler, ReconcilerError};
use crate::crd::WorkshopAttendee;
use crate::store::{has_finalizer, is_marked_for_deletion, ObjectKey};
use k8s_openapi::api::core::v1::Namespace;
use kube::ResourceExt;
use tokio::time::Instant;
use tracing::{debug, info};

impl Reconciler {
    /// Tear down an attendee that carries a deletion marker
    pub async fn teardown(&self, attendee: WorkshopAttendee) -> Result<(), ReconcilerError> {
        let key = ObjectKey::from_resource(&attendee).map_err(|e| ReconcilerError::Invalid(e.to_string()))?;
        if !has_finalizer(&attendee, ATTENDEE_FINALIZER) {
            debug!(resource.key = %key, "No finalizer, nothing to tear down");
            return Ok(());
        }
        let config = self.config.current();
        let backoff = ConflictBackoff::with_steps(config.conflict_retry_steps);

        let write = update_status(self.stores.attendees.as_ref(), &key, backoff.clone(), |s| {
            s.state = transition(s.state, LifecycleEvent::DeletionRequested);
        })
        .await?;
        let latest = match write {
            StatusWrite::Gone => return Ok(()),
            StatusWrite::Written(latest) => {
                info!("🗑️ Attendee {} marked for deletion, tearing down", key);
                latest
            }
            StatusWrite::Unchanged(latest) => {
                debug!(resource.key = %key, "Resuming teardown");
                latest
            }
        };

        // Attendees provisioned before the namespace was recorded fall back to the prefix
        let ns = recorded_namespace(&latest).unwrap_or_else(|| config.attendee_namespace(&attendee.name_any()));
        self.await_namespace_removal(&ns, &config).await?;

        remove_finalizer(self.stores.attendees.as_ref(), &key, backoff).await?;
        info!("✅ Attendee {} torn down", key);
        Ok(())
    }

    /// Delete the attendee namespace and wait until the store no longer has it
    async fn await_namespace_removal(&self, ns: &str, config: &ControllerConfig) -> Result<(), ReconcilerError> {
        let key = ObjectKey::cluster(ns);
        let max_wait = config.teardown_max_wait();
        let poll = config.teardown_poll_interval();
        let deadline = Instant::now() + max_wait;

        loop {
            match self.stores.namespaces.get(&key).await? {
                None => {
                    debug!(namespace = ns, "Namespace gone");
                    return Ok(());
                }
                Some(existing) if !is_terminating(&existing) => match self.stores.namespaces.delete(&key).await {
                    Ok(()) => info!("Deleting namespace {}", ns),
                    Err(e) if e.is_not_found() => return Ok(()),
                    Err(e) => return Err(e.into()),
                },
                Some(_) => debug!(namespace = ns, "Namespace still terminating"),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ReconcilerError::TeardownTimedOut(ns.to_string(), max_wait));
            }
            tokio::select! {
                () = self.shutdown.cancelled() => return Err(ReconcilerError::Cancelled),
                () = tokio::time::sleep(poll.min(deadline - now)) => {}
            }
        }
    }
}

fn is_terminating(ns: &Namespace) -> bool {
    is_marked_for_deletion(ns)
        || ns
            .status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .is_some_and(|phase| phase == "Terminating")
}
