//! # Reconciler
//!
//! Provisioning logic for `WorkshopAttendee` resources.
//!
//! For every attendee the reconciler maintains:
//! - a namespace `<prefix><attendee>`
//! - a ServiceAccount and its token Secret
//! - a RoleBinding to the configured ClusterRole
//! - one Deployment per configured workload app
//!
//! and publishes a kubeconfig for the ServiceAccount in the attendee status.
//!
//! ## Module Structure
//!
//! - `lifecycle.rs` - Phase transitions (Unset, Creating, Ready, Deleting)
//! - `provision.rs` - Convergence pass and finalization
//! - `teardown.rs` - Namespace removal and finalizer release
//! - `children.rs` - Desired child resources and the ensure-present step
//! - `status.rs` / `finalizer.rs` - Conflict-retried writes to the attendee
//! - `kubeconfig.rs` - Kubeconfig rendering
//! - `notifications.rs` - Completion notification
//! - `types.rs` - Reconciler context and errors

pub mod children;
pub mod finalizer;
pub mod kubeconfig;
pub mod lifecycle;
pub mod notifications;
pub mod provision;
pub mod status;
pub mod teardown;
pub mod types;

pub use notifications::{LogNotifier, Notifier, NotifyError};
pub use types::{Reconciler, ReconcilerError, Stores};

use crate::controller::backoff::ConflictBackoff;
use crate::crd::WorkshopAttendee;
use crate::runtime::Reconcile;
use crate::store::ObjectKey;
use async_trait::async_trait;
use chrono::Utc;
use kube::{Resource, ResourceExt};
use tracing::warn;

#[async_trait]
impl Reconcile<WorkshopAttendee> for Reconciler {
    type Error = ReconcilerError;

    async fn reconcile(&self, obj: WorkshopAttendee) -> Result<(), ReconcilerError> {
        self.converge(obj).await
    }

    async fn cleanup(&self, obj: WorkshopAttendee) -> Result<(), ReconcilerError> {
        self.teardown(obj).await
    }

    /// Record the final error on the attendee so it can be queried
    async fn on_retries_exhausted(&self, key: &ObjectKey, error: &ReconcilerError) {
        let message = error.to_string();
        let now = Utc::now();
        let backoff = ConflictBackoff::with_steps(self.config.current().conflict_retry_steps);
        let result = status::update_status(self.stores.attendees.as_ref(), key, backoff, |s| {
            s.last_error = Some(message.clone());
            s.last_error_time = Some(now);
        })
        .await;
        if let Err(e) = result {
            warn!("Failed to record last error on {}: {}", key, e);
        }
    }

    fn is_error_stamp_only(&self, old: &WorkshopAttendee, new: &WorkshopAttendee) -> bool {
        let stamp = |a: &WorkshopAttendee| {
            a.status
                .as_ref()
                .map(|s| (s.last_error.clone(), s.last_error_time))
                .unwrap_or_default()
        };
        let stripped = |a: &WorkshopAttendee| {
            a.status
                .as_ref()
                .map(crate::crd::WorkshopAttendeeStatus::without_error_stamp)
                .unwrap_or_default()
        };
        stamp(old) != stamp(new)
            && old.spec == new.spec
            && old.meta().deletion_timestamp == new.meta().deletion_timestamp
            && old.finalizers() == new.finalizers()
            && stripped(old) == stripped(new)
    }
}
