//! # Notifications
//!
//! Completion notification sent once an attendee's environment is ready.

use crate::crd::WorkshopAttendee;
use async_trait::async_trait;
use kube::ResourceExt;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("attendee {0} has no email address")]
    MissingAddress(String),
    #[error("failed to deliver notification: {0}")]
    Delivery(String),
}

/// Delivers the access credentials to an attendee
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_ready(&self, attendee: &WorkshopAttendee, kubeconfig: &str) -> Result<(), NotifyError>;
}

/// Notifier that only records the dispatch in the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_ready(&self, attendee: &WorkshopAttendee, kubeconfig: &str) -> Result<(), NotifyError> {
        if attendee.spec.email.is_empty() {
            return Err(NotifyError::MissingAddress(attendee.name_any()));
        }
        info!(
            "📧 Sending kubeconfig for {} to {} ({} bytes)",
            attendee.name_any(),
            attendee.spec.email,
            kubeconfig.len()
        );
        Ok(())
    }
}
