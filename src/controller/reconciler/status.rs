//! # Status Updates
//!
//! Read-latest / mutate / write cycles against the attendee's status block,
//! retried on version conflicts.

use crate::controller::backoff::{retry_on_conflict, ConflictBackoff};
use crate::crd::{WorkshopAttendee, WorkshopAttendeeStatus};
use crate::store::{ObjectKey, ObjectStore, StoreResult};
use tracing::debug;

/// Outcome of [`update_status`]
#[derive(Debug, Clone)]
pub enum StatusWrite {
    /// The mutation changed the status and the write went through
    Written(WorkshopAttendee),
    /// The mutation left the latest status as it was; nothing was written
    Unchanged(WorkshopAttendee),
    /// The attendee no longer exists
    Gone,
}

impl StatusWrite {
    #[must_use]
    pub fn is_written(&self) -> bool {
        matches!(self, StatusWrite::Written(_))
    }

    /// Latest known copy of the attendee, if it still exists
    pub fn into_latest(self) -> Option<WorkshopAttendee> {
        match self {
            StatusWrite::Written(obj) | StatusWrite::Unchanged(obj) => Some(obj),
            StatusWrite::Gone => None,
        }
    }
}

/// Apply `mutate` to the latest status of `key` and write it back
///
/// The attendee is re-read on every attempt, so `mutate` always sees the
/// authoritative status and may be called more than once. A mutation that
/// changes nothing skips the write.
pub async fn update_status<F>(
    store: &dyn ObjectStore<WorkshopAttendee>,
    key: &ObjectKey,
    backoff: ConflictBackoff,
    mutate: F,
) -> StoreResult<StatusWrite>
where
    F: Fn(&mut WorkshopAttendeeStatus) + Send + Sync,
{
    let mutate = &mutate;
    retry_on_conflict(backoff, || async move {
        let Some(latest) = store.get(key).await? else {
            return Ok(StatusWrite::Gone);
        };
        let current = latest.status.clone().unwrap_or_default();
        let mut next = current.clone();
        mutate(&mut next);
        if next == current {
            debug!(resource.key = %key, "Status unchanged, skipping write");
            return Ok(StatusWrite::Unchanged(latest));
        }

        let mut desired = latest;
        desired.status = Some(next);
        match store.replace_status(&desired).await {
            Ok(written) => Ok(StatusWrite::Written(written)),
            Err(e) if e.is_not_found() => Ok(StatusWrite::Gone),
            Err(e) => Err(e),
        }
    })
    .await
}
