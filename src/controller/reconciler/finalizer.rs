//! # Finalizer
//!
//! Adds and removes the controller's finalizer with conflict retry.

use crate::constants::ATTENDEE_FINALIZER;
use crate::controller::backoff::{retry_on_conflict, ConflictBackoff};
use crate::store::{has_finalizer, ObjectKey, ObjectStore, StoreResult};
use kube::{Resource, ResourceExt};
use tracing::{debug, info};

/// Make sure the latest copy of `key` carries the finalizer
///
/// Returns the latest copy, or `None` when the object no longer exists.
pub async fn ensure_finalizer<K>(
    store: &dyn ObjectStore<K>,
    key: &ObjectKey,
    backoff: ConflictBackoff,
) -> StoreResult<Option<K>>
where
    K: Resource + Clone + Send + Sync + 'static,
{
    retry_on_conflict(backoff, || async move {
        let Some(mut latest) = store.get(key).await? else {
            return Ok(None);
        };
        if has_finalizer(&latest, ATTENDEE_FINALIZER) {
            return Ok(Some(latest));
        }
        latest.finalizers_mut().push(ATTENDEE_FINALIZER.to_string());
        match store.replace(&latest).await {
            Ok(written) => {
                debug!(resource.key = %key, "Finalizer added");
                Ok(Some(written))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    })
    .await
}

/// Remove the finalizer from the latest copy of `key`
///
/// Once the last finalizer of a marked object is gone the store erases it.
pub async fn remove_finalizer<K>(
    store: &dyn ObjectStore<K>,
    key: &ObjectKey,
    backoff: ConflictBackoff,
) -> StoreResult<()>
where
    K: Resource + Clone + Send + Sync + 'static,
{
    retry_on_conflict(backoff, || async move {
        let Some(mut latest) = store.get(key).await? else {
            return Ok(());
        };
        if !has_finalizer(&latest, ATTENDEE_FINALIZER) {
            return Ok(());
        }
        latest.finalizers_mut().retain(|f| f != ATTENDEE_FINALIZER);
        match store.replace(&latest).await {
            Ok(_) => {
                info!("Finalizer removed from {}", key);
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    })
    .await
}
