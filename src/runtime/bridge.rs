//! # Notification Bridge
//!
//! Translates the raw change feed of the external store into cache updates and
//! work queue entries.
//!
//! Watch events are first classified into typed [`ResourceEvent`]s against
//! the cache (which is updated in the same step), then each event is offered
//! to the queue:
//!
//! - `Added` / `Deleted` are always enqueued
//! - `Updated` is enqueued only when [`should_enqueue_update`] says the change
//!   matters and the reconciler does not flag it as an error-stamp-only write
//!
//! During a relist (`Init` .. `InitDone`) the bridge remembers which keys it
//! has seen; cached keys missing from the relist were deleted while the feed
//! was down and are reported as `Deleted`.

use crate::observability::metrics;
use crate::runtime::cache::CacheWriter;
use crate::runtime::error_policy::GivenUp;
use crate::runtime::queue::WorkQueue;
use crate::store::{is_marked_for_deletion, version_of, ObjectKey, ObjectStore, WatchEvent};
use futures::StreamExt;
use kube::{Resource, ResourceExt};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A classified change notification
#[derive(Debug, Clone)]
pub enum ResourceEvent<K> {
    Added(K),
    Updated { old: Arc<K>, new: K },
    Deleted(K),
}

impl<K: Resource> ResourceEvent<K> {
    fn object(&self) -> &K {
        match self {
            ResourceEvent::Added(obj) | ResourceEvent::Deleted(obj) => obj,
            ResourceEvent::Updated { new, .. } => new,
        }
    }
}

/// Whether an update carries a change worth reconciling
///
/// Unchanged version tokens are no-op resyncs. An object that was already
/// marked for deletion and still is, with the same finalizers, has nothing new
/// to tear down.
pub fn should_enqueue_update<K: Resource>(old: &K, new: &K) -> bool {
    if version_of(old) == version_of(new) {
        return false;
    }
    !(is_marked_for_deletion(old)
        && is_marked_for_deletion(new)
        && old.finalizers() == new.finalizers())
}

type UpdateFilter<K> = Box<dyn Fn(&K, &K) -> bool + Send + Sync>;

/// Single writer of the cache and producer of the work queue
pub struct Bridge<K> {
    cache: CacheWriter<K>,
    queue: WorkQueue<ObjectKey>,
    ignore_update: UpdateFilter<K>,
    given_up: GivenUp,
    relisting: Option<HashSet<ObjectKey>>,
}

impl<K> std::fmt::Debug for Bridge<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("relisting", &self.relisting.is_some())
            .finish_non_exhaustive()
    }
}

impl<K> Bridge<K>
where
    K: Resource + Clone + Send + Sync + 'static,
{
    pub fn new(cache: CacheWriter<K>, queue: WorkQueue<ObjectKey>) -> Self {
        Self {
            cache,
            queue,
            ignore_update: Box::new(|_, _| false),
            given_up: GivenUp::default(),
            relisting: None,
        }
    }

    /// Drop updates for which `ignore(old, new)` holds
    #[must_use]
    pub fn ignoring_updates(mut self, ignore: impl Fn(&K, &K) -> bool + Send + Sync + 'static) -> Self {
        self.ignore_update = Box::new(ignore);
        self
    }

    /// Release keys from `given_up` whenever a notification enqueues them
    #[must_use]
    pub fn releasing(mut self, given_up: GivenUp) -> Self {
        self.given_up = given_up;
        self
    }

    /// Apply one watch event to the cache and return its classification
    pub fn translate(&mut self, event: WatchEvent<K>) -> Vec<ResourceEvent<K>> {
        match event {
            WatchEvent::Init => {
                debug!("Relist started");
                self.relisting = Some(HashSet::new());
                Vec::new()
            }
            WatchEvent::InitApply(obj) => {
                let Some(key) = key_or_warn(&obj) else {
                    return Vec::new();
                };
                if let Some(seen) = self.relisting.as_mut() {
                    seen.insert(key.clone());
                }
                vec![self.upsert(key, obj)]
            }
            WatchEvent::InitDone => {
                let seen = self.relisting.take().unwrap_or_default();
                let vanished: Vec<ResourceEvent<K>> = self
                    .cache
                    .keys()
                    .into_iter()
                    .filter(|key| !seen.contains(key))
                    .filter_map(|key| self.cache.remove(&key))
                    .map(|obj| ResourceEvent::Deleted(K::clone(&obj)))
                    .collect();
                if !vanished.is_empty() {
                    info!(
                        "Relist complete: {} object(s) were deleted while the feed was down",
                        vanished.len()
                    );
                }
                self.cache.mark_synced();
                vanished
            }
            WatchEvent::Apply(obj) => match key_or_warn(&obj) {
                Some(key) => vec![self.upsert(key, obj)],
                None => Vec::new(),
            },
            WatchEvent::Delete(obj) => match key_or_warn(&obj) {
                Some(key) => {
                    self.cache.remove(&key);
                    vec![ResourceEvent::Deleted(obj)]
                }
                None => Vec::new(),
            },
        }
    }

    fn upsert(&self, key: ObjectKey, obj: K) -> ResourceEvent<K> {
        match self.cache.upsert(key, obj.clone()) {
            None => ResourceEvent::Added(obj),
            Some(old) => ResourceEvent::Updated { old, new: obj },
        }
    }

    /// Enqueue the key of an event if it warrants a reconciliation
    ///
    /// Returns whether the key was offered to the queue.
    pub fn dispatch(&self, event: &ResourceEvent<K>) -> bool {
        if let ResourceEvent::Updated { old, new } = event {
            if !should_enqueue_update(old.as_ref(), new) || (self.ignore_update)(old.as_ref(), new) {
                debug!(
                    resource.name = %new.name_any(),
                    resource.version = %version_of(new),
                    "Update filtered"
                );
                return false;
            }
        }
        // Objects reaching the bridge always came out of the store, but a
        // partially populated one must not take the loop down
        let Some(key) = key_or_warn(event.object()) else {
            return false;
        };
        if self.given_up.release(&key) {
            info!("🔁 {} changed after its retries were exhausted, retrying", key);
        }
        debug!(resource.key = %key, "Enqueue");
        self.queue.add(key);
        true
    }

    /// Handle one watch event end to end
    pub fn handle(&mut self, event: WatchEvent<K>) {
        for classified in self.translate(event) {
            self.dispatch(&classified);
        }
    }

    /// Consume the store's change feed until shutdown
    ///
    /// A feed error or end of stream re-establishes the feed after
    /// `restart_delay`; the fresh feed starts with a relist.
    pub async fn run(
        mut self,
        store: Arc<dyn ObjectStore<K>>,
        restart_delay: Duration,
        shutdown: CancellationToken,
    ) {
        loop {
            let mut feed = store.watch();
            loop {
                let next = tokio::select! {
                    () = shutdown.cancelled() => {
                        info!("Notification bridge stopped");
                        return;
                    }
                    next = feed.next() => next,
                };
                match next {
                    Some(Ok(event)) => self.handle(event),
                    Some(Err(e)) => {
                        warn!("⚠️ Change feed error: {}; restarting in {:?}", e, restart_delay);
                        metrics::increment_watch_errors();
                        break;
                    }
                    None => {
                        warn!("Change feed ended; restarting in {:?}", restart_delay);
                        break;
                    }
                }
            }
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!("Notification bridge stopped");
                    return;
                }
                () = tokio::time::sleep(restart_delay) => {}
            }
        }
    }
}

fn key_or_warn<K: Resource>(obj: &K) -> Option<ObjectKey> {
    match ObjectKey::from_resource(obj) {
        Ok(key) => Some(key),
        Err(e) => {
            warn!("Dropping notification: {}", e);
            None
        }
    }
}
