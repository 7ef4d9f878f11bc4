//! # Notification Bridge Tests
//!
//! Tests for translating change feed events into cache updates and enqueues.

use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use workshop_provisioner::runtime::cache::{self, Cache};
use workshop_provisioner::runtime::queue::default_controller_rate_limiter;
use workshop_provisioner::runtime::{Bridge, GivenUp, ResourceEvent, WorkQueue};
use workshop_provisioner::store::{MemoryStore, ObjectKey, ObjectStore, WatchEvent};

fn configmap(name: &str, version: &str, value: &str) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            resource_version: Some(version.to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([("value".to_string(), value.to_string())])),
        ..Default::default()
    }
}

fn key(name: &str) -> ObjectKey {
    ObjectKey::namespaced("default", name)
}

fn setup() -> (Bridge<ConfigMap>, Cache<ConfigMap>, WorkQueue<ObjectKey>) {
    let (cache, writer) = cache::cache();
    let queue = WorkQueue::new(default_controller_rate_limiter(
        Duration::from_millis(5),
        Duration::from_secs(1000),
        10,
        100,
    ));
    (Bridge::new(writer, queue.clone()), cache, queue)
}

async fn drain(queue: &WorkQueue<ObjectKey>) -> Vec<ObjectKey> {
    let mut keys = Vec::new();
    while !queue.is_empty() {
        if let Some(k) = queue.get().await {
            queue.done(&k);
            keys.push(k);
        }
    }
    keys
}

#[tokio::test]
async fn test_add_then_same_version_update_is_filtered() {
    let (mut bridge, cache, queue) = setup();
    bridge.handle(WatchEvent::Apply(configmap("a", "1", "x")));
    assert_eq!(drain(&queue).await, vec![key("a")]);

    let events = bridge.translate(WatchEvent::Apply(configmap("a", "1", "x")));
    assert!(matches!(events.as_slice(), [ResourceEvent::Updated { .. }]));
    assert!(!bridge.dispatch(&events[0]));
    assert!(queue.is_empty());
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn test_real_update_replaces_cache_entry_and_enqueues() {
    let (mut bridge, cache, queue) = setup();
    bridge.handle(WatchEvent::Apply(configmap("a", "1", "x")));
    drain(&queue).await;

    bridge.handle(WatchEvent::Apply(configmap("a", "2", "y")));
    assert_eq!(drain(&queue).await, vec![key("a")]);
    let cached = cache.get(&key("a")).unwrap();
    assert_eq!(cached.data.as_ref().unwrap()["value"], "y");
}

#[tokio::test]
async fn test_delete_removes_from_cache_and_enqueues() {
    let (mut bridge, cache, queue) = setup();
    bridge.handle(WatchEvent::Apply(configmap("a", "1", "x")));
    drain(&queue).await;

    bridge.handle(WatchEvent::Delete(configmap("a", "1", "x")));
    assert!(cache.get(&key("a")).is_none());
    assert_eq!(drain(&queue).await, vec![key("a")]);
}

#[tokio::test]
async fn test_relist_reports_vanished_keys_as_deleted() {
    let (mut bridge, cache, queue) = setup();
    bridge.handle(WatchEvent::Apply(configmap("a", "1", "x")));
    bridge.handle(WatchEvent::Apply(configmap("b", "1", "x")));
    drain(&queue).await;

    assert!(bridge.translate(WatchEvent::Init).is_empty());
    bridge.handle(WatchEvent::InitApply(configmap("a", "1", "x")));
    let done = bridge.translate(WatchEvent::InitDone);
    assert!(matches!(done.as_slice(), [ResourceEvent::Deleted(obj)] if obj.metadata.name.as_deref() == Some("b")));
    for event in &done {
        bridge.dispatch(event);
    }

    assert_eq!(cache.keys(), vec![key("a")]);
    assert_eq!(drain(&queue).await, vec![key("b")]);
}

#[tokio::test]
async fn test_init_done_marks_cache_synced() {
    let (mut bridge, cache, _queue) = setup();
    assert!(!cache.has_synced());
    bridge.handle(WatchEvent::Init);
    bridge.handle(WatchEvent::InitApply(configmap("a", "1", "x")));
    assert!(!cache.has_synced());
    bridge.handle(WatchEvent::InitDone);
    assert!(cache.has_synced());
    assert!(cache.wait_for_sync().await);
}

#[tokio::test]
async fn test_nameless_objects_are_dropped() {
    let (mut bridge, cache, queue) = setup();
    let mut nameless = configmap("a", "1", "x");
    nameless.metadata.name = None;

    bridge.handle(WatchEvent::Apply(nameless.clone()));
    bridge.handle(WatchEvent::Delete(nameless));
    assert!(cache.is_empty());
    assert!(queue.is_empty());
}

#[tokio::test]
async fn test_update_filter_hook_suppresses_updates_only() {
    let (bridge, _cache, queue) = setup();
    let mut bridge = bridge.ignoring_updates(|_, _| true);

    bridge.handle(WatchEvent::Apply(configmap("a", "1", "x")));
    assert_eq!(drain(&queue).await, vec![key("a")]);
    bridge.handle(WatchEvent::Apply(configmap("a", "2", "y")));
    assert!(queue.is_empty());
    bridge.handle(WatchEvent::Delete(configmap("a", "2", "y")));
    assert_eq!(drain(&queue).await, vec![key("a")]);
}

#[tokio::test]
async fn test_notification_releases_given_up_key() {
    let (bridge, _cache, queue) = setup();
    let given_up = GivenUp::default();
    given_up.park(key("a"));
    given_up.park(key("b"));
    let mut bridge = bridge.releasing(given_up.clone());

    bridge.handle(WatchEvent::Apply(configmap("a", "1", "x")));
    assert!(!given_up.contains(&key("a")));
    assert!(given_up.contains(&key("b")));
    assert_eq!(drain(&queue).await, vec![key("a")]);
}

#[tokio::test]
async fn test_run_follows_store_until_shutdown() {
    let (bridge, cache, queue) = setup();
    let store = MemoryStore::<ConfigMap>::new();
    store.insert(configmap("a", "", "x"));
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(bridge.run(
        Arc::new(store.clone()) as Arc<dyn ObjectStore<ConfigMap>>,
        Duration::from_millis(10),
        shutdown.clone(),
    ));

    assert!(cache.wait_for_sync().await);
    assert_eq!(queue.get().await, Some(key("a")));
    queue.done(&key("a"));

    store.insert(configmap("b", "", "x"));
    assert_eq!(queue.get().await, Some(key("b")));
    queue.done(&key("b"));
    assert_eq!(cache.len(), 2);

    shutdown.cancel();
    handle.await.unwrap();
}
