//! # Reconciliation Engine Tests
//!
//! End-to-end tests of [`Controller`] over an in-memory store.
//!
//! These tests verify:
//! - A key is never reconciled by two workers at once
//! - Notifications arriving during a reconciliation coalesce into one rerun
//! - Exponential retry, giving up, and the reset on a new notification
//! - A change arriving during the last attempt is not swallowed by giving up
//! - Graceful shutdown and the readiness flag
//! - Error stamps written on give-up do not re-trigger the attendee

mod common;

use async_trait::async_trait;
use common::{attendee, test_config, Harness};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ObjectMeta;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use workshop_provisioner::config::ControllerConfig;
use workshop_provisioner::crd::WorkshopAttendee;
use workshop_provisioner::runtime::{Controller, Reconcile, RuntimeSettings};
use workshop_provisioner::store::{MemoryStore, ObjectKey, ObjectStore, Op, StoreError};

/// Reconciler whose behaviour is scripted per test
#[derive(Debug, Default)]
struct Scripted {
    /// Every call as (key, observed value, time)
    calls: Mutex<Vec<(ObjectKey, String, Instant)>>,
    in_flight: Mutex<HashSet<ObjectKey>>,
    overlapped: AtomicBool,
    completed: AtomicUsize,
    work: Duration,
    always_fail: bool,
    /// Held by the first call until a permit is added
    gate: Option<Semaphore>,
    given_up: Mutex<Vec<ObjectKey>>,
    /// Change the object's value to "edited" while the n-th call is running
    edit_on_call: Option<(usize, MemoryStore<ConfigMap>)>,
}

impl Scripted {
    fn calls(&self) -> Vec<(ObjectKey, String, Instant)> {
        self.calls.lock().unwrap().clone()
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Reconcile<ConfigMap> for Scripted {
    type Error = StoreError;

    async fn reconcile(&self, obj: ConfigMap) -> Result<(), StoreError> {
        let key = ObjectKey::from_resource(&obj).unwrap();
        let value = obj.data.unwrap_or_default().remove("value").unwrap_or_default();
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((key.clone(), value, Instant::now()));
            calls.len()
        };
        let first = call == 1;
        if !self.in_flight.lock().unwrap().insert(key.clone()) {
            self.overlapped.store(true, Ordering::SeqCst);
        }

        if first {
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
        }
        if let Some((n, store)) = &self.edit_on_call {
            if *n == call {
                set_value(store, &key.name, "edited");
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }
        if !self.work.is_zero() {
            tokio::time::sleep(self.work).await;
        }

        self.in_flight.lock().unwrap().remove(&key);
        self.completed.fetch_add(1, Ordering::SeqCst);
        if self.always_fail {
            return Err(StoreError::Transport("scripted failure".to_string()));
        }
        Ok(())
    }

    async fn cleanup(&self, obj: ConfigMap) -> Result<(), StoreError> {
        self.reconcile(obj).await
    }

    async fn on_retries_exhausted(&self, key: &ObjectKey, _error: &StoreError) {
        self.given_up.lock().unwrap().push(key.clone());
    }
}

fn configmap(name: &str, value: &str) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([("value".to_string(), value.to_string())])),
        ..Default::default()
    }
}

fn set_value(store: &MemoryStore<ConfigMap>, name: &str, value: &str) {
    store.mutate(&ObjectKey::namespaced("default", name), |cm| {
        cm.data = Some(BTreeMap::from([("value".to_string(), value.to_string())]));
    });
}

fn settings(workers: usize) -> RuntimeSettings {
    RuntimeSettings {
        worker_count: workers,
        max_retries: 5,
        queue_base_delay: Duration::from_millis(5),
        queue_max_delay: Duration::from_secs(1000),
        queue_qps: 10,
        queue_burst: 100,
        resync_interval: Duration::ZERO,
        watch_restart_delay: Duration::from_millis(10),
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached");
}

fn controller(
    store: &MemoryStore<ConfigMap>,
    reconciler: &Arc<Scripted>,
    workers: usize,
) -> Controller<ConfigMap, Scripted> {
    Controller::new(
        Arc::new(store.clone()) as Arc<dyn ObjectStore<ConfigMap>>,
        Arc::clone(reconciler),
        settings(workers),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_key_is_never_reconciled_concurrently() {
    let store = MemoryStore::new();
    for name in ["a", "b", "c"] {
        store.insert(configmap(name, "0"));
    }
    let reconciler = Arc::new(Scripted {
        work: Duration::from_millis(2),
        ..Default::default()
    });
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(controller(&store, &reconciler, 4).run(shutdown.clone()));

    for i in 1..=20 {
        for name in ["a", "b", "c"] {
            set_value(&store, name, &i.to_string());
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    // Every key ends with a call that observed its final value
    wait_until(|| {
        let calls = reconciler.calls();
        ["a", "b", "c"].iter().all(|name| {
            calls
                .iter()
                .rev()
                .find(|(k, _, _)| k.name == *name)
                .is_some_and(|(_, v, _)| v == "20")
        })
    })
    .await;
    shutdown.cancel();
    handle.await.unwrap();

    assert!(!reconciler.overlapped.load(Ordering::SeqCst));
    assert_eq!(reconciler.completed.load(Ordering::SeqCst), reconciler.call_count());
}

#[tokio::test(start_paused = true)]
async fn test_notifications_during_reconcile_coalesce_into_one_rerun() {
    let store = MemoryStore::new();
    store.insert(configmap("a", "v0"));
    let reconciler = Arc::new(Scripted {
        gate: Some(Semaphore::new(0)),
        ..Default::default()
    });
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(controller(&store, &reconciler, 2).run(shutdown.clone()));

    wait_until(|| reconciler.call_count() == 1).await;
    for v in 1..=5 {
        set_value(&store, "a", &format!("v{v}"));
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(reconciler.call_count(), 1);

    reconciler.gate.as_ref().unwrap().add_permits(1);
    tokio::time::sleep(Duration::from_secs(1)).await;

    let values: Vec<_> = reconciler.calls().into_iter().map(|(_, v, _)| v).collect();
    assert_eq!(values, vec!["v0", "v5"]);
    shutdown.cancel();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_failures_back_off_exponentially_then_give_up() {
    let store = MemoryStore::new();
    store.insert(configmap("a", "v0"));
    let reconciler = Arc::new(Scripted {
        always_fail: true,
        ..Default::default()
    });
    let shutdown = CancellationToken::new();
    let mut engine = controller(&store, &reconciler, 1);
    let mut exhausted = engine.retries_exhausted().unwrap();
    let handle = tokio::spawn(engine.run(shutdown.clone()));

    let report = exhausted.recv().await.unwrap();
    assert_eq!(report.key, ObjectKey::namespaced("default", "a"));
    assert_eq!(report.attempts, 6);
    assert!(report.error.contains("scripted failure"));
    assert_eq!(reconciler.given_up.lock().unwrap().len(), 1);

    let times: Vec<_> = reconciler.calls().into_iter().map(|(_, _, t)| t).collect();
    let gaps: Vec<_> = times.windows(2).map(|w| w[1] - w[0]).collect();
    let expected: Vec<_> = [5, 10, 20, 40, 80].into_iter().map(Duration::from_millis).collect();
    assert_eq!(gaps, expected);

    // Given up stays given up
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(reconciler.call_count(), 6);

    // A new notification starts over with a fresh backoff
    set_value(&store, "a", "v1");
    let report = exhausted.recv().await.unwrap();
    assert_eq!(report.attempts, 6);
    let calls = reconciler.calls();
    assert_eq!(calls.len(), 12);
    assert_eq!(calls[6].1, "v1");
    assert_eq!(calls[7].2 - calls[6].2, Duration::from_millis(5));

    shutdown.cancel();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_change_during_final_attempt_starts_a_new_cycle() {
    let store = MemoryStore::new();
    store.insert(configmap("a", "v0"));
    let reconciler = Arc::new(Scripted {
        always_fail: true,
        edit_on_call: Some((6, store.clone())),
        ..Default::default()
    });
    let shutdown = CancellationToken::new();
    let mut engine = controller(&store, &reconciler, 1);
    let mut exhausted = engine.retries_exhausted().unwrap();
    let handle = tokio::spawn(engine.run(shutdown.clone()));

    let report = exhausted.recv().await.unwrap();
    assert_eq!(report.attempts, 6);

    // The edit made during the sixth attempt is reconciled, from a fresh backoff
    let report = exhausted.recv().await.unwrap();
    assert_eq!(report.attempts, 6);
    let calls = reconciler.calls();
    assert_eq!(calls.len(), 12);
    assert_eq!(calls[6].1, "edited");
    assert_eq!(calls[8].2 - calls[7].2, Duration::from_millis(5));
    assert_eq!(reconciler.given_up.lock().unwrap().len(), 2);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(reconciler.call_count(), 12);

    shutdown.cancel();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_successful_keys_are_not_retried() {
    let store = MemoryStore::new();
    store.insert(configmap("a", "v0"));
    store.insert(configmap("b", "v0"));
    let reconciler = Arc::new(Scripted::default());
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(controller(&store, &reconciler, 2).run(shutdown.clone()));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(reconciler.call_count(), 2);
    shutdown.cancel();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_waits_for_in_flight_reconciliation() {
    let store = MemoryStore::new();
    store.insert(configmap("a", "v0"));
    let reconciler = Arc::new(Scripted {
        work: Duration::from_millis(200),
        ..Default::default()
    });
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(controller(&store, &reconciler, 1).run(shutdown.clone()));

    wait_until(|| reconciler.call_count() == 1).await;
    shutdown.cancel();
    handle.await.unwrap();
    assert_eq!(reconciler.completed.load(Ordering::SeqCst), 1);

    // Changes after shutdown are not picked up
    set_value(&store, "a", "v1");
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(reconciler.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_ready_flag_follows_controller_lifecycle() {
    let store = MemoryStore::new();
    store.insert(configmap("a", "v0"));
    let reconciler = Arc::new(Scripted::default());
    let ready = Arc::new(AtomicBool::new(false));
    let shutdown = CancellationToken::new();
    let engine = controller(&store, &reconciler, 1).with_ready_flag(Arc::clone(&ready));
    let handle = tokio::spawn(engine.run(shutdown.clone()));

    wait_until(|| ready.load(Ordering::Relaxed)).await;
    shutdown.cancel();
    handle.await.unwrap();
    assert!(!ready.load(Ordering::Relaxed));
}

#[tokio::test(start_paused = true)]
async fn test_error_stamp_does_not_retrigger_given_up_attendee() {
    let h = Harness::new(test_config());
    h.attendees.insert(attendee("jane"));
    for _ in 0..100 {
        h.namespaces
            .fail_next(Op::Create, StoreError::Transport("apiserver unavailable".into()));
    }
    let settings = RuntimeSettings {
        resync_interval: Duration::from_secs(1),
        ..RuntimeSettings::from(&ControllerConfig {
            queue_base_delay_ms: 5,
            ..test_config()
        })
    };
    let mut engine = Controller::new(
        Arc::new(h.attendees.clone()) as Arc<dyn ObjectStore<WorkshopAttendee>>,
        Arc::clone(&h.reconciler),
        settings,
    );
    let mut exhausted = engine.retries_exhausted().unwrap();
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(engine.run(shutdown.clone()));

    let report = exhausted.recv().await.unwrap();
    assert_eq!(report.key, ObjectKey::cluster("jane"));
    wait_until(|| {
        h.attendee("jane")
            .and_then(|a| a.status)
            .is_some_and(|s| s.last_error.is_some())
    })
    .await;
    let attempts = h.journal.of(Op::Create).len();

    // Neither the stamp write nor the resync wakes the key up again
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.journal.of(Op::Create).len(), attempts);

    // Editing the attendee does
    h.attendees.mutate(&ObjectKey::cluster("jane"), |a| {
        a.spec.email = "jane@workshop.example.com".to_string();
    });
    wait_until(|| h.journal.of(Op::Create).len() > attempts).await;

    shutdown.cancel();
    handle.await.unwrap();
}
