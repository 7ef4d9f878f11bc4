//! # In-Memory Store
//!
//! Process-local [`ObjectStore`] with the API server semantics the controller
//! relies on:
//!
//! - every write bumps a monotonically increasing `resourceVersion`
//! - `replace` / `replace_status` reject stale version tokens with `Conflict`
//! - `delete` of an object holding finalizers only stamps `deletionTimestamp`;
//!   the object is erased once its last finalizer is removed
//! - `watch` replays the current contents and then streams live changes
//!
//! Every call is recorded in a [`Journal`] (which may be shared between
//! stores of different kinds) and failures can be injected per operation.

use super::{is_marked_for_deletion, ObjectKey, ObjectStore, StoreError, StoreResult, WatchEvent};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;

const WATCH_BUFFER: usize = 1024;

/// Store operation, as recorded in the [`Journal`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Get,
    Create,
    Replace,
    ReplaceStatus,
    Delete,
    List,
}

/// One recorded store call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub op: Op,
    pub kind: String,
    pub key: Option<ObjectKey>,
}

/// Ordered record of store calls
#[derive(Debug, Default)]
pub struct Journal {
    entries: Mutex<Vec<JournalEntry>>,
}

impl Journal {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record(&self, op: Op, kind: &str, key: Option<ObjectKey>) {
        lock(&self.entries).push(JournalEntry {
            op,
            kind: kind.to_string(),
            key,
        });
    }

    /// Snapshot of every call so far
    #[must_use]
    pub fn entries(&self) -> Vec<JournalEntry> {
        lock(&self.entries).clone()
    }

    /// Calls of one operation, in order
    #[must_use]
    pub fn of(&self, op: Op) -> Vec<JournalEntry> {
        lock(&self.entries)
            .iter()
            .filter(|e| e.op == op)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        lock(&self.entries).clear();
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

struct State<K> {
    objects: BTreeMap<ObjectKey, K>,
    next_version: u64,
    failures: HashMap<Op, VecDeque<StoreError>>,
}

struct Inner<K> {
    kind: String,
    state: Mutex<State<K>>,
    events: broadcast::Sender<WatchEvent<K>>,
    journal: Arc<Journal>,
}

/// In-memory [`ObjectStore`] for one resource kind
pub struct MemoryStore<K> {
    inner: Arc<Inner<K>>,
}

impl<K> Clone for MemoryStore<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K> fmt::Debug for MemoryStore<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("kind", &self.inner.kind)
            .finish_non_exhaustive()
    }
}

impl<K> Default for MemoryStore<K>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    K::DynamicType: Default,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> MemoryStore<K>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    K::DynamicType: Default,
{
    #[must_use]
    pub fn new() -> Self {
        Self::with_journal(Journal::new())
    }

    /// Store recording its calls into a shared journal
    #[must_use]
    pub fn with_journal(journal: Arc<Journal>) -> Self {
        let (events, _) = broadcast::channel(WATCH_BUFFER);
        Self {
            inner: Arc::new(Inner {
                kind: K::kind(&K::DynamicType::default()).to_string(),
                state: Mutex::new(State {
                    objects: BTreeMap::new(),
                    next_version: 1,
                    failures: HashMap::new(),
                }),
                events,
                journal,
            }),
        }
    }

    #[must_use]
    pub fn journal(&self) -> Arc<Journal> {
        Arc::clone(&self.inner.journal)
    }

    /// Make the next call of `op` fail with `err`
    ///
    /// Injected failures queue up: calling this twice fails the next two calls.
    pub fn fail_next(&self, op: Op, err: StoreError) {
        lock(&self.inner.state)
            .failures
            .entry(op)
            .or_default()
            .push_back(err);
    }

    /// Put an object into the store as an external actor would, bypassing all checks
    pub fn insert(&self, mut obj: K) -> K {
        let mut state = lock(&self.inner.state);
        stamp_version(&mut state, &mut obj);
        if let Ok(key) = ObjectKey::from_resource(&obj) {
            state.objects.insert(key, obj.clone());
        }
        self.emit(WatchEvent::Apply(obj.clone()));
        obj
    }

    /// Erase an object immediately, ignoring finalizers
    pub fn remove(&self, key: &ObjectKey) -> Option<K> {
        let mut state = lock(&self.inner.state);
        let removed = state.objects.remove(key);
        if let Some(obj) = &removed {
            self.emit(WatchEvent::Delete(obj.clone()));
        }
        removed
    }

    /// Edit an object in place as an external actor would
    pub fn mutate(&self, key: &ObjectKey, f: impl FnOnce(&mut K)) -> Option<K> {
        let mut state = lock(&self.inner.state);
        let mut obj = state.objects.get(key)?.clone();
        f(&mut obj);
        stamp_version(&mut state, &mut obj);
        state.objects.insert(key.clone(), obj.clone());
        self.emit(WatchEvent::Apply(obj.clone()));
        Some(obj)
    }

    /// Current copy of an object without recording a call
    #[must_use]
    pub fn snapshot(&self, key: &ObjectKey) -> Option<K> {
        lock(&self.inner.state).objects.get(key).cloned()
    }

    /// Every stored object, ordered by key
    #[must_use]
    pub fn objects(&self) -> Vec<K> {
        lock(&self.inner.state).objects.values().cloned().collect()
    }

    fn emit(&self, event: WatchEvent<K>) {
        // No subscribers is fine
        let _ = self.inner.events.send(event);
    }

    fn begin(&self, op: Op, key: Option<&ObjectKey>) -> StoreResult<MutexGuard<'_, State<K>>> {
        self.inner.journal.record(op, &self.inner.kind, key.cloned());
        let mut state = lock(&self.inner.state);
        if let Some(err) = state.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        Ok(state)
    }
}

fn stamp_version<K: Resource>(state: &mut State<K>, obj: &mut K) {
    obj.meta_mut().resource_version = Some(state.next_version.to_string());
    state.next_version += 1;
}

fn key_of<K: Resource>(obj: &K) -> StoreResult<ObjectKey> {
    ObjectKey::from_resource(obj).map_err(|e| StoreError::Invalid(e.to_string()))
}

fn check_version<K: Resource>(stored: &K, incoming: &K, key: &ObjectKey) -> StoreResult<()> {
    match incoming.resource_version() {
        Some(v) if !v.is_empty() && Some(&v) != stored.meta().resource_version.as_ref() => {
            Err(StoreError::Conflict(key.to_string()))
        }
        _ => Ok(()),
    }
}

/// Copy the `status` field of `from` into `into`, going through JSON so any kind works
fn with_status_of<K: Serialize + DeserializeOwned>(into: &K, from: &K) -> StoreResult<K> {
    let invalid = |e: serde_json::Error| StoreError::Invalid(e.to_string());
    let mut target = serde_json::to_value(into).map_err(invalid)?;
    let source = serde_json::to_value(from).map_err(invalid)?;
    if let Some(obj) = target.as_object_mut() {
        match source.get("status") {
            Some(status) => obj.insert("status".to_string(), status.clone()),
            None => obj.remove("status"),
        };
    }
    serde_json::from_value(target).map_err(invalid)
}

fn now() -> StoreResult<Time> {
    let stamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    serde_json::from_value(serde_json::Value::String(stamp))
        .map_err(|e| StoreError::Invalid(e.to_string()))
}

#[async_trait]
impl<K> ObjectStore<K> for MemoryStore<K>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    K::DynamicType: Default,
{
    async fn get(&self, key: &ObjectKey) -> StoreResult<Option<K>> {
        let state = self.begin(Op::Get, Some(key))?;
        Ok(state.objects.get(key).cloned())
    }

    async fn create(&self, obj: &K) -> StoreResult<K> {
        let key = key_of(obj)?;
        let mut state = self.begin(Op::Create, Some(&key))?;
        if state.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists(key.to_string()));
        }
        let mut created = obj.clone();
        created.meta_mut().deletion_timestamp = None;
        created.meta_mut().creation_timestamp = Some(now()?);
        stamp_version(&mut state, &mut created);
        state.objects.insert(key, created.clone());
        self.emit(WatchEvent::Apply(created.clone()));
        Ok(created)
    }

    async fn replace(&self, obj: &K) -> StoreResult<K> {
        let key = key_of(obj)?;
        let mut state = self.begin(Op::Replace, Some(&key))?;
        let stored = state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        check_version(&stored, obj, &key)?;

        let mut updated = with_status_of(obj, &stored)?;
        updated.meta_mut().deletion_timestamp = stored.meta().deletion_timestamp.clone();
        updated.meta_mut().creation_timestamp = stored.meta().creation_timestamp.clone();
        stamp_version(&mut state, &mut updated);

        if is_marked_for_deletion(&updated) && updated.finalizers().is_empty() {
            state.objects.remove(&key);
            self.emit(WatchEvent::Delete(updated.clone()));
        } else {
            state.objects.insert(key, updated.clone());
            self.emit(WatchEvent::Apply(updated.clone()));
        }
        Ok(updated)
    }

    async fn replace_status(&self, obj: &K) -> StoreResult<K> {
        let key = key_of(obj)?;
        let mut state = self.begin(Op::ReplaceStatus, Some(&key))?;
        let stored = state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        check_version(&stored, obj, &key)?;

        let mut updated = with_status_of(&stored, obj)?;
        stamp_version(&mut state, &mut updated);
        state.objects.insert(key, updated.clone());
        self.emit(WatchEvent::Apply(updated.clone()));
        Ok(updated)
    }

    async fn delete(&self, key: &ObjectKey) -> StoreResult<()> {
        let mut state = self.begin(Op::Delete, Some(key))?;
        let stored = state
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;

        if stored.finalizers().is_empty() {
            state.objects.remove(key);
            self.emit(WatchEvent::Delete(stored));
            return Ok(());
        }
        if is_marked_for_deletion(&stored) {
            return Ok(());
        }
        let mut marked = stored;
        marked.meta_mut().deletion_timestamp = Some(now()?);
        stamp_version(&mut state, &mut marked);
        state.objects.insert(key.clone(), marked.clone());
        self.emit(WatchEvent::Apply(marked));
        Ok(())
    }

    async fn list(&self) -> StoreResult<Vec<K>> {
        let state = self.begin(Op::List, None)?;
        Ok(state.objects.values().cloned().collect())
    }

    fn watch(&self) -> BoxStream<'static, StoreResult<WatchEvent<K>>> {
        // Subscribe and snapshot under one lock so no event is missed or duplicated
        let (snapshot, rx) = {
            let state = lock(&self.inner.state);
            let snapshot: Vec<K> = state.objects.values().cloned().collect();
            (snapshot, self.inner.events.subscribe())
        };

        let initial = std::iter::once(WatchEvent::Init)
            .chain(snapshot.into_iter().map(WatchEvent::InitApply))
            .chain(std::iter::once(WatchEvent::InitDone))
            .map(Ok);

        let live = stream::unfold(rx, |mut rx| async move {
            match rx.recv().await {
                Ok(event) => Some((Ok(event), rx)),
                Err(broadcast::error::RecvError::Lagged(n)) => Some((
                    Err(StoreError::Transport(format!("watch fell behind by {n} events"))),
                    rx,
                )),
                Err(broadcast::error::RecvError::Closed) => None,
            }
        });

        stream::iter(initial).chain(live).boxed()
    }
}
