//! Keyed in-memory store with subscriptions, per-key revisions, and
//! deferred notification delivery.
//!
//! The cache is the canonical "current known state" for each logical query.
//! Values are stored as serialized JSON so one store can hold heterogeneous
//! resource types; the typed view is produced at the read seam. The inner
//! mutex is never held across an await, and subscriber callbacks never run
//! under it; notifications are queued by the triggering operation and
//! flushed afterwards, so a write performed inside a callback cannot recurse
//! into synchronous delivery.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::error::{ApiError, ErrorKind};

use super::entry::{CacheEntry, EntryStatus, ReadState};
use super::traits::QueryKey;

/// Notification delivered to subscribers of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEvent {
  /// The entry was written, invalidated, or rolled back.
  Updated(EntryStatus),
  /// The entry was removed (creation rollback).
  Removed,
}

type Callback = Arc<dyn Fn(CacheEvent) + Send + Sync>;

/// Handle returned by [`QueryCache::subscribe`]; pass it to
/// [`QueryCache::unsubscribe`] to stop receiving notifications.
#[derive(Debug)]
pub struct Subscription {
  key_hash: String,
  id: u64,
}

/// Immutable copy of an entry captured at mutation start, the rollback
/// target. Lives only for the duration of one mutation.
#[derive(Debug, Clone)]
pub(crate) struct EntrySnapshot {
  value: Value,
  status: EntryStatus,
  error: Option<ErrorKind>,
  last_updated: DateTime<Utc>,
}

struct StoredEntry {
  /// None while the first fetch for this key is still in flight.
  value: Option<Value>,
  status: EntryStatus,
  error: Option<ErrorKind>,
  last_updated: DateTime<Utc>,
  /// Bumped on every committed write; completions carrying an older
  /// revision are discarded instead of applied.
  revision: u64,
  resource: String,
}

impl StoredEntry {
  fn empty(resource: String) -> Self {
    Self {
      value: None,
      status: EntryStatus::Fetching,
      error: None,
      last_updated: Utc::now(),
      revision: 0,
      resource,
    }
  }
}

struct CacheInner {
  entries: HashMap<String, StoredEntry>,
  /// Revision a removed key left behind. Seeds the revision of a re-created
  /// entry so completions raced past a remove-and-rewrite cycle still
  /// present a stale revision and are discarded.
  tombstones: HashMap<String, u64>,
  subscribers: HashMap<String, Vec<(u64, Callback)>>,
  next_subscriber: u64,
  pending_events: VecDeque<(String, CacheEvent)>,
  draining: bool,
}

impl CacheInner {
  fn entry_mut(&mut self, hash: &str, resource: &str) -> &mut StoredEntry {
    let seeded = self.tombstones.remove(hash);
    self.entries.entry(hash.to_string()).or_insert_with(|| {
      let mut entry = StoredEntry::empty(resource.to_string());
      if let Some(revision) = seeded {
        entry.revision = revision;
      }
      entry
    })
  }
}

/// Keyed store of cache entries with subscription and invalidation.
///
/// Cheap to clone; clones share the same store.
#[derive(Clone)]
pub struct QueryCache {
  inner: Arc<Mutex<CacheInner>>,
}

impl Default for QueryCache {
  fn default() -> Self {
    Self::new()
  }
}

impl QueryCache {
  pub fn new() -> Self {
    Self {
      inner: Arc::new(Mutex::new(CacheInner {
        entries: HashMap::new(),
        tombstones: HashMap::new(),
        subscribers: HashMap::new(),
        next_subscriber: 0,
        pending_events: VecDeque::new(),
        draining: false,
      })),
    }
  }

  fn inner(&self) -> MutexGuard<'_, CacheInner> {
    // Callbacks never run under the lock, so poisoning would require a
    // panic inside the map operations themselves; recover rather than
    // propagate.
    self.inner.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn typed_view<T: DeserializeOwned>(entry: &StoredEntry) -> Option<CacheEntry<T>> {
    let value = entry.value.as_ref()?;
    match serde_json::from_value(value.clone()) {
      Ok(value) => Some(CacheEntry {
        value,
        status: entry.status,
        last_updated: entry.last_updated,
        error: entry.error,
      }),
      Err(err) => {
        tracing::warn!(%err, "cached value failed to deserialize");
        None
      }
    }
  }

  /// Return the current entry for `key` if one holds a value.
  pub fn read<K, T>(&self, key: &K) -> Option<CacheEntry<T>>
  where
    K: QueryKey,
    T: DeserializeOwned,
  {
    let inner = self.inner();
    inner.entries.get(&key.cache_hash()).and_then(Self::typed_view)
  }

  /// Current revision of `key`; 0 if the key has never been written.
  pub fn revision<K: QueryKey>(&self, key: &K) -> u64 {
    let hash = key.cache_hash();
    let inner = self.inner();
    inner
      .entries
      .get(&hash)
      .map(|e| e.revision)
      .or_else(|| inner.tombstones.get(&hash).copied())
      .unwrap_or(0)
  }

  /// Non-blocking read: return the entry if present, otherwise register a
  /// fetch via `loader` and return [`ReadState::Pending`].
  ///
  /// A read that arrives while a fetch is already in flight returns
  /// `Pending` without invoking the loader a second time. Abandoning
  /// interest (unsubscribing) does not cancel the fetch; it completes and
  /// populates the cache for any other subscriber.
  pub fn read_or_spawn<K, T, F, Fut>(&self, key: &K, loader: F) -> ReadState<T>
  where
    K: QueryKey,
    T: Serialize + DeserializeOwned + Send + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
  {
    let hash = key.cache_hash();
    let started_rev = {
      let mut inner = self.inner();
      if let Some(entry) = inner.entries.get(&hash) {
        if let Some(view) = Self::typed_view(entry) {
          return ReadState::Hit(view);
        }
        if entry.status == EntryStatus::Fetching {
          return ReadState::Pending;
        }
      }
      Self::mark_fetching(&mut inner, &hash, key.resource())
    };

    tracing::debug!(key = %key.description(), "registering fetch");
    let cache = self.clone();
    let fut = loader();
    tokio::spawn(async move {
      match fut.await {
        Ok(value) => match serde_json::to_value(&value) {
          Ok(json) => cache.apply_fetch_success(&hash, started_rev, json),
          Err(err) => {
            tracing::warn!(%err, "fetched value failed to serialize");
            cache.apply_fetch_failure(&hash, started_rev, ErrorKind::Decode);
          }
        },
        Err(err) => cache.apply_fetch_failure(&hash, started_rev, err.kind()),
      }
    });
    ReadState::Pending
  }

  /// Cache-first get-or-load: a fresh hit returns immediately; otherwise the
  /// loader runs and its result is stored (revision-guarded) before being
  /// returned. Loader failures are recorded on the entry and re-propagated;
  /// any prior value stays servable.
  pub async fn fetch<K, T, F, Fut>(&self, key: &K, loader: F) -> Result<T, ApiError>
  where
    K: QueryKey,
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
  {
    let hash = key.cache_hash();
    let started_rev = {
      let mut inner = self.inner();
      if let Some(entry) = inner.entries.get(&hash) {
        if entry.status == EntryStatus::Fresh {
          if let Some(view) = Self::typed_view::<T>(entry) {
            return Ok(view.value);
          }
        }
      }
      Self::mark_fetching(&mut inner, &hash, key.resource())
    };

    tracing::debug!(key = %key.description(), "cache miss or stale, running loader");
    match loader().await {
      Ok(value) => {
        let json = serde_json::to_value(&value).map_err(|e| ApiError::Decode(e.to_string()))?;
        self.apply_fetch_success(&hash, started_rev, json);
        Ok(value)
      }
      Err(err) => {
        self.apply_fetch_failure(&hash, started_rev, err.kind());
        Err(err)
      }
    }
  }

  /// Transition the entry to `Fetching`, preserving any prior value, and
  /// return the revision the completion must present to be applied.
  fn mark_fetching(inner: &mut CacheInner, hash: &str, resource: &str) -> u64 {
    let entry = inner.entry_mut(hash, resource);
    entry.status = EntryStatus::Fetching;
    entry.revision
  }

  fn apply_fetch_success(&self, hash: &str, started_rev: u64, json: Value) {
    {
      let mut inner = self.inner();
      let Some(entry) = inner.entries.get_mut(hash) else { return };
      if entry.revision != started_rev {
        // A mutation wrote this key while the fetch was in flight; the
        // response is stale and must not overwrite the newer state.
        tracing::debug!(revision = entry.revision, started_rev, "stale fetch result discarded");
        return;
      }
      entry.value = Some(json);
      entry.status = EntryStatus::Fresh;
      entry.error = None;
      entry.last_updated = Utc::now();
      entry.revision += 1;
      inner
        .pending_events
        .push_back((hash.to_string(), CacheEvent::Updated(EntryStatus::Fresh)));
    }
    self.drain();
  }

  fn apply_fetch_failure(&self, hash: &str, started_rev: u64, kind: ErrorKind) {
    {
      let mut inner = self.inner();
      let Some(entry) = inner.entries.get_mut(hash) else { return };
      if entry.revision != started_rev {
        return;
      }
      // Keep any prior value servable; a failed refresh must not clear
      // good data.
      entry.status = EntryStatus::Error;
      entry.error = Some(kind);
      inner
        .pending_events
        .push_back((hash.to_string(), CacheEvent::Updated(EntryStatus::Error)));
    }
    self.drain();
  }

  /// Replace the entry's value, mark it `Fresh`, bump its revision, and
  /// notify subscribers of the key.
  pub fn write<K, T>(&self, key: &K, value: &T) -> Result<(), ApiError>
  where
    K: QueryKey,
    T: Serialize,
  {
    let json = serde_json::to_value(value).map_err(|e| ApiError::Decode(e.to_string()))?;
    let hash = key.cache_hash();
    {
      let mut inner = self.inner();
      let entry = inner.entry_mut(&hash, key.resource());
      entry.value = Some(json);
      entry.status = EntryStatus::Fresh;
      entry.error = None;
      entry.last_updated = Utc::now();
      entry.revision += 1;
      inner
        .pending_events
        .push_back((hash, CacheEvent::Updated(EntryStatus::Fresh)));
    }
    self.drain();
    Ok(())
  }

  /// Commit a write only if the key's revision still equals `expected_rev`.
  /// Returns whether the write was applied; a response for an older
  /// operation that arrives after a newer write is dropped here.
  pub(crate) fn write_guarded<K, T>(
    &self,
    key: &K,
    value: &T,
    expected_rev: u64,
  ) -> Result<bool, ApiError>
  where
    K: QueryKey,
    T: Serialize,
  {
    let json = serde_json::to_value(value).map_err(|e| ApiError::Decode(e.to_string()))?;
    let hash = key.cache_hash();
    let applied = {
      let mut inner = self.inner();
      let entry = inner.entry_mut(&hash, key.resource());
      if entry.revision != expected_rev {
        tracing::debug!(
          key = %key.description(),
          revision = entry.revision,
          expected_rev,
          "stale commit dropped"
        );
        false
      } else {
        entry.value = Some(json);
        entry.status = EntryStatus::Fresh;
        entry.error = None;
        entry.last_updated = Utc::now();
        entry.revision += 1;
        inner
          .pending_events
          .push_back((hash, CacheEvent::Updated(EntryStatus::Fresh)));
        true
      }
    };
    self.drain();
    Ok(applied)
  }

  /// Capture the rollback target for a mutation: the entry as it stands (if
  /// it holds a value) plus the key's current revision.
  pub(crate) fn snapshot<K: QueryKey>(&self, key: &K) -> (Option<EntrySnapshot>, u64) {
    let hash = key.cache_hash();
    let inner = self.inner();
    match inner.entries.get(&hash) {
      Some(entry) => {
        let snap = entry.value.as_ref().map(|value| EntrySnapshot {
          value: value.clone(),
          status: entry.status,
          error: entry.error,
          last_updated: entry.last_updated,
        });
        (snap, entry.revision)
      }
      None => (None, inner.tombstones.get(&hash).copied().unwrap_or(0)),
    }
  }

  /// Restore a snapshot exactly. Bumps the revision so completions raced
  /// against the rollback are discarded.
  pub(crate) fn restore<K: QueryKey>(&self, key: &K, snapshot: EntrySnapshot) {
    let hash = key.cache_hash();
    {
      let mut inner = self.inner();
      let entry = inner.entry_mut(&hash, key.resource());
      entry.value = Some(snapshot.value);
      entry.status = snapshot.status;
      entry.error = snapshot.error;
      entry.last_updated = snapshot.last_updated;
      entry.revision += 1;
      inner
        .pending_events
        .push_back((hash, CacheEvent::Updated(snapshot.status)));
    }
    self.drain();
  }

  /// Remove an entry (creation rollback or an optimistic delete). The key's
  /// revision survives as a tombstone so a later re-creation does not start
  /// from zero and resurrect in-flight completions.
  pub(crate) fn remove<K: QueryKey>(&self, key: &K) {
    let hash = key.cache_hash();
    {
      let mut inner = self.inner();
      let Some(entry) = inner.entries.remove(&hash) else { return };
      inner.tombstones.insert(hash.clone(), entry.revision + 1);
      inner.pending_events.push_back((hash, CacheEvent::Removed));
    }
    self.drain();
  }

  /// Mark the entry stale without deleting it; stale data stays servable
  /// until replaced. Idempotent: already-stale or absent keys are no-ops.
  pub fn invalidate<K: QueryKey>(&self, key: &K) {
    let hash = key.cache_hash();
    {
      let mut inner = self.inner();
      let Some(entry) = inner.entries.get_mut(&hash) else { return };
      if !matches!(entry.status, EntryStatus::Fresh | EntryStatus::Error) {
        return;
      }
      entry.status = EntryStatus::Stale;
      inner
        .pending_events
        .push_back((hash, CacheEvent::Updated(EntryStatus::Stale)));
    }
    self.drain();
  }

  /// Mark every entry under a resource tag stale. Used for dependent-key
  /// invalidation after a mutation commits.
  pub fn invalidate_resource(&self, resource: &str) {
    {
      let mut inner = self.inner();
      let mut events = Vec::new();
      for (hash, entry) in inner.entries.iter_mut() {
        if entry.resource == resource
          && matches!(entry.status, EntryStatus::Fresh | EntryStatus::Error)
        {
          entry.status = EntryStatus::Stale;
          events.push((hash.clone(), CacheEvent::Updated(EntryStatus::Stale)));
        }
      }
      inner.pending_events.extend(events);
    }
    self.drain();
  }

  /// Register a callback fired on every write/invalidate affecting `key`.
  pub fn subscribe<K, F>(&self, key: &K, callback: F) -> Subscription
  where
    K: QueryKey,
    F: Fn(CacheEvent) + Send + Sync + 'static,
  {
    let hash = key.cache_hash();
    let mut inner = self.inner();
    let id = inner.next_subscriber;
    inner.next_subscriber += 1;
    inner
      .subscribers
      .entry(hash.clone())
      .or_default()
      .push((id, Arc::new(callback)));
    Subscription { key_hash: hash, id }
  }

  pub fn unsubscribe(&self, subscription: Subscription) {
    let mut inner = self.inner();
    if let Some(subs) = inner.subscribers.get_mut(&subscription.key_hash) {
      subs.retain(|(id, _)| *id != subscription.id);
      if subs.is_empty() {
        inner.subscribers.remove(&subscription.key_hash);
      }
    }
  }

  /// Deliver queued notifications. Only the outermost caller drains; an
  /// operation triggered from inside a callback queues its events and
  /// returns, leaving delivery to the active drain loop.
  fn drain(&self) {
    loop {
      let (event, callbacks) = {
        let mut inner = self.inner();
        if inner.draining {
          return;
        }
        match inner.pending_events.pop_front() {
          Some((hash, event)) => {
            inner.draining = true;
            let callbacks: Vec<Callback> = inner
              .subscribers
              .get(&hash)
              .map(|subs| subs.iter().map(|(_, cb)| Arc::clone(cb)).collect())
              .unwrap_or_default();
            (event, callbacks)
          }
          None => return,
        }
      };
      for callback in callbacks {
        callback(event);
      }
      self.inner().draining = false;
    }
  }
}
