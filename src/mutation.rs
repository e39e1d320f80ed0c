//! Optimistic mutation orchestration.
//!
//! Each mutation runs the state machine
//! `Applying → {Committing | RollingBack} → Settled`:
//!
//! 1. capture the rollback target (snapshot plus revision), then write the
//!    optimistic value so readers see the change before server confirmation
//! 2. dispatch the remote call (which may transparently pass through the
//!    session layer's refresh-and-retry)
//! 3. on success, commit the authoritative server value (revision-guarded,
//!    so a response raced past a newer write is dropped) and invalidate
//!    dependent resource tags
//! 4. on failure, restore the snapshot exactly (or remove the speculative
//!    entry when the mutation created it) and surface the classified error
//!
//! Mutations on the same key are serialized: a second mutation waits for the
//! first to settle before capturing its snapshot, otherwise its rollback
//! could restore an already-stale value. Mutations on different keys proceed
//! independently.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use serde::{de::DeserializeOwned, Serialize};

use crate::cache::{QueryCache, QueryKey};
use crate::error::ApiError;

/// Orchestrates optimistic writes into a [`QueryCache`] around remote calls.
///
/// Cheap to clone; clones share the same per-key locks.
#[derive(Clone)]
pub struct MutationExecutor {
  cache: QueryCache,
  locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl MutationExecutor {
  pub fn new(cache: QueryCache) -> Self {
    Self {
      cache,
      locks: Arc::new(Mutex::new(HashMap::new())),
    }
  }

  pub fn cache(&self) -> &QueryCache {
    &self.cache
  }

  fn key_lock(&self, hash: &str) -> Arc<tokio::sync::Mutex<()>> {
    let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
    Arc::clone(
      locks
        .entry(hash.to_string())
        .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
    )
  }

  /// Evict the key's lock entry once the mutation settles, unless another
  /// mutation holds or awaits it. Keeps the map from growing without bound
  /// across distinct keys.
  fn release_key_lock(&self, hash: &str, lock: Arc<tokio::sync::Mutex<()>>) {
    let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
    // One reference in the map plus the one held here; any more means a
    // waiter cloned the lock and still needs it.
    if Arc::strong_count(&lock) == 2 {
      locks.remove(hash);
    }
  }

  #[cfg(test)]
  fn lock_count(&self) -> usize {
    self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
  }

  /// Run one optimistic mutation against `key`.
  ///
  /// `send` dispatches the remote write and resolves to the authoritative
  /// server value, which replaces the optimistic guess on commit (the two
  /// may differ, e.g. server-assigned identifiers or computed fields).
  /// `invalidates` lists the resource tags whose cached queries embed this
  /// mutation's resource and must be marked stale after a commit.
  pub async fn execute<K, T, F, Fut>(
    &self,
    key: &K,
    optimistic: T,
    invalidates: &[&str],
    send: F,
  ) -> Result<T, ApiError>
  where
    K: QueryKey,
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
  {
    let hash = key.cache_hash();
    let lock = self.key_lock(&hash);
    let result = {
      let _serialized = lock.lock().await;
      self.settle(key, optimistic, invalidates, send).await
    };
    self.release_key_lock(&hash, lock);
    result
  }

  async fn settle<K, T, F, Fut>(
    &self,
    key: &K,
    optimistic: T,
    invalidates: &[&str],
    send: F,
  ) -> Result<T, ApiError>
  where
    K: QueryKey,
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
  {
    // Applying: snapshot first, then let readers see the change.
    let (snapshot, base_rev) = self.cache.snapshot(key);
    self.cache.write(key, &optimistic)?;
    let commit_rev = base_rev + 1;

    match send().await {
      Ok(server_value) => {
        let applied = self.cache.write_guarded(key, &server_value, commit_rev)?;
        if !applied {
          tracing::debug!(key = %key.description(), "commit superseded by a newer write");
        }
        for resource in invalidates {
          self.cache.invalidate_resource(resource);
        }
        Ok(server_value)
      }
      Err(ApiError::NotFound(message)) => {
        // The resource no longer exists server-side; rolling back would
        // resurrect it locally. Invalidate instead.
        tracing::debug!(key = %key.description(), "mutation target gone, invalidating");
        self.cache.invalidate(key);
        Err(ApiError::NotFound(message))
      }
      Err(err) => {
        tracing::debug!(key = %key.description(), %err, "mutation failed, rolling back");
        match snapshot {
          Some(snap) => self.cache.restore(key, snap),
          None => self.cache.remove(key),
        }
        Err(err)
      }
    }
  }

  /// Optimistic removal (delete mutation): the entry disappears from the
  /// cache immediately and is restored if the server refuses the delete.
  pub async fn execute_removal<K, F, Fut>(
    &self,
    key: &K,
    invalidates: &[&str],
    send: F,
  ) -> Result<(), ApiError>
  where
    K: QueryKey,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<(), ApiError>>,
  {
    let hash = key.cache_hash();
    let lock = self.key_lock(&hash);
    let result = {
      let _serialized = lock.lock().await;
      self.settle_removal(key, invalidates, send).await
    };
    self.release_key_lock(&hash, lock);
    result
  }

  async fn settle_removal<K, F, Fut>(
    &self,
    key: &K,
    invalidates: &[&str],
    send: F,
  ) -> Result<(), ApiError>
  where
    K: QueryKey,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<(), ApiError>>,
  {
    let (snapshot, _rev) = self.cache.snapshot(key);
    self.cache.remove(key);

    match send().await {
      Ok(()) => {
        for resource in invalidates {
          self.cache.invalidate_resource(resource);
        }
        Ok(())
      }
      // Already gone server-side: the local removal stands.
      Err(ApiError::NotFound(message)) => Err(ApiError::NotFound(message)),
      Err(err) => {
        tracing::debug!(key = %key.description(), %err, "delete refused, restoring entry");
        if let Some(snap) = snapshot {
          self.cache.restore(key, snap);
        }
        Err(err)
      }
    }
  }
}
