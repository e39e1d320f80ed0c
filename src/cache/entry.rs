//! Cache entry types and freshness states.

use chrono::{DateTime, Utc};

use crate::error::ErrorKind;

/// Freshness of a cached entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
  /// Server truth as of `last_updated`.
  Fresh,
  /// Invalidated but still servable until replaced (no UI flash).
  Stale,
  /// A loader is in flight for this key.
  Fetching,
  /// The most recent fetch failed; any prior value is preserved.
  Error,
}

/// Typed view of one cached entry. Owned exclusively by the cache; callers
/// receive clones and write back only through the cache's API.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
  pub value: T,
  pub status: EntryStatus,
  pub last_updated: DateTime<Utc>,
  pub error: Option<ErrorKind>,
}

/// Outcome of a non-blocking read.
#[derive(Debug)]
pub enum ReadState<T> {
  /// The entry was present; any status, including stale.
  Hit(CacheEntry<T>),
  /// No value yet; a fetch is registered (or already running) and will
  /// populate the cache; subscribers are notified when it lands.
  Pending,
}

impl<T> ReadState<T> {
  pub fn is_pending(&self) -> bool {
    matches!(self, ReadState::Pending)
  }

  pub fn entry(self) -> Option<CacheEntry<T>> {
    match self {
      ReadState::Hit(entry) => Some(entry),
      ReadState::Pending => None,
    }
  }
}
