//! Optimistic query cache: the keyed store of fetched collections and
//! entities.
//!
//! This module is deliberately resource-agnostic:
//! - entries are identified by a [`QueryKey`] (structural identity, hashed)
//! - values are cached as serialized JSON with freshness metadata
//! - invalidation marks entries stale without deleting them
//! - subscribers observe writes and invalidations per key

mod entry;
mod store;
mod traits;

pub use entry::{CacheEntry, EntryStatus, ReadState};
pub use store::{CacheEvent, QueryCache, Subscription};
pub use traits::QueryKey;
