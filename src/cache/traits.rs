//! Key trait for the query cache.

use sha2::{Digest, Sha256};

/// Structural identity of one logical read.
///
/// Implementors enumerate their query shapes (resource type plus filter and
/// pagination parameters) and render them into a normalized component
/// string; two keys with identical components hash identically.
pub trait QueryKey {
  /// Resource tag grouping related keys (e.g. "artwork"). Mutations declare
  /// the tags they invalidate, which marks every key under those tags stale.
  fn resource(&self) -> &'static str;

  /// Normalized components of the key. Structural equality is defined over
  /// this string.
  fn components(&self) -> String;

  /// Human-readable form for logging.
  fn description(&self) -> String;

  /// Stable fixed-length cache key derived from the components.
  fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.resource().as_bytes());
    hasher.update(b":");
    hasher.update(self.components().as_bytes());
    hex::encode(hasher.finalize())
  }
}
