//! Durable token storage.
//!
//! A store instance is scoped to one principal; the admin and visitor
//! sessions never share a store. Exactly two durable fields are kept per
//! principal: `accessToken` and `refreshToken`. The best-effort expiry
//! hint lives only in memory.

use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// The authenticated identity owning a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Principal {
  Admin,
  Visitor,
}

impl Principal {
  pub fn as_str(&self) -> &'static str {
    match self {
      Principal::Admin => "admin",
      Principal::Visitor => "visitor",
    }
  }
}

impl std::fmt::Display for Principal {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Access/refresh pair. Fully present or fully absent; a partial pair
/// found in storage is invalid and forces the session into `Expired`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
  pub access_token: String,
  pub refresh_token: String,
  /// Best-effort expiry hint; not persisted.
  #[serde(skip)]
  pub expires_at: Option<DateTime<Utc>>,
}

impl TokenPair {
  pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
    Self {
      access_token: access_token.into(),
      refresh_token: refresh_token.into(),
      expires_at: None,
    }
  }

  pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
    self.expires_at = Some(expires_at);
    self
  }
}

/// Storage backend for one principal's token pair. Pure storage, no logic.
#[async_trait]
pub trait TokenStore: Send + Sync {
  /// Load the stored pair. A partially stored pair (one field without the
  /// other) is an error; the session manager reacts by invalidating.
  async fn load(&self) -> Result<Option<TokenPair>, ApiError>;

  async fn save(&self, pair: &TokenPair) -> Result<(), ApiError>;

  async fn clear(&self) -> Result<(), ApiError>;
}

/// In-memory store. Used in tests and for sessions that should not outlive
/// the process.
#[derive(Default)]
pub struct MemoryTokenStore {
  slot: Mutex<Option<TokenPair>>,
}

impl MemoryTokenStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
  async fn load(&self) -> Result<Option<TokenPair>, ApiError> {
    Ok(self.slot.lock().unwrap_or_else(|e| e.into_inner()).clone())
  }

  async fn save(&self, pair: &TokenPair) -> Result<(), ApiError> {
    *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(pair.clone());
    Ok(())
  }

  async fn clear(&self) -> Result<(), ApiError> {
    *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = None;
    Ok(())
  }
}

/// Loose mirror of the persisted shape, used to detect partial pairs
/// instead of silently failing to parse them.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPair {
  #[serde(default)]
  access_token: Option<String>,
  #[serde(default)]
  refresh_token: Option<String>,
}

/// File-backed store: one JSON document per principal under the
/// platform data directory.
pub struct FileTokenStore {
  path: PathBuf,
}

impl FileTokenStore {
  /// Create a store at the default location for `principal`.
  pub fn open(principal: Principal) -> Result<Self, ApiError> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| ApiError::Storage("could not determine data directory".to_string()))?;
    Ok(Self::at(
      data_dir
        .join("atelier")
        .join(format!("session-{}.json", principal.as_str())),
    ))
  }

  /// Create a store at an explicit path.
  pub fn at(path: PathBuf) -> Self {
    Self { path }
  }
}

#[async_trait]
impl TokenStore for FileTokenStore {
  async fn load(&self) -> Result<Option<TokenPair>, ApiError> {
    let contents = match tokio::fs::read_to_string(&self.path).await {
      Ok(contents) => contents,
      Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
      Err(err) => {
        return Err(ApiError::Storage(format!(
          "failed to read {}: {err}",
          self.path.display()
        )))
      }
    };

    let raw: RawPair = serde_json::from_str(&contents)
      .map_err(|err| ApiError::Storage(format!("corrupt session file: {err}")))?;

    match (raw.access_token, raw.refresh_token) {
      (Some(access_token), Some(refresh_token)) => Ok(Some(TokenPair {
        access_token,
        refresh_token,
        expires_at: None,
      })),
      (None, None) => Ok(None),
      _ => Err(ApiError::Storage("partial token pair in storage".to_string())),
    }
  }

  async fn save(&self, pair: &TokenPair) -> Result<(), ApiError> {
    if let Some(parent) = self.path.parent() {
      tokio::fs::create_dir_all(parent)
        .await
        .map_err(|err| ApiError::Storage(format!("failed to create session dir: {err}")))?;
    }
    let contents = serde_json::to_string(pair).map_err(|err| ApiError::Storage(err.to_string()))?;
    tokio::fs::write(&self.path, contents)
      .await
      .map_err(|err| {
        ApiError::Storage(format!("failed to write {}: {err}", self.path.display()))
      })
  }

  async fn clear(&self) -> Result<(), ApiError> {
    match tokio::fs::remove_file(&self.path).await {
      Ok(()) => Ok(()),
      Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(err) => Err(ApiError::Storage(format!(
        "failed to remove {}: {err}",
        self.path.display()
      ))),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn scratch_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("atelier-sync-test-{}-{name}.json", std::process::id()))
  }

  #[tokio::test]
  async fn test_file_store_roundtrip() {
    let store = FileTokenStore::at(scratch_path("roundtrip"));
    store.clear().await.unwrap();

    assert!(store.load().await.unwrap().is_none());

    let pair = TokenPair::new("access-1", "refresh-1");
    store.save(&pair).await.unwrap();

    let loaded = store.load().await.unwrap().unwrap();
    assert_eq!(loaded.access_token, "access-1");
    assert_eq!(loaded.refresh_token, "refresh-1");
    // The expiry hint is in-memory only.
    assert!(loaded.expires_at.is_none());

    store.clear().await.unwrap();
    assert!(store.load().await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_partial_pair_is_rejected() {
    let path = scratch_path("partial");
    tokio::fs::write(&path, r#"{"accessToken":"only-half"}"#)
      .await
      .unwrap();

    let store = FileTokenStore::at(path.clone());
    assert!(matches!(store.load().await, Err(ApiError::Storage(_))));

    tokio::fs::remove_file(&path).await.ok();
  }

  #[tokio::test]
  async fn test_persisted_shape_has_exactly_two_keys() {
    let pair = TokenPair::new("a", "r").with_expiry(Utc::now());
    let json: serde_json::Value = serde_json::from_str(&serde_json::to_string(&pair).unwrap()).unwrap();
    let object = json.as_object().unwrap();
    assert_eq!(object.len(), 2);
    assert!(object.contains_key("accessToken"));
    assert!(object.contains_key("refreshToken"));
  }
}
