//! Gallery resource types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
  pub id: String,
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artwork {
  pub id: String,
  pub title: String,
  pub category_id: String,
  /// URL of the uploaded image, absent until one exists. During an upload
  /// this holds a `pending://` placeholder until the server answers with the
  /// real reference.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub image_url: Option<String>,
  /// Server-stamped; absent on speculative entries until the commit swaps
  /// in the authoritative value.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub updated_at: Option<DateTime<Utc>>,
}

/// Payload for creating an artwork; the server assigns the identifier.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtworkDraft {
  pub title: String,
  pub category_id: String,
}

impl ArtworkDraft {
  /// Speculative entry shown under a local identifier while the creation is
  /// in flight.
  pub(crate) fn speculative(&self, local_id: &str) -> Artwork {
    Artwork {
      id: local_id.to_string(),
      title: self.title.clone(),
      category_id: self.category_id.clone(),
      image_url: None,
      updated_at: None,
    }
  }
}

/// Placeholder image reference used as the optimistic value during uploads.
pub(crate) fn placeholder_image(filename: &str) -> String {
  format!("pending://{filename}")
}
