//! The response envelope shared by every API endpoint.
//!
//! All endpoints answer with the same shape:
//!
//! ```json
//! { "success": bool, "message": "...", "data": ..., "pagination": {...} }
//! ```
//!
//! The envelope is validated once, at the [`crate::remote::RemoteClient`]
//! boundary. A `success: false` body or a non-2xx status is an application
//! error regardless of transport success; responses that do not parse as an
//! envelope are rejected as [`ApiError::Decode`].

use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Pagination metadata attached to list responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
  pub page: u32,
  pub limit: u32,
  pub total: u64,
  #[serde(rename = "totalPages")]
  pub total_pages: u32,
}

/// The wire envelope. `data` is absent on failures and on mutations that
/// return no body (deletes).
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
  pub success: bool,
  #[serde(default)]
  pub message: Option<String>,
  // No serde(default) here: it would add a `T: Default` bound to the
  // Deserialize impl, and a missing Option field is None regardless.
  pub data: Option<T>,
  #[serde(default)]
  pub pagination: Option<Pagination>,
}

/// A page of results together with its pagination metadata. Serializable so
/// whole pages can live in the query cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paged<T> {
  pub items: Vec<T>,
  pub pagination: Option<Pagination>,
}

impl<T> Envelope<T> {
  fn failure(status: u16, message: Option<String>) -> ApiError {
    ApiError::from_status(
      status,
      message.unwrap_or_else(|| "request failed".to_string()),
    )
  }

  /// Extract the payload. A `success: false` body or a non-2xx status is a
  /// failure regardless of the other, classified by `status`.
  pub fn into_data(self, status: u16) -> Result<T, ApiError> {
    if !self.success || !(200..300).contains(&status) {
      return Err(Self::failure(status, self.message));
    }
    self
      .data
      .ok_or_else(|| ApiError::Decode("success envelope without data".to_string()))
  }

  /// Accept an envelope that carries no payload (delete-style mutations).
  pub fn into_unit(self, status: u16) -> Result<(), ApiError> {
    if !self.success || !(200..300).contains(&status) {
      return Err(Self::failure(status, self.message));
    }
    Ok(())
  }
}

impl<T> Envelope<Vec<T>> {
  /// Extract a list payload with its pagination metadata.
  pub fn into_paged(mut self, status: u16) -> Result<Paged<T>, ApiError> {
    let pagination = self.pagination.take();
    let items = self.into_data(status)?;
    Ok(Paged { items, pagination })
  }
}
