//! Error taxonomy for the synchronization layer.
//!
//! Every failure that crosses the remote boundary is classified into one of
//! these variants at a single seam ([`crate::remote::RemoteClient`]); the
//! cache and mutation layers attach consistency handling (rollback or
//! invalidation) and re-propagate the error unchanged. Server-provided
//! messages pass through verbatim.

use thiserror::Error;

/// A classified failure from the remote API or the session layer.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
  /// Transport failure or timeout. Never auto-retried here; the caller
  /// decides whether a manual retry is worthwhile.
  #[error("network error: {0}")]
  Network(String),

  /// 401-class rejection. Handled by exactly one refresh-and-retry cycle;
  /// a second rejection after a successful refresh escalates to
  /// [`ApiError::SessionExpired`].
  #[error("authentication rejected: {0}")]
  Auth(String),

  /// 400-class rejection. Not retried; surfaced verbatim.
  #[error("validation failed: {0}")]
  Validation(String),

  /// 409-class rejection, e.g. a delete blocked by foreign references.
  /// The server's reason is preserved so callers can present it.
  #[error("{0}")]
  Conflict(String),

  /// 404-class rejection. Signals that the resource no longer exists
  /// server-side; the cache invalidates the key instead of rolling back.
  #[error("not found: {0}")]
  NotFound(String),

  /// 5xx-class failure. Eligible for caller-driven manual retry.
  #[error("server error: {0}")]
  Server(String),

  /// The session is anonymous or expired; no request can be issued until a
  /// new login.
  #[error("no credentials available")]
  NoCredentials,

  /// The refresh token was rejected, or the server rejected a freshly
  /// refreshed access token. Must propagate to a point that can force
  /// re-authentication.
  #[error("session expired")]
  SessionExpired,

  /// The response did not conform to the envelope contract.
  #[error("malformed response: {0}")]
  Decode(String),

  /// Token persistence failed.
  #[error("session storage: {0}")]
  Storage(String),
}

impl ApiError {
  /// Classify an HTTP status, carrying the server's message through
  /// unaltered. A `success: false` envelope on a 2xx response lands in
  /// `Validation` (the server reported an application-level rejection
  /// without a more specific status).
  pub fn from_status(status: u16, message: String) -> Self {
    match status {
      401 => ApiError::Auth(message),
      404 => ApiError::NotFound(message),
      409 => ApiError::Conflict(message),
      500..=599 => ApiError::Server(message),
      _ => ApiError::Validation(message),
    }
  }

  /// The lightweight discriminant recorded in cache entries.
  pub fn kind(&self) -> ErrorKind {
    match self {
      ApiError::Network(_) => ErrorKind::Network,
      ApiError::Auth(_) => ErrorKind::Auth,
      ApiError::Validation(_) => ErrorKind::Validation,
      ApiError::Conflict(_) => ErrorKind::Conflict,
      ApiError::NotFound(_) => ErrorKind::NotFound,
      ApiError::Server(_) => ErrorKind::Server,
      ApiError::NoCredentials | ApiError::SessionExpired => ErrorKind::Session,
      ApiError::Decode(_) => ErrorKind::Decode,
      ApiError::Storage(_) => ErrorKind::Storage,
    }
  }
}

impl From<reqwest::Error> for ApiError {
  fn from(err: reqwest::Error) -> Self {
    // Timeouts are network failures by contract, never an auth condition,
    // so they can never trigger a token refresh.
    if err.is_decode() {
      ApiError::Decode(err.to_string())
    } else {
      ApiError::Network(err.to_string())
    }
  }
}

/// Error discriminant stored alongside cache entries in the `Error` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  Network,
  Auth,
  Validation,
  Conflict,
  NotFound,
  Server,
  Session,
  Decode,
  Storage,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_status_classification() {
    assert!(matches!(
      ApiError::from_status(400, "bad".into()),
      ApiError::Validation(_)
    ));
    assert!(matches!(ApiError::from_status(401, "no".into()), ApiError::Auth(_)));
    assert!(matches!(
      ApiError::from_status(404, "gone".into()),
      ApiError::NotFound(_)
    ));
    assert!(matches!(
      ApiError::from_status(409, "in use".into()),
      ApiError::Conflict(_)
    ));
    assert!(matches!(
      ApiError::from_status(503, "down".into()),
      ApiError::Server(_)
    ));
  }

  #[test]
  fn test_conflict_message_passes_through() {
    let err = ApiError::from_status(409, "Category has artworks".into());
    assert_eq!(err.to_string(), "Category has artworks");
  }

  #[test]
  fn test_session_errors_share_kind() {
    assert_eq!(ApiError::NoCredentials.kind(), ErrorKind::Session);
    assert_eq!(ApiError::SessionExpired.kind(), ErrorKind::Session);
  }
}
