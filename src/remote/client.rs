//! HTTP boundary: token attachment, envelope validation, refresh-and-retry.
//!
//! Every response is validated against the envelope contract here, at one
//! seam, so no shape-guessing leaks into the layers above. Authorization
//! handling is equally centralized: a 401 triggers exactly one
//! refresh-and-retry cycle; a second 401 after a successful refresh is a
//! hard session failure (the session is invalidated and
//! [`ApiError::SessionExpired`] propagates).

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::envelope::{Envelope, Paged};
use crate::error::ApiError;
use crate::session::SessionManager;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Read the body and parse the envelope. Error bodies that do not parse as
/// an envelope still classify by their HTTP status.
pub(super) async fn read_envelope<T: DeserializeOwned>(
  response: reqwest::Response,
) -> Result<(u16, Envelope<T>), ApiError> {
  let status = response.status().as_u16();
  let bytes = response.bytes().await.map_err(ApiError::from)?;
  match serde_json::from_slice::<Envelope<T>>(&bytes) {
    Ok(envelope) => Ok((status, envelope)),
    Err(_) if !(200..300).contains(&status) => {
      Err(ApiError::from_status(status, format!("HTTP {status}")))
    }
    Err(err) => Err(ApiError::Decode(err.to_string())),
  }
}

/// Client for the remote API, scoped to one principal's session.
#[derive(Clone)]
pub struct RemoteClient {
  http: reqwest::Client,
  base: Url,
  session: Arc<SessionManager>,
  timeout: Duration,
}

impl RemoteClient {
  pub fn new(mut base: Url, session: Arc<SessionManager>) -> Result<Self, ApiError> {
    // Url::join drops the last path segment unless the base ends with '/'.
    if !base.path().ends_with('/') {
      let path = format!("{}/", base.path());
      base.set_path(&path);
    }
    let http = reqwest::Client::builder()
      .build()
      .map_err(|err| ApiError::Network(err.to_string()))?;
    Ok(Self {
      http,
      base,
      session,
      timeout: DEFAULT_TIMEOUT,
    })
  }

  /// Override the default per-request timeout.
  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn session(&self) -> &Arc<SessionManager> {
    &self.session
  }

  fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
    self
      .base
      .join(path.trim_start_matches('/'))
      .map_err(|err| ApiError::Network(format!("invalid endpoint {path}: {err}")))
  }

  /// Issue the request with the current token; on a 401, refresh once and
  /// retry with the new token. The builder runs per attempt because a
  /// request cannot be re-sent once consumed.
  async fn send_with_refresh(
    &self,
    build: impl Fn(&str) -> Result<reqwest::RequestBuilder, ApiError>,
  ) -> Result<reqwest::Response, ApiError> {
    let (token, generation) = self.session.token_snapshot().await?;
    let response = build(&token)?.send().await.map_err(ApiError::from)?;
    if response.status() != StatusCode::UNAUTHORIZED {
      return Ok(response);
    }

    tracing::debug!("401 received, refreshing and retrying once");
    let token = self.session.refresh_from(generation).await?;
    let response = build(&token)?.send().await.map_err(ApiError::from)?;
    if response.status() == StatusCode::UNAUTHORIZED {
      tracing::warn!("401 after successful refresh, invalidating session");
      self.session.invalidate().await;
      return Err(ApiError::SessionExpired);
    }
    Ok(response)
  }

  async fn dispatch<T: DeserializeOwned>(
    &self,
    method: Method,
    path: &str,
    body: Option<Value>,
    timeout: Option<Duration>,
  ) -> Result<(u16, Envelope<T>), ApiError> {
    let url = self.endpoint(path)?;
    let timeout = timeout.unwrap_or(self.timeout);

    let response = self
      .send_with_refresh(|token| {
        let mut request = self
          .http
          .request(method.clone(), url.clone())
          .bearer_auth(token)
          .timeout(timeout);
        if let Some(body) = &body {
          request = request.json(body);
        }
        Ok(request)
      })
      .await?;
    read_envelope(response).await
  }

  pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
    self.get_with_timeout(path, None).await
  }

  /// GET with a caller-supplied timeout. A timeout classifies as
  /// [`ApiError::Network`], never as an authorization failure, so it can
  /// never trigger a refresh.
  pub async fn get_with_timeout<T: DeserializeOwned>(
    &self,
    path: &str,
    timeout: Option<Duration>,
  ) -> Result<T, ApiError> {
    let (status, envelope) = self.dispatch(Method::GET, path, None, timeout).await?;
    envelope.into_data(status)
  }

  /// GET a list endpoint, keeping its pagination metadata.
  pub async fn get_paged<T: DeserializeOwned>(&self, path: &str) -> Result<Paged<T>, ApiError> {
    let (status, envelope) = self
      .dispatch::<Vec<T>>(Method::GET, path, None, None)
      .await?;
    envelope.into_paged(status)
  }

  pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
  where
    T: DeserializeOwned,
    B: Serialize,
  {
    let body = serde_json::to_value(body).map_err(|e| ApiError::Decode(e.to_string()))?;
    let (status, envelope) = self.dispatch(Method::POST, path, Some(body), None).await?;
    envelope.into_data(status)
  }

  pub async fn put<T, B>(&self, path: &str, body: &B) -> Result<T, ApiError>
  where
    T: DeserializeOwned,
    B: Serialize,
  {
    let body = serde_json::to_value(body).map_err(|e| ApiError::Decode(e.to_string()))?;
    let (status, envelope) = self.dispatch(Method::PUT, path, Some(body), None).await?;
    envelope.into_data(status)
  }

  /// DELETE; the envelope carries no payload.
  pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
    let (status, envelope) = self
      .dispatch::<Value>(Method::DELETE, path, None, None)
      .await?;
    envelope.into_unit(status)
  }

  /// Multipart upload. The form is rebuilt per attempt since multipart
  /// bodies are consumed on send.
  pub async fn upload<T: DeserializeOwned>(
    &self,
    path: &str,
    field: &str,
    filename: &str,
    content_type: &str,
    bytes: Vec<u8>,
  ) -> Result<T, ApiError> {
    let url = self.endpoint(path)?;
    let response = self
      .send_with_refresh(|token| {
        let part = reqwest::multipart::Part::bytes(bytes.clone())
          .file_name(filename.to_string())
          .mime_str(content_type)
          .map_err(|err| ApiError::Decode(format!("invalid content type: {err}")))?;
        let form = reqwest::multipart::Form::new().part(field.to_string(), part);
        Ok(
          self
            .http
            .post(url.clone())
            .bearer_auth(token)
            .timeout(self.timeout)
            .multipart(form),
        )
      })
      .await?;
    let (status, envelope) = read_envelope(response).await?;
    envelope.into_data(status)
  }
}
