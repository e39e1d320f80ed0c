//! Production token refresher.
//!
//! The refresh endpoint uses the shared envelope but is unauthenticated
//! (the refresh token in the body is the credential), so it uses a bare
//! client rather than going through [`super::RemoteClient`] (which would
//! recurse into the session layer).

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use url::Url;

use crate::error::ApiError;
use crate::session::{TokenPair, TokenRefresher};

use super::client::read_envelope;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshPayload {
  access_token: String,
  refresh_token: String,
  /// Lifetime of the new access token in seconds, when the server reports
  /// it. Best-effort only.
  #[serde(default)]
  expires_in: Option<i64>,
}

/// Exchanges refresh tokens at `POST {base}/{path}`.
pub struct HttpRefresher {
  http: reqwest::Client,
  url: Url,
  timeout: Duration,
}

impl HttpRefresher {
  pub fn new(mut base: Url, path: &str) -> Result<Self, ApiError> {
    // Url::join drops the last path segment unless the base ends with '/'.
    if !base.path().ends_with('/') {
      let with_slash = format!("{}/", base.path());
      base.set_path(&with_slash);
    }
    let url = base
      .join(path.trim_start_matches('/'))
      .map_err(|err| ApiError::Network(format!("invalid refresh endpoint: {err}")))?;
    let http = reqwest::Client::builder()
      .build()
      .map_err(|err| ApiError::Network(err.to_string()))?;
    Ok(Self {
      http,
      url,
      timeout: Duration::from_secs(15),
    })
  }
}

#[async_trait]
impl TokenRefresher for HttpRefresher {
  async fn exchange(&self, refresh_token: &str) -> Result<TokenPair, ApiError> {
    let response = self
      .http
      .post(self.url.clone())
      .timeout(self.timeout)
      .json(&serde_json::json!({ "refreshToken": refresh_token }))
      .send()
      .await
      .map_err(ApiError::from)?;

    let (status, envelope) = read_envelope::<RefreshPayload>(response).await?;
    let payload = envelope.into_data(status)?;

    let mut pair = TokenPair::new(payload.access_token, payload.refresh_token);
    if let Some(seconds) = payload.expires_in {
      pair = pair.with_expiry(Utc::now() + chrono::Duration::seconds(seconds));
    }
    Ok(pair)
  }
}
