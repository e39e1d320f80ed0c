//! Session lifecycle: token custody and single-flight refresh.
//!
//! States: `Anonymous → Authenticated → Refreshing → (Authenticated |
//! Expired)`. `Expired` is terminal until a new [`SessionManager::login`].
//!
//! The central correctness property is the single-flight refresh: however
//! many requests race into a token expiry, exactly one refresh call goes
//! over the wire and every waiter observes its outcome. This is implemented
//! with a refresh gate (an async mutex) plus a generation counter; a caller
//! that acquires the gate and finds the generation already advanced knows
//! another caller refreshed on its behalf.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::ApiError;

use super::store::{Principal, TokenPair, TokenStore};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
  /// No credentials have ever been provided.
  Anonymous,
  /// A token pair is held and believed valid.
  Authenticated,
  /// A refresh is in flight; callers await its shared outcome.
  Refreshing,
  /// The refresh token was rejected or the session was invalidated.
  /// Terminal until a new login.
  Expired,
}

/// Exchanges a refresh token for a fresh pair at the API's refresh
/// endpoint. Behind a trait so the session logic is testable without a
/// server; the production implementation lives in [`crate::remote`].
#[async_trait]
pub trait TokenRefresher: Send + Sync {
  async fn exchange(&self, refresh_token: &str) -> Result<TokenPair, ApiError>;
}

struct SessionInner {
  state: SessionState,
  tokens: Option<TokenPair>,
  /// Bumped on every refresh settlement, login, and invalidation. Lets a
  /// gate waiter detect that the refresh it queued for already happened.
  generation: u64,
}

/// Owner of one principal's token pair.
pub struct SessionManager {
  principal: Principal,
  store: Arc<dyn TokenStore>,
  refresher: Arc<dyn TokenRefresher>,
  inner: Mutex<SessionInner>,
  refresh_gate: tokio::sync::Mutex<()>,
}

impl SessionManager {
  pub fn new(
    principal: Principal,
    store: Arc<dyn TokenStore>,
    refresher: Arc<dyn TokenRefresher>,
  ) -> Self {
    Self {
      principal,
      store,
      refresher,
      inner: Mutex::new(SessionInner {
        state: SessionState::Anonymous,
        tokens: None,
        generation: 0,
      }),
      refresh_gate: tokio::sync::Mutex::new(()),
    }
  }

  fn inner(&self) -> MutexGuard<'_, SessionInner> {
    self.inner.lock().unwrap_or_else(|e| e.into_inner())
  }

  pub fn principal(&self) -> Principal {
    self.principal
  }

  pub fn state(&self) -> SessionState {
    self.inner().state
  }

  /// Adopt a previously persisted pair, if any. A partial pair in storage
  /// violates the all-or-nothing invariant and forces `Expired`.
  pub async fn restore(&self) -> Result<(), ApiError> {
    match self.store.load().await {
      Ok(Some(pair)) => {
        tracing::debug!(principal = %self.principal, "restored persisted session");
        let mut inner = self.inner();
        inner.tokens = Some(pair);
        inner.state = SessionState::Authenticated;
        inner.generation += 1;
        Ok(())
      }
      Ok(None) => Ok(()),
      Err(err) => {
        tracing::warn!(principal = %self.principal, %err, "unusable persisted session, invalidating");
        self.invalidate().await;
        Ok(())
      }
    }
  }

  /// Install a fresh pair after authentication and persist it.
  pub async fn login(&self, pair: TokenPair) -> Result<(), ApiError> {
    self.store.save(&pair).await?;
    let mut inner = self.inner();
    inner.tokens = Some(pair);
    inner.state = SessionState::Authenticated;
    inner.generation += 1;
    tracing::debug!(principal = %self.principal, "session authenticated");
    Ok(())
  }

  /// Force `Expired` and clear the pair regardless of current state. Used
  /// on logout and on an unrecoverable 401-after-refresh.
  pub async fn invalidate(&self) {
    {
      let mut inner = self.inner();
      inner.tokens = None;
      inner.state = SessionState::Expired;
      inner.generation += 1;
    }
    if let Err(err) = self.store.clear().await {
      tracing::warn!(principal = %self.principal, %err, "failed to clear persisted session");
    }
    tracing::debug!(principal = %self.principal, "session invalidated");
  }

  /// The access token to attach to the next request.
  ///
  /// `Authenticated` returns the held token (refreshing proactively when
  /// the best-effort expiry hint has passed); `Refreshing` awaits the
  /// shared in-flight refresh; `Anonymous`/`Expired` fail immediately with
  /// [`ApiError::NoCredentials`] and no network call.
  pub async fn current_token(&self) -> Result<String, ApiError> {
    {
      let inner = self.inner();
      match inner.state {
        SessionState::Anonymous | SessionState::Expired => return Err(ApiError::NoCredentials),
        SessionState::Authenticated => {
          let pair = inner.tokens.as_ref().ok_or(ApiError::NoCredentials)?;
          let expired = pair.expires_at.is_some_and(|at| at <= Utc::now());
          if !expired {
            return Ok(pair.access_token.clone());
          }
          // Known-expired: fall through to refresh instead of issuing a
          // request that will bounce.
        }
        SessionState::Refreshing => {}
      }
    }
    self.refresh().await
  }

  /// The access token plus the generation it belongs to. The generation is
  /// what a caller hands back to [`Self::refresh_from`] after a 401, so a
  /// rejection of an already-replaced token does not trigger a second
  /// exchange.
  pub(crate) async fn token_snapshot(&self) -> Result<(String, u64), ApiError> {
    let token = self.current_token().await?;
    let generation = self.inner().generation;
    Ok((token, generation))
  }

  /// Renew the token pair, returning the new access token.
  ///
  /// Single-flight: concurrent callers collapse into one network exchange.
  /// On success the pair is atomically replaced and persisted; on failure
  /// the session transitions to `Expired` and the pair is cleared.
  pub async fn refresh(&self) -> Result<String, ApiError> {
    let observed_generation = {
      let inner = self.inner();
      match inner.state {
        SessionState::Anonymous | SessionState::Expired => return Err(ApiError::NoCredentials),
        SessionState::Authenticated | SessionState::Refreshing => inner.generation,
      }
    };
    self.refresh_from(observed_generation).await
  }

  /// Refresh on behalf of a caller whose token of `observed_generation` was
  /// rejected. If the pair has already been replaced since, the current
  /// token is returned without another exchange.
  pub(crate) async fn refresh_from(&self, observed_generation: u64) -> Result<String, ApiError> {
    {
      let inner = self.inner();
      if let SessionState::Anonymous | SessionState::Expired = inner.state {
        return Err(ApiError::NoCredentials);
      }
    }

    let _gate = self.refresh_gate.lock().await;

    let refresh_token = {
      let mut inner = self.inner();
      if inner.generation != observed_generation {
        // Another caller settled a refresh while we waited for the gate;
        // share its outcome instead of issuing a second exchange.
        return match (&inner.state, &inner.tokens) {
          (SessionState::Authenticated, Some(pair)) => Ok(pair.access_token.clone()),
          _ => Err(ApiError::SessionExpired),
        };
      }
      let refresh_token = inner
        .tokens
        .as_ref()
        .ok_or(ApiError::NoCredentials)?
        .refresh_token
        .clone();
      inner.state = SessionState::Refreshing;
      refresh_token
    };

    tracing::debug!(principal = %self.principal, "refreshing session");
    match self.refresher.exchange(&refresh_token).await {
      Ok(pair) => {
        {
          let mut inner = self.inner();
          inner.tokens = Some(pair.clone());
          inner.state = SessionState::Authenticated;
          inner.generation += 1;
        }
        if let Err(err) = self.store.save(&pair).await {
          tracing::warn!(principal = %self.principal, %err, "failed to persist refreshed tokens");
        }
        tracing::debug!(principal = %self.principal, "session refreshed");
        Ok(pair.access_token)
      }
      Err(err) => {
        tracing::warn!(principal = %self.principal, %err, "refresh rejected, session expired");
        {
          let mut inner = self.inner();
          inner.tokens = None;
          inner.state = SessionState::Expired;
          inner.generation += 1;
        }
        if let Err(err) = self.store.clear().await {
          tracing::warn!(principal = %self.principal, %err, "failed to clear persisted session");
        }
        Err(ApiError::SessionExpired)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::session::store::MemoryTokenStore;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::time::Duration;

  struct FakeRefresher {
    calls: AtomicU32,
    outcome: Box<dyn Fn(u32) -> Result<TokenPair, ApiError> + Send + Sync>,
    delay: Duration,
  }

  impl FakeRefresher {
    fn succeeding() -> Self {
      Self::with(|n| Ok(TokenPair::new(format!("access-{n}"), format!("refresh-{n}"))))
    }

    fn failing() -> Self {
      Self::with(|_| Err(ApiError::Auth("refresh token revoked".to_string())))
    }

    fn with(
      outcome: impl Fn(u32) -> Result<TokenPair, ApiError> + Send + Sync + 'static,
    ) -> Self {
      Self {
        calls: AtomicU32::new(0),
        outcome: Box::new(outcome),
        delay: Duration::from_millis(20),
      }
    }

    fn calls(&self) -> u32 {
      self.calls.load(Ordering::SeqCst)
    }
  }

  #[async_trait]
  impl TokenRefresher for FakeRefresher {
    async fn exchange(&self, _refresh_token: &str) -> Result<TokenPair, ApiError> {
      let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
      tokio::time::sleep(self.delay).await;
      (self.outcome)(n)
    }
  }

  fn session(refresher: Arc<FakeRefresher>) -> SessionManager {
    SessionManager::new(Principal::Admin, Arc::new(MemoryTokenStore::new()), refresher)
  }

  #[tokio::test]
  async fn test_anonymous_session_has_no_credentials() {
    let manager = session(Arc::new(FakeRefresher::succeeding()));
    assert_eq!(manager.state(), SessionState::Anonymous);
    assert!(matches!(manager.current_token().await, Err(ApiError::NoCredentials)));
  }

  #[tokio::test]
  async fn test_login_then_current_token() {
    let manager = session(Arc::new(FakeRefresher::succeeding()));
    manager.login(TokenPair::new("access-0", "refresh-0")).await.unwrap();

    assert_eq!(manager.state(), SessionState::Authenticated);
    assert_eq!(manager.current_token().await.unwrap(), "access-0");
  }

  #[tokio::test]
  async fn test_concurrent_refreshes_collapse_into_one_exchange() {
    let refresher = Arc::new(FakeRefresher::succeeding());
    let manager = Arc::new(session(refresher.clone()));
    manager.login(TokenPair::new("stale", "refresh-0")).await.unwrap();

    let tasks: Vec<_> = (0..5)
      .map(|_| {
        let manager = manager.clone();
        tokio::spawn(async move { manager.refresh().await })
      })
      .collect();

    let tokens = futures::future::try_join_all(tasks).await.unwrap();
    for token in tokens {
      assert_eq!(token.unwrap(), "access-1");
    }
    assert_eq!(refresher.calls(), 1);
    assert_eq!(manager.state(), SessionState::Authenticated);
  }

  #[tokio::test]
  async fn test_current_token_awaits_inflight_refresh() {
    let refresher = Arc::new(FakeRefresher::succeeding());
    let manager = Arc::new(session(refresher.clone()));
    manager.login(TokenPair::new("stale", "refresh-0")).await.unwrap();

    let refreshing = {
      let manager = manager.clone();
      tokio::spawn(async move { manager.refresh().await })
    };
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(manager.state(), SessionState::Refreshing);

    // Arrives mid-refresh and shares the outcome.
    let token = manager.current_token().await.unwrap();
    assert_eq!(token, "access-1");
    refreshing.await.unwrap().unwrap();
    assert_eq!(refresher.calls(), 1);
  }

  #[tokio::test]
  async fn test_expired_token_hint_triggers_proactive_refresh() {
    let refresher = Arc::new(FakeRefresher::succeeding());
    let manager = session(refresher.clone());
    let expired = TokenPair::new("stale", "refresh-0")
      .with_expiry(Utc::now() - chrono::Duration::seconds(30));
    manager.login(expired).await.unwrap();

    assert_eq!(manager.current_token().await.unwrap(), "access-1");
    assert_eq!(refresher.calls(), 1);
  }

  #[tokio::test]
  async fn test_failed_refresh_expires_session_without_retry() {
    let refresher = Arc::new(FakeRefresher::failing());
    let manager = session(refresher.clone());
    manager.login(TokenPair::new("stale", "revoked")).await.unwrap();

    assert!(matches!(manager.refresh().await, Err(ApiError::SessionExpired)));
    assert_eq!(manager.state(), SessionState::Expired);

    // Terminal: subsequent calls fail immediately, no further exchange.
    assert!(matches!(manager.current_token().await, Err(ApiError::NoCredentials)));
    assert!(matches!(manager.refresh().await, Err(ApiError::NoCredentials)));
    assert_eq!(refresher.calls(), 1);
  }

  #[tokio::test]
  async fn test_invalidate_clears_store_and_login_recovers() {
    let store = Arc::new(MemoryTokenStore::new());
    let manager = SessionManager::new(
      Principal::Visitor,
      store.clone(),
      Arc::new(FakeRefresher::succeeding()),
    );
    manager.login(TokenPair::new("a", "r")).await.unwrap();

    manager.invalidate().await;
    assert_eq!(manager.state(), SessionState::Expired);
    assert!(store.load().await.unwrap().is_none());

    manager.login(TokenPair::new("a2", "r2")).await.unwrap();
    assert_eq!(manager.current_token().await.unwrap(), "a2");
  }

  #[tokio::test]
  async fn test_restore_adopts_persisted_pair() {
    let store = Arc::new(MemoryTokenStore::new());
    store.save(&TokenPair::new("persisted", "r")).await.unwrap();

    let manager = SessionManager::new(
      Principal::Admin,
      store,
      Arc::new(FakeRefresher::succeeding()),
    );
    manager.restore().await.unwrap();
    assert_eq!(manager.current_token().await.unwrap(), "persisted");
  }
}
