//! End-to-end scenarios against a mock server: cache-first reads, optimistic
//! rollback on server rejection, and the refresh-and-retry cycle.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use url::Url;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use atelier_sync::{
  ApiError, EntryStatus, GalleryClient, GalleryQueryKey, HttpRefresher, MemoryTokenStore,
  Principal, RemoteClient, SessionManager, SessionState, TokenPair,
};

async fn client_for(server: &MockServer, pair: TokenPair) -> GalleryClient {
  let base = Url::parse(&format!("{}/api", server.uri())).unwrap();
  let refresher = HttpRefresher::new(base.clone(), "auth/refresh").unwrap();
  let session = Arc::new(SessionManager::new(
    Principal::Admin,
    Arc::new(MemoryTokenStore::new()),
    Arc::new(refresher),
  ));
  session.login(pair).await.unwrap();
  GalleryClient::new(RemoteClient::new(base, session).unwrap())
}

fn success_body(data: serde_json::Value) -> ResponseTemplate {
  ResponseTemplate::new(200).set_body_json(json!({ "success": true, "data": data }))
}

#[tokio::test]
async fn test_read_populates_cache_and_second_read_skips_network() {
  let server = MockServer::start().await;
  Mock::given(method("GET"))
    .and(path("/api/categories"))
    .and(header("authorization", "Bearer access-0"))
    .respond_with(success_body(json!([
      { "id": "5", "name": "Abstract" },
      { "id": "6", "name": "Sculpture" }
    ])))
    .expect(1)
    .mount(&server)
    .await;

  let client = client_for(&server, TokenPair::new("access-0", "refresh-0")).await;

  let first = client.categories().await.unwrap();
  assert_eq!(first.len(), 2);
  assert_eq!(first[0].name, "Abstract");

  // Fresh hit: served from the cache, no second request (the mock's
  // expectation would fail otherwise).
  let second = client.categories().await.unwrap();
  assert_eq!(second, first);

  let entry = client
    .cache()
    .read::<_, Vec<atelier_sync::Category>>(&GalleryQueryKey::Categories)
    .unwrap();
  assert_eq!(entry.status, EntryStatus::Fresh);
}

#[tokio::test]
async fn test_rejected_rename_rolls_back_with_server_message() {
  let server = MockServer::start().await;
  Mock::given(method("GET"))
    .and(path("/api/categories/5"))
    .respond_with(success_body(json!({ "id": "5", "name": "Abstract" })))
    .mount(&server)
    .await;
  Mock::given(method("PUT"))
    .and(path("/api/categories/5"))
    .respond_with(
      ResponseTemplate::new(409)
        .set_body_json(json!({ "success": false, "message": "Category has artworks" })),
    )
    .mount(&server)
    .await;

  let client = client_for(&server, TokenPair::new("access-0", "refresh-0")).await;
  client.category("5").await.unwrap();

  match client.rename_category("5", "Modern").await {
    Err(ApiError::Conflict(msg)) => assert_eq!(msg, "Category has artworks"),
    other => panic!("expected conflict, got {other:?}"),
  }

  // The optimistic write was rolled back to the last-known-good value.
  let key = GalleryQueryKey::Category { id: "5".to_string() };
  let entry = client.cache().read::<_, atelier_sync::Category>(&key).unwrap();
  assert_eq!(entry.value.name, "Abstract");
}

#[tokio::test]
async fn test_upload_shows_placeholder_then_server_reference() {
  let server = MockServer::start().await;
  Mock::given(method("GET"))
    .and(path("/api/artworks/7"))
    .respond_with(success_body(json!({ "id": "7", "title": "Dusk", "categoryId": "5" })))
    .mount(&server)
    .await;
  Mock::given(method("POST"))
    .and(path("/api/artworks/7/image"))
    .respond_with(
      success_body(json!({
        "id": "7",
        "title": "Dusk",
        "categoryId": "5",
        "imageUrl": "https://cdn.example.com/7.jpg"
      }))
      .set_delay(Duration::from_millis(80)),
    )
    .expect(1)
    .mount(&server)
    .await;

  let client = client_for(&server, TokenPair::new("access-0", "refresh-0")).await;
  client.artwork("7").await.unwrap();

  let upload = {
    let client = client.clone();
    tokio::spawn(async move {
      client
        .upload_artwork_image("7", "photo.jpg", "image/jpeg", vec![1, 2, 3])
        .await
    })
  };

  // While the upload is in flight the cached artwork carries the local
  // placeholder reference.
  tokio::time::sleep(Duration::from_millis(30)).await;
  let key = GalleryQueryKey::Artwork { id: "7".to_string() };
  let entry = client.cache().read::<_, atelier_sync::Artwork>(&key).unwrap();
  assert_eq!(entry.value.image_url.as_deref(), Some("pending://photo.jpg"));

  // The commit swaps in the server-returned reference.
  let uploaded = upload.await.unwrap().unwrap();
  assert_eq!(uploaded.image_url.as_deref(), Some("https://cdn.example.com/7.jpg"));
  let entry = client.cache().read::<_, atelier_sync::Artwork>(&key).unwrap();
  assert_eq!(
    entry.value.image_url.as_deref(),
    Some("https://cdn.example.com/7.jpg")
  );
}

#[tokio::test]
async fn test_failed_upload_restores_previous_image() {
  let server = MockServer::start().await;
  Mock::given(method("GET"))
    .and(path("/api/artworks/7"))
    .respond_with(success_body(json!({
      "id": "7",
      "title": "Dusk",
      "categoryId": "5",
      "imageUrl": "https://cdn.example.com/old.jpg"
    })))
    .mount(&server)
    .await;
  Mock::given(method("POST"))
    .and(path("/api/artworks/7/image"))
    .respond_with(
      ResponseTemplate::new(400)
        .set_body_json(json!({ "success": false, "message": "unsupported image format" })),
    )
    .mount(&server)
    .await;

  let client = client_for(&server, TokenPair::new("access-0", "refresh-0")).await;
  client.artwork("7").await.unwrap();

  match client
    .upload_artwork_image("7", "photo.bmp", "image/bmp", vec![1])
    .await
  {
    Err(ApiError::Validation(msg)) => assert_eq!(msg, "unsupported image format"),
    other => panic!("expected validation failure, got {other:?}"),
  }

  // The placeholder was rolled back to the previous reference.
  let key = GalleryQueryKey::Artwork { id: "7".to_string() };
  let entry = client.cache().read::<_, atelier_sync::Artwork>(&key).unwrap();
  assert_eq!(
    entry.value.image_url.as_deref(),
    Some("https://cdn.example.com/old.jpg")
  );
}

#[tokio::test]
async fn test_expired_token_refreshes_once_and_retries() {
  let server = MockServer::start().await;

  // The stale token bounces.
  Mock::given(method("GET"))
    .and(path("/api/categories"))
    .and(header("authorization", "Bearer stale"))
    .respond_with(
      ResponseTemplate::new(401).set_body_json(json!({ "success": false, "message": "jwt expired" })),
    )
    .expect(1)
    .mount(&server)
    .await;

  // Exactly one refresh exchange.
  Mock::given(method("POST"))
    .and(path("/api/auth/refresh"))
    .and(body_json(json!({ "refreshToken": "refresh-0" })))
    .respond_with(success_body(json!({
      "accessToken": "fresh",
      "refreshToken": "refresh-1"
    })))
    .expect(1)
    .mount(&server)
    .await;

  // The retried request carries the new token.
  Mock::given(method("GET"))
    .and(path("/api/categories"))
    .and(header("authorization", "Bearer fresh"))
    .respond_with(success_body(json!([{ "id": "5", "name": "Abstract" }])))
    .expect(1)
    .mount(&server)
    .await;

  let client = client_for(&server, TokenPair::new("stale", "refresh-0")).await;

  let categories = client.categories().await.unwrap();
  assert_eq!(categories.len(), 1);
  assert_eq!(client.session().state(), SessionState::Authenticated);
  assert_eq!(client.session().current_token().await.unwrap(), "fresh");
}

#[tokio::test]
async fn test_second_401_after_refresh_expires_the_session() {
  let server = MockServer::start().await;

  // Every token bounces, including the freshly refreshed one.
  Mock::given(method("GET"))
    .and(path("/api/categories"))
    .respond_with(
      ResponseTemplate::new(401).set_body_json(json!({ "success": false, "message": "jwt expired" })),
    )
    .expect(2)
    .mount(&server)
    .await;

  Mock::given(method("POST"))
    .and(path("/api/auth/refresh"))
    .respond_with(success_body(json!({
      "accessToken": "fresh",
      "refreshToken": "refresh-1"
    })))
    .expect(1)
    .mount(&server)
    .await;

  let client = client_for(&server, TokenPair::new("stale", "refresh-0")).await;

  match client.categories().await {
    Err(ApiError::SessionExpired) => {}
    other => panic!("expected session expiry, got {other:?}"),
  }
  assert_eq!(client.session().state(), SessionState::Expired);
}

#[tokio::test]
async fn test_failed_refresh_is_terminal_without_further_network() {
  let server = MockServer::start().await;

  Mock::given(method("GET"))
    .and(path("/api/categories"))
    .and(header("authorization", "Bearer stale"))
    .respond_with(
      ResponseTemplate::new(401).set_body_json(json!({ "success": false, "message": "jwt expired" })),
    )
    .expect(1)
    .mount(&server)
    .await;

  Mock::given(method("POST"))
    .and(path("/api/auth/refresh"))
    .respond_with(
      ResponseTemplate::new(401)
        .set_body_json(json!({ "success": false, "message": "refresh token revoked" })),
    )
    .expect(1)
    .mount(&server)
    .await;

  let client = client_for(&server, TokenPair::new("stale", "refresh-0")).await;

  match client.categories().await {
    Err(ApiError::SessionExpired) => {}
    other => panic!("expected session expiry, got {other:?}"),
  }
  assert_eq!(client.session().state(), SessionState::Expired);

  // Terminal: no request or exchange is attempted until a new login (the
  // mocks' expectations would fail on any extra call).
  match client.session().current_token().await {
    Err(ApiError::NoCredentials) => {}
    other => panic!("expected no credentials, got {other:?}"),
  }
}
