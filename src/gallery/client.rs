//! Typed facade wiring the cache, mutation executor, and remote client
//! together for the gallery API.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use crate::cache::QueryCache;
use crate::config::Config;
use crate::envelope::Paged;
use crate::error::ApiError;
use crate::mutation::MutationExecutor;
use crate::remote::{HttpRefresher, RemoteClient};
use crate::session::{FileTokenStore, Principal, SessionManager, TokenStore};

use super::keys::GalleryQueryKey;
use super::types::{placeholder_image, Artwork, ArtworkDraft, Category};

/// High-level client for the gallery API: reads go through the query cache,
/// writes through the optimistic mutation executor, and every remote call
/// through the session layer's refresh-and-retry.
#[derive(Clone)]
pub struct GalleryClient {
  remote: RemoteClient,
  cache: QueryCache,
  mutations: MutationExecutor,
}

impl GalleryClient {
  pub fn new(remote: RemoteClient) -> Self {
    let cache = QueryCache::new();
    Self {
      mutations: MutationExecutor::new(cache.clone()),
      cache,
      remote,
    }
  }

  /// Build the full stack for one principal from configuration: file-backed
  /// token store, HTTP refresher, session manager (restoring any persisted
  /// session), and remote client.
  pub async fn connect(config: &Config, principal: Principal) -> Result<Self, ApiError> {
    let base = config
      .api
      .base_url()
      .map_err(|err| ApiError::Network(err.to_string()))?;
    let refresher = HttpRefresher::new(base.clone(), &config.api.refresh_path)?;

    let store: Arc<dyn TokenStore> = match &config.session_dir {
      Some(dir) => Arc::new(FileTokenStore::at(
        dir.join(format!("session-{principal}.json")),
      )),
      None => Arc::new(FileTokenStore::open(principal)?),
    };

    let session = Arc::new(SessionManager::new(principal, store, Arc::new(refresher)));
    session.restore().await?;

    let remote = RemoteClient::new(base, session)?.with_timeout(config.api.timeout());
    Ok(Self::new(remote))
  }

  pub fn session(&self) -> &Arc<SessionManager> {
    self.remote.session()
  }

  pub fn cache(&self) -> &QueryCache {
    &self.cache
  }

  // ---- Reads -------------------------------------------------------------

  pub async fn categories(&self) -> Result<Vec<Category>, ApiError> {
    let key = GalleryQueryKey::Categories;
    self
      .cache
      .fetch(&key, || async { self.remote.get("categories").await })
      .await
  }

  pub async fn category(&self, id: &str) -> Result<Category, ApiError> {
    let key = GalleryQueryKey::Category { id: id.to_string() };
    let path = format!("categories/{id}");
    self
      .cache
      .fetch(&key, || async move { self.remote.get(&path).await })
      .await
  }

  pub async fn artworks(
    &self,
    category: Option<&str>,
    page: Option<u32>,
  ) -> Result<Paged<Artwork>, ApiError> {
    let key = GalleryQueryKey::Artworks {
      category: category.map(str::to_string),
      page,
    };
    let mut path = "artworks".to_string();
    let mut params = Vec::new();
    if let Some(category) = category {
      params.push(format!("category={category}"));
    }
    if let Some(page) = page {
      params.push(format!("page={page}"));
    }
    if !params.is_empty() {
      path = format!("{path}?{}", params.join("&"));
    }
    self
      .cache
      .fetch(&key, || async move { self.remote.get_paged(&path).await })
      .await
  }

  pub async fn artwork(&self, id: &str) -> Result<Artwork, ApiError> {
    let key = GalleryQueryKey::Artwork { id: id.to_string() };
    let path = format!("artworks/{id}");
    self
      .cache
      .fetch(&key, || async move { self.remote.get(&path).await })
      .await
  }

  // ---- Mutations ---------------------------------------------------------

  /// Rename a category. Readers see the new name immediately; the category
  /// and artwork listings (which embed category data) go stale on commit.
  pub async fn rename_category(&self, id: &str, name: &str) -> Result<Category, ApiError> {
    let key = GalleryQueryKey::Category { id: id.to_string() };
    let optimistic = match self.cache.read::<_, Category>(&key) {
      Some(entry) => Category {
        name: name.to_string(),
        ..entry.value
      },
      None => Category {
        id: id.to_string(),
        name: name.to_string(),
        description: None,
      },
    };

    let path = format!("categories/{id}");
    let body = json!({ "name": name });
    self
      .mutations
      .execute(&key, optimistic, &["category-list", "artwork-list"], || {
        async move { self.remote.put(&path, &body).await }
      })
      .await
  }

  pub async fn delete_category(&self, id: &str) -> Result<(), ApiError> {
    let key = GalleryQueryKey::Category { id: id.to_string() };
    let path = format!("categories/{id}");
    self
      .mutations
      .execute_removal(&key, &["category-list", "artwork-list"], || async move {
        self.remote.delete(&path).await
      })
      .await
  }

  /// Create an artwork. A speculative entry appears under a local
  /// identifier; the commit replaces it with the server value (which carries
  /// the server-assigned identifier).
  pub async fn create_artwork(&self, draft: &ArtworkDraft) -> Result<Artwork, ApiError> {
    let local_id = format!(
      "pending-{}",
      Utc::now().timestamp_nanos_opt().unwrap_or_default()
    );
    let key = GalleryQueryKey::Artwork { id: local_id.clone() };
    let optimistic = draft.speculative(&local_id);

    let created = self
      .mutations
      .execute(&key, optimistic, &["artwork-list"], || async move {
        self.remote.post("artworks", draft).await
      })
      .await?;

    // Re-home the committed value under its real identifier so detail reads
    // hit without a refetch.
    let real_key = GalleryQueryKey::Artwork {
      id: created.id.clone(),
    };
    self.cache.write(&real_key, &created)?;
    Ok(created)
  }

  pub async fn update_artwork(&self, artwork: &Artwork) -> Result<Artwork, ApiError> {
    let key = GalleryQueryKey::Artwork {
      id: artwork.id.clone(),
    };
    let path = format!("artworks/{}", artwork.id);
    self
      .mutations
      .execute(&key, artwork.clone(), &["artwork-list"], || async move {
        self.remote.put(&path, artwork).await
      })
      .await
  }

  pub async fn delete_artwork(&self, id: &str) -> Result<(), ApiError> {
    let key = GalleryQueryKey::Artwork { id: id.to_string() };
    let path = format!("artworks/{id}");
    self
      .mutations
      .execute_removal(&key, &["artwork-list"], || async move {
        self.remote.delete(&path).await
      })
      .await
  }

  /// Upload an artwork image. The cached artwork shows a `pending://`
  /// placeholder reference while the upload is in flight; the commit swaps
  /// in the server-returned artwork with the real image URL, and a failure
  /// restores the previous entry.
  pub async fn upload_artwork_image(
    &self,
    id: &str,
    filename: &str,
    content_type: &str,
    bytes: Vec<u8>,
  ) -> Result<Artwork, ApiError> {
    let key = GalleryQueryKey::Artwork { id: id.to_string() };
    let optimistic = match self.cache.read::<_, Artwork>(&key) {
      Some(entry) => Artwork {
        image_url: Some(placeholder_image(filename)),
        ..entry.value
      },
      None => Artwork {
        id: id.to_string(),
        title: String::new(),
        category_id: String::new(),
        image_url: Some(placeholder_image(filename)),
        updated_at: None,
      },
    };

    let path = format!("artworks/{id}/image");
    self
      .mutations
      .execute(&key, optimistic, &["artwork-list"], || async move {
        self
          .remote
          .upload(&path, "image", filename, content_type, bytes)
          .await
      })
      .await
  }
}
