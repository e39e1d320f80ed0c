//! Query keys for gallery reads.
//!
//! Listings and details carry distinct resource tags so a committed detail
//! write can invalidate the listings that embed it without marking its own
//! fresh entry stale.

use crate::cache::QueryKey;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GalleryQueryKey {
  Categories,
  Category { id: String },
  Artworks { category: Option<String>, page: Option<u32> },
  Artwork { id: String },
}

impl QueryKey for GalleryQueryKey {
  fn resource(&self) -> &'static str {
    match self {
      Self::Categories => "category-list",
      Self::Category { .. } => "category",
      Self::Artworks { .. } => "artwork-list",
      Self::Artwork { .. } => "artwork",
    }
  }

  fn components(&self) -> String {
    match self {
      Self::Categories => "list".to_string(),
      Self::Category { id } => format!("detail:{id}"),
      Self::Artworks { category, page } => format!(
        "list:category={}:page={}",
        category.as_deref().unwrap_or(""),
        page.map(|p| p.to_string()).unwrap_or_default()
      ),
      Self::Artwork { id } => format!("detail:{id}"),
    }
  }

  fn description(&self) -> String {
    match self {
      Self::Categories => "categories".to_string(),
      Self::Category { id } => format!("category {id}"),
      Self::Artworks { category, page } => format!(
        "artworks (category: {}, page: {})",
        category.as_deref().unwrap_or("all"),
        page.unwrap_or(1)
      ),
      Self::Artwork { id } => format!("artwork {id}"),
    }
  }
}
