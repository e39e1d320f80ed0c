//! Gallery domain: resource types, query keys, and the typed client.

mod client;
mod keys;
mod types;

pub use client::GalleryClient;
pub use keys::GalleryQueryKey;
pub use types::{Artwork, ArtworkDraft, Category};
