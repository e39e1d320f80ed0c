//! Client-side data synchronization layer for the Atelier gallery API.
//!
//! Keeps a local view of server-owned resources consistent with the remote
//! API under concurrent reads, optimistic writes, and token expiry. Two
//! cooperating halves:
//!
//! - the optimistic mutation cache: [`cache::QueryCache`] holds the current
//!   known state per query key with freshness metadata and subscriptions;
//!   [`mutation::MutationExecutor`] applies speculative writes around remote
//!   calls with guaranteed rollback to the last-known-good state
//! - the session layer: [`session::SessionManager`] owns one principal's
//!   token pair with single-flight refresh; [`remote::RemoteClient`]
//!   attaches tokens, validates the shared response envelope, and retries
//!   exactly once through a refresh when a request races token expiry
//!
//! [`gallery::GalleryClient`] wires both halves together for the gallery
//! API's resource types.

pub mod cache;
pub mod config;
pub mod envelope;
pub mod error;
pub mod gallery;
pub mod mutation;
pub mod remote;
pub mod session;

pub use cache::{CacheEntry, CacheEvent, EntryStatus, QueryCache, QueryKey, ReadState};
pub use config::{ApiConfig, Config, ConfigError};
pub use envelope::{Envelope, Paged, Pagination};
pub use error::{ApiError, ErrorKind};
pub use gallery::{Artwork, ArtworkDraft, Category, GalleryClient, GalleryQueryKey};
pub use mutation::MutationExecutor;
pub use remote::{HttpRefresher, RemoteClient};
pub use session::{
  FileTokenStore, MemoryTokenStore, Principal, SessionManager, SessionState, TokenPair,
  TokenRefresher, TokenStore,
};
