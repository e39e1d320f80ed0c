//! Session lifecycle: durable token storage and the refresh state machine.
//!
//! One [`SessionManager`] per principal; the admin and visitor sessions
//! are independent instances and never share a [`TokenStore`].

mod manager;
mod store;

pub use manager::{SessionManager, SessionState, TokenRefresher};
pub use store::{FileTokenStore, MemoryTokenStore, Principal, TokenPair, TokenStore};
