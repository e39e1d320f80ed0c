//! Remote API boundary.

mod client;
mod refresher;

pub use client::RemoteClient;
pub use refresher::HttpRefresher;
