//! Capability-set abstraction over a single upstream blockchain node.
//!
//! The reorg-detection engine talks to one or more upstream nodes through a
//! narrow interface: dial, check sync status, subscribe to new heads, and
//! fetch a block by hash or number. This crate is that interface, plus a
//! production implementation over alloy's WebSocket provider.
//!
//! # Modules
//!
//! - [`traits`] - the [`UpstreamClient`] port and, under `test-utils`, a
//!   deterministic mock implementation
//! - [`alloy_client`] - [`AlloyUpstreamClient`], the production implementation
//! - [`types`] - the small value types exchanged across the boundary
//! - [`error`] - the client error taxonomy

#![doc(html_root_url = "https://docs.ghostnet.io/upstream-client")]

pub mod alloy_client;
pub mod error;
pub mod traits;
pub mod types;

pub use alloy_client::AlloyUpstreamClient;
pub use error::{ClientError, Result};
pub use traits::{HeadStream, UpstreamClient};
pub use types::{Header, SyncStatus, UpstreamBlock};

#[cfg(any(test, feature = "test-utils"))]
pub use traits::mock::MockUpstreamClient;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the crate version string.
#[must_use]
pub const fn version() -> &'static str {
    VERSION
}
