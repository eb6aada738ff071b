//! Live blockchain reorganization detection engine.
//!
//! Subscribes to one or more upstream nodes' new-head feeds, merges their
//! observations into a single deduplicated block graph, walks that graph
//! back through parents and uncles to fill gaps, analyses the resulting
//! tree to locate every point where the chain forked, and emits each
//! resulting reorganization exactly once with a stable identity.
//!
//! # Modules
//!
//! - [`feed`] - per-upstream subscribe/reconnect state machine (§4.1)
//! - [`cache`] - deduplicated, bounded-retention block store (§4.2)
//! - [`domain`] - the [`domain::block::Block`] observation type and the
//!   arena-indexed tree built from a window of the cache (§4.3)
//! - [`extractor`] - locates fork points and builds reorg records (§4.4)
//! - [`coordinator`] - fans in blocks, triggers analysis, deduplicates
//!   emitted reorgs (§4.5)
//! - [`config`] - layered settings loading
//! - [`error`] - the error taxonomy

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod extractor;
pub mod feed;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;

pub use cache::BlockCache;
pub use coordinator::{Coordinator, Status};
pub use domain::block::{Block, Origin};
pub use domain::tree::BlockTree;
pub use error::{AppError, EngineError};
pub use extractor::{Analysis, ReorgRecord};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the crate version string.
#[must_use]
pub const fn version() -> &'static str {
    VERSION
}
