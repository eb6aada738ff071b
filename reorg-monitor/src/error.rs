//! Layered error types for the reorg-detection engine.
//!
//! - [`EngineError`] tags the failure kinds the coordinator and tree
//!   builder react to: `Transient`, `Fetch`, `ParentMissing`, `ConsumerGone`.
//! - [`AppError`] wraps [`EngineError`] together with configuration and
//!   startup failures, for the binary entrypoint.

use alloy::primitives::B256;
use thiserror::Error;
use upstream_client::ClientError;

/// Which on-demand fetch produced an [`EngineError::Fetch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    /// Fetching a block's parent via `blockByHash`.
    Parent,
    /// Fetching an uncle referenced by a block's header.
    Uncle,
}

impl std::fmt::Display for FetchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Parent => "parent",
            Self::Uncle => "uncle",
        })
    }
}

/// Tagged error kind driving coordinator and tree-builder recovery logic.
///
/// Mirrors the taxonomy in the design notes: a feed's own connection
/// trouble never reaches this type (it is absorbed by the feed's backoff
/// loop), but an on-demand fetch issued *by* the coordinator, or a
/// tree-build failure, does.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// A feed-level failure, surfaced only for logging; the feed's own
    /// state machine has already moved to `Backoff`.
    #[error("transient upstream failure: {0}")]
    Transient(#[source] ClientError),

    /// A `GetParent`/`Uncle` on-demand fetch failed. The coordinator logs
    /// this and continues without the block; the gap is retried the next
    /// time something references the same hash.
    #[error("fetch of {kind} block {hash} failed: {source}")]
    Fetch {
        /// Which reference-closure step requested this block.
        kind: FetchKind,
        /// The hash that could not be fetched.
        hash: B256,
        #[source]
        source: ClientError,
    },

    /// The tree builder could not locate a cached parent for a block
    /// inside the analysis window.
    #[error("parent missing for block {hash} at height {height}")]
    ParentMissing {
        /// The block whose parent is absent.
        hash: B256,
        /// That block's height.
        height: u64,
    },

    /// The outbound reorg channel's receiver was dropped.
    #[error("reorg output consumer gone")]
    ConsumerGone,
}

impl EngineError {
    /// Whether this failure is inherently recoverable by retrying later
    /// (as opposed to a programming error).
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Fetch { .. })
    }
}

/// Top-level application error for the binary entrypoint and configuration
/// loading.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppError {
    /// A core engine failure.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Settings could not be loaded or parsed.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// `Settings::validate` rejected the loaded configuration.
    #[error("invalid configuration: {}", .0.join("; "))]
    InvalidConfig(Vec<String>),

    /// No upstream URIs were configured.
    #[error("no upstream URIs configured")]
    NoUpstreams,

    /// `connectClients` dialed every configured URI and all failed.
    #[error("all {attempted} upstream dial attempts failed")]
    AllUpstreamsUnreachable {
        /// Number of URIs that were attempted.
        attempted: usize,
    },

    /// Graceful shutdown was requested while startup was in progress.
    #[error("shutdown requested")]
    ShutdownRequested,
}

/// Type alias for application-level results.
pub type Result<T> = std::result::Result<T, AppError>;
