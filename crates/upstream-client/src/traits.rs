//! Capability-set abstraction over a single upstream node.
//!
//! This is the trait a feed (§4.1 of the reorg engine) drives through its
//! four-state machine. It covers exactly the four operations the engine
//! consumes from the node: health-check, new-head subscription, and the two
//! on-demand fetches used to fill in missing parents and uncles.
//!
//! # Design Philosophy
//!
//! - **Minimal**: only the operations the engine actually calls.
//! - **Object-safe**: usable as `Arc<dyn UpstreamClient>` so a feed task and
//!   the coordinator's on-demand fetches can share one connection.
//! - **Fakeable**: tests supply a deterministic [`MockUpstreamClient`] instead
//!   of a live node.

use std::pin::Pin;
use std::sync::Arc;

use alloy::primitives::B256;
use async_trait::async_trait;
use futures::Stream;

use crate::error::Result;
use crate::types::{Header, SyncStatus, UpstreamBlock};

/// A live stream of new-head notifications, as returned by [`UpstreamClient::subscribe_heads`].
///
/// Each item is a `Result` so a mid-stream subscription error can be observed
/// by the feed without tearing down the whole async task; the feed treats an
/// `Err` item, or the stream ending, as a subscription failure and returns to
/// `Backoff`.
pub type HeadStream = Pin<Box<dyn Stream<Item = Result<Header>> + Send>>;

/// Capability set a feed needs from one upstream node.
#[async_trait]
pub trait UpstreamClient: Send + Sync + 'static {
    /// Dial the node at `uri`, establishing a connection.
    ///
    /// Implementations that cannot be constructed this way (for example a
    /// client wired up in a test harness) may ignore the `Self: Sized` bound
    /// by never being called through it.
    async fn dial(uri: &str) -> Result<Self>
    where
        Self: Sized;

    /// Check whether the node is caught up to the tip of the chain.
    async fn sync_status(&self) -> Result<SyncStatus>;

    /// Open a subscription to new block heads.
    async fn subscribe_heads(&self) -> Result<HeadStream>;

    /// Fetch a full block by hash.
    async fn block_by_hash(&self, hash: B256) -> Result<UpstreamBlock>;

    /// Fetch a full block by number.
    async fn block_by_number(&self, number: u64) -> Result<UpstreamBlock>;
}

#[async_trait]
impl<T> UpstreamClient for Arc<T>
where
    T: UpstreamClient + ?Sized,
{
    async fn dial(_uri: &str) -> Result<Self> {
        // Arc<T> itself is never dialed directly — the feed dials a `T` and
        // wraps it. This impl exists only so `Arc<T>` satisfies the trait
        // bound for the non-constructor methods below.
        Err(crate::error::ClientError::Connection(
            "Arc<T> cannot be dialed directly".to_string(),
        ))
    }

    async fn sync_status(&self) -> Result<SyncStatus> {
        T::sync_status(self).await
    }

    async fn subscribe_heads(&self) -> Result<HeadStream> {
        T::subscribe_heads(self).await
    }

    async fn block_by_hash(&self, hash: B256) -> Result<UpstreamBlock> {
        T::block_by_hash(self, hash).await
    }

    async fn block_by_number(&self, number: u64) -> Result<UpstreamBlock> {
        T::block_by_number(self, number).await
    }
}

/// Deterministic in-memory stand-in for a live node, used by feed and
/// coordinator tests throughout this workspace.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::{HeadStream, SyncStatus, UpstreamBlock};
    use crate::error::{ClientError, Result};
    use alloy::primitives::B256;
    use async_trait::async_trait;
    use futures::stream;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Deterministic in-memory stand-in for a live node, used by feed and
    /// coordinator tests.
    #[derive(Debug)]
    pub struct MockUpstreamClient {
        pub blocks_by_hash: Mutex<HashMap<B256, UpstreamBlock>>,
        pub sync_status: Mutex<SyncStatus>,
    }

    impl Default for MockUpstreamClient {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MockUpstreamClient {
        #[must_use]
        pub fn new() -> Self {
            Self {
                blocks_by_hash: Mutex::new(HashMap::new()),
                sync_status: Mutex::new(SyncStatus::Synced),
            }
        }

        pub fn insert(&self, block: UpstreamBlock) {
            self.blocks_by_hash
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .insert(block.hash(), block);
        }
    }

    #[async_trait]
    impl super::UpstreamClient for MockUpstreamClient {
        async fn dial(_uri: &str) -> Result<Self> {
            Ok(Self::new())
        }

        async fn sync_status(&self) -> Result<SyncStatus> {
            Ok(*self
                .sync_status
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner))
        }

        async fn subscribe_heads(&self) -> Result<HeadStream> {
            Ok(Box::pin(stream::empty()))
        }

        async fn block_by_hash(&self, hash: B256) -> Result<UpstreamBlock> {
            self.blocks_by_hash
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .get(&hash)
                .cloned()
                .ok_or_else(|| ClientError::NotFound(hash.to_string()))
        }

        async fn block_by_number(&self, number: u64) -> Result<UpstreamBlock> {
            self.blocks_by_hash
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .values()
                .find(|b| b.number() == number)
                .cloned()
                .ok_or_else(|| ClientError::NotFound(format!("block {number}")))
        }
    }
}
