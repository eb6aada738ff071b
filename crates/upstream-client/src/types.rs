//! Shapes exchanged across the upstream client boundary.

use alloy::primitives::{Address, B256};
use alloy::rpc::types::Block as AlloyBlock;

/// A new-head notification pushed by a subscription.
///
/// Carries just enough to decide whether the full block needs fetching; the
/// feed always re-fetches the full block by hash from the same node rather
/// than trusting header fields alone, to keep uncle references consistent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Block number.
    pub number: u64,
    /// Block hash.
    pub hash: B256,
}

/// Result of a sync-status check against an upstream node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// The node is fully synced.
    Synced,
    /// The node is still catching up.
    Syncing {
        /// Highest block number the node has imported so far.
        current_block: u64,
        /// Highest block number the node is aware of.
        highest_block: u64,
    },
}

impl SyncStatus {
    /// Whether the node is synced and safe to subscribe against.
    #[must_use]
    pub const fn is_synced(&self) -> bool {
        matches!(self, Self::Synced)
    }
}

/// Full block payload as fetched from an upstream node.
///
/// This is treated as opaque by everything except the handful of accessors
/// below, which is all the reorg engine ever needs from the raw block: its
/// identity, its parent, its uncle references, and a few display fields.
#[derive(Debug, Clone)]
pub struct UpstreamBlock(AlloyBlock);

impl UpstreamBlock {
    /// Wrap a raw alloy block.
    #[must_use]
    pub const fn new(block: AlloyBlock) -> Self {
        Self(block)
    }

    /// Block number.
    #[must_use]
    pub const fn number(&self) -> u64 {
        self.0.header.number
    }

    /// Block hash.
    #[must_use]
    pub const fn hash(&self) -> B256 {
        self.0.header.hash
    }

    /// Parent block hash.
    #[must_use]
    pub const fn parent_hash(&self) -> B256 {
        self.0.header.parent_hash
    }

    /// Hashes of uncle (ommer) blocks referenced by this block's header.
    #[must_use]
    pub fn uncle_hashes(&self) -> &[B256] {
        &self.0.uncles
    }

    /// Unix timestamp the block was produced at.
    #[must_use]
    pub const fn timestamp(&self) -> u64 {
        self.0.header.timestamp
    }

    /// Number of transactions included in the block.
    #[must_use]
    pub fn transaction_count(&self) -> usize {
        self.0.transactions.len()
    }

    /// Address that proposed the block.
    #[must_use]
    pub const fn coinbase(&self) -> Address {
        self.0.header.beneficiary
    }
}
