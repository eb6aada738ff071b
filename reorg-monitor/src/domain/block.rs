//! The [`Block`] observation type and its [`Origin`] lattice.

use alloy::primitives::{Address, B256};
use upstream_client::UpstreamBlock;

/// How the coordinator learned of a block.
///
/// Forms a three-valued join-semilattice: `Uncle < GetParent = Subscription`.
/// `GetParent` and `Subscription` are distinct (they record different
/// provenance) but equally "live" — neither was reconstructed from an
/// uncle reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// Learned of via a direct new-head subscription.
    Subscription,
    /// Fetched on demand to fill a gap left by a block's `parentHash`.
    GetParent,
    /// Reconstructed after the fact from another block's uncle list.
    Uncle,
}

impl Origin {
    const fn rank(self) -> u8 {
        match self {
            Self::Uncle => 0,
            Self::GetParent | Self::Subscription => 1,
        }
    }

    /// Join two observations of the same block in the `Uncle < GetParent =
    /// Subscription` lattice, returning the one that should be retained.
    ///
    /// Ties keep `self`: re-inserting an observation with an
    /// equally-or-less-live origin than the one already cached is a no-op.
    #[must_use]
    pub const fn join(self, other: Self) -> Self {
        if other.rank() > self.rank() { other } else { self }
    }

    /// Whether this origin counts as "seen live" — i.e. not reconstructed
    /// from an uncle reference.
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Subscription | Self::GetParent)
    }
}

/// An immutable observation of one block.
///
/// `number`, `hash`, and `parent_hash` are lifted out of the upstream
/// node's full block payload at construction time; everything else the
/// engine needs from that payload (uncle hashes, transaction count,
/// timestamp, coinbase) is extracted eagerly too, so the opaque payload
/// itself need not be retained.
///
/// Blocks are never mutated once cached; the only field that may change
/// across repeated observations of the same hash is `origin`, via
/// [`Origin::join`] ([`Block::with_origin`]).
#[derive(Debug, Clone)]
pub struct Block {
    number: u64,
    hash: B256,
    parent_hash: B256,
    uncle_hashes: Vec<B256>,
    timestamp: u64,
    transaction_count: usize,
    coinbase: Address,
    source: String,
    origin: Origin,
}

impl Block {
    /// Build a block observation directly from its constituent fields.
    ///
    /// Used by on-demand reference-closure fetches (which don't go through
    /// [`Block::from_upstream`] a second time) and by test helpers.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        number: u64,
        hash: B256,
        parent_hash: B256,
        uncle_hashes: Vec<B256>,
        timestamp: u64,
        transaction_count: usize,
        coinbase: Address,
        source: impl Into<String>,
        origin: Origin,
    ) -> Self {
        Self {
            number,
            hash,
            parent_hash,
            uncle_hashes,
            timestamp,
            transaction_count,
            coinbase,
            source: source.into(),
            origin,
        }
    }

    /// Extract the fields the engine needs from a full upstream payload.
    #[must_use]
    pub fn from_upstream(payload: &UpstreamBlock, source: impl Into<String>, origin: Origin) -> Self {
        Self {
            number: payload.number(),
            hash: payload.hash(),
            parent_hash: payload.parent_hash(),
            uncle_hashes: payload.uncle_hashes().to_vec(),
            timestamp: payload.timestamp(),
            transaction_count: payload.transaction_count(),
            coinbase: payload.coinbase(),
            source: source.into(),
            origin,
        }
    }

    /// Block number.
    #[must_use]
    pub const fn number(&self) -> u64 {
        self.number
    }

    /// Block hash.
    #[must_use]
    pub const fn hash(&self) -> B256 {
        self.hash
    }

    /// Parent hash.
    #[must_use]
    pub const fn parent_hash(&self) -> B256 {
        self.parent_hash
    }

    /// Uncle hashes referenced by this block's header.
    #[must_use]
    pub fn uncle_hashes(&self) -> &[B256] {
        &self.uncle_hashes
    }

    /// Block timestamp (seconds since epoch).
    #[must_use]
    pub const fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Number of transactions in the block.
    #[must_use]
    pub const fn transaction_count(&self) -> usize {
        self.transaction_count
    }

    /// Block's fee recipient / coinbase address.
    #[must_use]
    pub const fn coinbase(&self) -> Address {
        self.coinbase
    }

    /// The feed URI (or synthetic source, for on-demand fetches) that
    /// supplied this observation.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// How this observation was obtained.
    #[must_use]
    pub const fn origin(&self) -> Origin {
        self.origin
    }

    /// Return a copy of this block with its origin replaced.
    ///
    /// This is the only way a `Block`'s state ever changes: the cache joins
    /// an incoming observation's origin with whatever is already stored and
    /// rewrites just this field.
    #[must_use]
    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_promotes_uncle_to_subscription() {
        assert_eq!(Origin::Uncle.join(Origin::Subscription), Origin::Subscription);
    }

    #[test]
    fn join_does_not_demote_subscription_to_uncle() {
        assert_eq!(Origin::Subscription.join(Origin::Uncle), Origin::Subscription);
    }

    #[test]
    fn get_parent_and_subscription_are_equally_live() {
        assert_eq!(Origin::Uncle.join(Origin::GetParent), Origin::GetParent);
        assert_eq!(Origin::GetParent.join(Origin::Subscription), Origin::GetParent);
    }

    #[test]
    fn is_live_excludes_only_uncle() {
        assert!(Origin::Subscription.is_live());
        assert!(Origin::GetParent.is_live());
        assert!(!Origin::Uncle.is_live());
    }

    #[test]
    fn with_origin_replaces_only_that_field() {
        let block = Block::new(
            1,
            B256::ZERO,
            B256::ZERO,
            Vec::new(),
            0,
            0,
            Address::ZERO,
            "ws://a",
            Origin::Uncle,
        );
        let upgraded = block.with_origin(Origin::Subscription);
        assert_eq!(upgraded.origin(), Origin::Subscription);
        assert_eq!(upgraded.number(), 1);
    }
}
