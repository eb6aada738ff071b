//! Deduplicated, bounded-retention store of observed blocks.
//!
//! Mirrors §4.2: blocks are indexed both by hash (`by_hash`) and by height
//! (`by_height`), sharing storage via [`Arc`] rather than duplicating each
//! [`Block`]. Trimming evicts whole height buckets, oldest first.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::B256;

use crate::domain::block::{Block, Origin};

/// Default cache retention bound, within the spec's recommended 200-1000
/// range.
pub const DEFAULT_MAX_BLOCKS: u32 = 1000;

/// Deduplicated, height-indexed, bounded-retention block store.
#[derive(Debug)]
pub struct BlockCache {
    by_hash: HashMap<B256, Arc<Block>>,
    by_height: HashMap<u64, HashMap<B256, Arc<Block>>>,
    earliest: Option<u64>,
    latest: Option<u64>,
    max_blocks: u32,
}

impl BlockCache {
    /// Create an empty cache retaining at most `max_blocks` blocks.
    #[must_use]
    pub fn new(max_blocks: u32) -> Self {
        Self {
            by_hash: HashMap::new(),
            by_height: HashMap::new(),
            earliest: None,
            latest: None,
            max_blocks,
        }
    }

    /// Number of distinct blocks currently retained.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    /// Whether the cache currently holds no blocks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }

    /// The lowest height currently retained, if any.
    #[must_use]
    pub const fn earliest(&self) -> Option<u64> {
        self.earliest
    }

    /// The highest height currently retained, if any.
    #[must_use]
    pub const fn latest(&self) -> Option<u64> {
        self.latest
    }

    /// The configured retention bound.
    #[must_use]
    pub const fn max_blocks(&self) -> u32 {
        self.max_blocks
    }

    /// Look up a block by hash.
    #[must_use]
    pub fn lookup(&self, hash: B256) -> Option<&Block> {
        self.by_hash.get(&hash).map(Arc::as_ref)
    }

    /// Borrow the hash→block index for one height, if anything was observed
    /// there.
    #[must_use]
    pub fn height_bucket(&self, height: u64) -> Option<&HashMap<B256, Arc<Block>>> {
        self.by_height.get(&height)
    }

    /// Insert an observation of a block.
    ///
    /// Per §4.2: if the hash is already known with a non-`Uncle` origin,
    /// the insert is dropped outright (idempotent insert, origin upgrade
    /// invariants). Otherwise the observation overwrites whatever was
    /// cached — joining origins in the `Uncle < GetParent = Subscription`
    /// lattice — unless it is a late observation below the retained
    /// window, in which case it is also dropped.
    ///
    /// Returns whether this hash had never been seen before.
    pub fn insert(&mut self, block: Block) -> bool {
        let hash = block.hash();

        if let Some(existing) = self.by_hash.get(&hash) {
            if existing.origin() != Origin::Uncle {
                return false;
            }
        }

        if !self.is_empty() {
            if let Some(earliest) = self.earliest {
                if block.number() < earliest {
                    return false;
                }
            }
        }

        let is_new = !self.by_hash.contains_key(&hash);
        let origin = self
            .by_hash
            .get(&hash)
            .map_or(block.origin(), |existing| existing.origin().join(block.origin()));

        let height = block.number();
        let stored = Arc::new(block.with_origin(origin));

        self.by_hash.insert(hash, Arc::clone(&stored));
        self.by_height.entry(height).or_default().insert(hash, stored);

        self.earliest = Some(self.earliest.map_or(height, |e| e.min(height)));
        self.latest = Some(self.latest.map_or(height, |l| l.max(height)));

        is_new
    }

    /// Evict whole height buckets, oldest first, while the cache exceeds
    /// `max_blocks`.
    ///
    /// A single height bucket larger than `max_blocks` on its own is kept
    /// in full (the spec leaves this policy unspecified; see `DESIGN.md`).
    pub fn trim(&mut self) {
        while self.by_hash.len() as u64 > u64::from(self.max_blocks) {
            let Some(earliest) = self.earliest else { break };
            if let Some(bucket) = self.by_height.remove(&earliest) {
                for hash in bucket.keys() {
                    self.by_hash.remove(hash);
                }
            }
            self.earliest = self.by_height.keys().copied().filter(|h| *h > earliest).min();
            if self.earliest.is_none() {
                self.latest = None;
                break;
            }
        }
    }
}
