//! Deterministic block-building helpers shared by unit and integration
//! tests throughout this crate.

use std::sync::atomic::{AtomicU64, Ordering};

use alloy::primitives::{Address, B256};

use crate::domain::block::{Block, Origin};

static NONCE: AtomicU64 = AtomicU64::new(1);

/// Build a synthetic block at `number` with the given `parent_hash`.
///
/// Each call produces a fresh, unique hash (even for two blocks at the same
/// height with the same parent — i.e. competing siblings), derived from an
/// internal counter rather than from the block's content, since tests need
/// distinguishable hashes, not content-addressed ones.
#[must_use]
pub fn make_block(number: u64, parent_hash: B256, origin: Origin) -> Block {
    make_block_with_uncles(number, parent_hash, Vec::new(), origin)
}

/// As [`make_block`], additionally recording `uncles` as this block's
/// uncle-hash references.
#[must_use]
pub fn make_block_with_uncles(number: u64, parent_hash: B256, uncles: Vec<B256>, origin: Origin) -> Block {
    let nonce = NONCE.fetch_add(1, Ordering::Relaxed);
    let mut bytes = [0u8; 32];
    bytes[0..8].copy_from_slice(&number.to_be_bytes());
    bytes[8..16].copy_from_slice(&nonce.to_be_bytes());
    bytes[16..32].copy_from_slice(&parent_hash.as_slice()[16..32]);
    let hash = B256::from(bytes);

    Block::new(
        number,
        hash,
        parent_hash,
        uncles,
        1_700_000_000 + number,
        0,
        Address::ZERO,
        "test://mock",
        origin,
    )
}
