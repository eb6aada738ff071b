//! End-to-end reorg detection scenarios (S1-S6), replayed in their literal
//! order, in a permuted order, and across two interleaved feeds. Expected
//! output must not depend on arrival order (§8).

use alloy::primitives::B256;
use rstest::rstest;
use tokio::sync::mpsc;

use reorg_monitor::domain::block::{Block, Origin};
use reorg_monitor::test_support::{make_block, make_block_with_uncles};
use reorg_monitor::{Coordinator, ReorgRecord};
use upstream_client::MockUpstreamClient;

fn coordinator_with_feeds(uris: &[&str]) -> (Coordinator<MockUpstreamClient>, mpsc::Receiver<ReorgRecord>) {
    let (tx, rx) = mpsc::channel(32);
    let uris: Vec<String> = uris.iter().map(ToString::to_string).collect();
    (Coordinator::new(&uris, tx, 1000), rx)
}

async fn feed_all(coordinator: &Coordinator<MockUpstreamClient>, blocks: &[Block]) {
    for block in blocks {
        coordinator.add_block(block.clone()).await;
    }
}

fn reorder(blocks: &[Block], order: &[usize]) -> Vec<Block> {
    order.iter().map(|&i| blocks[i].clone()).collect()
}

fn with_source(mut block: Block, source: &str) -> Block {
    block = Block::new(
        block.number(),
        block.hash(),
        block.parent_hash(),
        block.uncle_hashes().to_vec(),
        block.timestamp(),
        block.transaction_count(),
        block.coinbase(),
        source,
        block.origin(),
    );
    block
}

// ─────────────────────────────────────────────────────────────────────────
// S1: a single-block reorg at height 101.
// ─────────────────────────────────────────────────────────────────────────

fn s1_blocks() -> Vec<Block> {
    let a = make_block(100, B256::ZERO, Origin::Subscription);
    let b = make_block(101, a.hash(), Origin::Subscription);
    let c = make_block(101, a.hash(), Origin::Subscription);
    let d = make_block(102, b.hash(), Origin::Subscription);
    let e = make_block(103, d.hash(), Origin::Subscription);
    vec![a, b, c, d, e]
}

#[tokio::test]
async fn s1_literal_order() {
    let blocks = s1_blocks();
    let (coordinator, mut rx) = coordinator_with_feeds(&["test://mock"]);
    feed_all(&coordinator, &blocks).await;

    let record = rx.try_recv().expect("s1 must emit a reorg");
    assert_eq!(record.id(), "101_101_d1_b2_l");
    assert_eq!(record.depth(), 1);
    assert_eq!(record.num_replaced(), 1);
    assert!(record.seen_live());
    assert!(rx.try_recv().is_err(), "identity must not repeat");
}

#[rstest]
#[case(&[0, 2, 1, 3, 4])]
#[case(&[0, 1, 3, 2, 4])]
#[tokio::test]
async fn s1_permuted_order(#[case] order: &[usize]) {
    let blocks = reorder(&s1_blocks(), order);
    let (coordinator, mut rx) = coordinator_with_feeds(&["test://mock"]);
    feed_all(&coordinator, &blocks).await;

    let record = rx.try_recv().expect("s1 must emit a reorg regardless of arrival order");
    assert_eq!(record.id(), "101_101_d1_b2_l");
}

#[tokio::test]
async fn s1_interleaved_feeds() {
    let raw = s1_blocks();
    let blocks: Vec<Block> = raw
        .iter()
        .enumerate()
        .map(|(i, b)| with_source(b.clone(), if i % 2 == 0 { "ws://feed-a" } else { "ws://feed-b" }))
        .collect();

    let (coordinator, mut rx) = coordinator_with_feeds(&["ws://feed-a", "ws://feed-b"]);
    feed_all(&coordinator, &blocks).await;

    let record = rx.try_recv().expect("s1 must emit a reorg across interleaved feeds");
    assert_eq!(record.id(), "101_101_d1_b2_l");
}

// ─────────────────────────────────────────────────────────────────────────
// S2: the same shallow reorg, but the losing block is only ever observed
// via an uncle reference (origin stays `Uncle`), so `seenLive` is false.
// ─────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn s2_uncle_only_observation_is_not_seen_live() {
    let a = make_block(100, B256::ZERO, Origin::Subscription);
    let b = make_block(101, a.hash(), Origin::Subscription);
    // D references C as an uncle: C is reconstructed with origin Uncle,
    // never upgraded by a live subscription.
    let c = make_block(101, a.hash(), Origin::Uncle);
    let d = make_block_with_uncles(102, b.hash(), vec![c.hash()], Origin::Subscription);
    let e = make_block(103, d.hash(), Origin::Subscription);

    let (coordinator, mut rx) = coordinator_with_feeds(&["test://mock"]);
    feed_all(&coordinator, &[a, b, c, d, e]).await;

    let record = rx.try_recv().expect("s2 must emit a reorg");
    assert_eq!(record.id(), "101_101_d1_b2");
    assert!(!record.seen_live());
}

// ─────────────────────────────────────────────────────────────────────────
// S3: a two-deep reorg. Per the truncated-union aggregation rule of §4.4
// step 4, `blocksInvolved` is {Q, S, R, T} (4 blocks), not the 5 implied by
// the worked example's own `numReplaced` arithmetic — see DESIGN.md for
// this resolved spec inconsistency. This suite asserts our own
// consistently-derived values rather than the table's.
// ─────────────────────────────────────────────────────────────────────────

fn s3_blocks() -> Vec<Block> {
    let p = make_block(200, B256::ZERO, Origin::Subscription);
    let q = make_block(201, p.hash(), Origin::Subscription);
    let r = make_block(201, p.hash(), Origin::Subscription);
    let s = make_block(202, q.hash(), Origin::Subscription);
    let t = make_block(202, r.hash(), Origin::Subscription);
    let u = make_block(203, s.hash(), Origin::Subscription);
    vec![p, q, r, s, t, u]
}

#[tokio::test]
async fn s3_literal_order() {
    let blocks = s3_blocks();
    let (coordinator, mut rx) = coordinator_with_feeds(&["test://mock"]);
    feed_all(&coordinator, &blocks).await;

    let record = rx.try_recv().expect("s3 must emit a reorg");
    assert_eq!(record.id(), "201_202_d2_b4_l");
    assert_eq!(record.depth(), 2);
    assert_eq!(record.num_replaced(), 2);
    assert_eq!(record.blocks_involved().len(), 4);
}

#[rstest]
#[case(&[0, 2, 1, 4, 3, 5])]
#[case(&[0, 1, 3, 2, 4, 5])]
#[tokio::test]
async fn s3_permuted_order(#[case] order: &[usize]) {
    let blocks = reorder(&s3_blocks(), order);
    let (coordinator, mut rx) = coordinator_with_feeds(&["test://mock"]);
    feed_all(&coordinator, &blocks).await;

    let record = rx.try_recv().expect("s3 must emit a reorg regardless of arrival order");
    assert_eq!(record.id(), "201_202_d2_b4_l");
}

#[tokio::test]
async fn s3_interleaved_feeds() {
    let raw = s3_blocks();
    let blocks: Vec<Block> = raw
        .iter()
        .enumerate()
        .map(|(i, b)| with_source(b.clone(), if i % 2 == 0 { "ws://feed-a" } else { "ws://feed-b" }))
        .collect();

    let (coordinator, mut rx) = coordinator_with_feeds(&["ws://feed-a", "ws://feed-b"]);
    feed_all(&coordinator, &blocks).await;

    let record = rx.try_recv().expect("s3 must emit a reorg across interleaved feeds");
    assert_eq!(record.id(), "201_202_d2_b4_l");
}

// ─────────────────────────────────────────────────────────────────────────
// S4: same fork as S3 but without the deciding block at 203 — the tie at
// depth 2 must never be emitted.
// ─────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn s4_tied_fork_is_never_emitted() {
    let mut blocks = s3_blocks();
    blocks.pop(); // drop the deciding block at 203

    let (coordinator, mut rx) = coordinator_with_feeds(&["test://mock"]);
    feed_all(&coordinator, &blocks).await;

    assert!(rx.try_recv().is_err(), "a tied fork must not be emitted");

    let analysis = coordinator.analyze_tree(100, 0).await.expect("analysis should run");
    let record = analysis.records.iter().find(|r| r.start_height() == 201).expect("fork point found");
    assert!(!record.is_finished());
}

// ─────────────────────────────────────────────────────────────────────────
// S5: a three-way fork, one branch of which extends further before being
// decided.
// ─────────────────────────────────────────────────────────────────────────

fn s5_blocks() -> Vec<Block> {
    let genesis = make_block(300, B256::ZERO, Origin::Subscription);
    let a = make_block(301, genesis.hash(), Origin::Subscription);
    let b = make_block(301, genesis.hash(), Origin::Subscription);
    let c = make_block(301, genesis.hash(), Origin::Subscription);
    let a2 = make_block(302, a.hash(), Origin::Subscription);
    let a3 = make_block(303, a2.hash(), Origin::Subscription);
    vec![genesis, a, b, c, a2, a3]
}

#[tokio::test]
async fn s5_three_way_fork() {
    let blocks = s5_blocks();
    let (coordinator, mut rx) = coordinator_with_feeds(&["test://mock"]);
    feed_all(&coordinator, &blocks).await;

    let record = rx.try_recv().expect("s5 must emit a reorg");
    assert_eq!(record.id(), "301_301_d1_b3_l");
    assert_eq!(record.chains().len(), 3);
}

#[rstest]
#[case(&[0, 2, 1, 3, 5, 4])]
#[case(&[0, 1, 2, 4, 3, 5])]
#[tokio::test]
async fn s5_permuted_order(#[case] order: &[usize]) {
    let blocks = reorder(&s5_blocks(), order);
    let (coordinator, mut rx) = coordinator_with_feeds(&["test://mock"]);
    feed_all(&coordinator, &blocks).await;

    let record = rx.try_recv().expect("s5 must emit a reorg regardless of arrival order");
    assert_eq!(record.id(), "301_301_d1_b3_l");
}

// ─────────────────────────────────────────────────────────────────────────
// S6: a deep double reorg, two chains three blocks each.
// ─────────────────────────────────────────────────────────────────────────

fn s6_blocks() -> Vec<Block> {
    let p = make_block(400, B256::ZERO, Origin::Subscription);
    let q = make_block(401, p.hash(), Origin::Subscription);
    let r = make_block(401, p.hash(), Origin::Subscription);
    let s = make_block(402, q.hash(), Origin::Subscription);
    let t = make_block(402, r.hash(), Origin::Subscription);
    let u = make_block(403, s.hash(), Origin::Subscription);
    let v = make_block(403, t.hash(), Origin::Subscription);
    let w = make_block(404, u.hash(), Origin::Subscription);
    vec![p, q, r, s, t, u, v, w]
}

#[tokio::test]
async fn s6_literal_order() {
    let blocks = s6_blocks();
    let (coordinator, mut rx) = coordinator_with_feeds(&["test://mock"]);
    feed_all(&coordinator, &blocks).await;

    let record = rx.try_recv().expect("s6 must emit a reorg");
    assert_eq!(record.id(), "401_403_d3_b6_l");
    assert_eq!(record.depth(), 3);
}

#[rstest]
#[case(&[0, 2, 1, 4, 3, 6, 5, 7])]
#[case(&[0, 1, 3, 5, 2, 4, 6, 7])]
#[tokio::test]
async fn s6_permuted_order(#[case] order: &[usize]) {
    let blocks = reorder(&s6_blocks(), order);
    let (coordinator, mut rx) = coordinator_with_feeds(&["test://mock"]);
    feed_all(&coordinator, &blocks).await;

    let record = rx.try_recv().expect("s6 must emit a reorg regardless of arrival order");
    assert_eq!(record.id(), "401_403_d3_b6_l");
}

#[tokio::test]
async fn s6_interleaved_feeds() {
    let raw = s6_blocks();
    let blocks: Vec<Block> = raw
        .iter()
        .enumerate()
        .map(|(i, b)| with_source(b.clone(), if i % 2 == 0 { "ws://feed-a" } else { "ws://feed-b" }))
        .collect();

    let (coordinator, mut rx) = coordinator_with_feeds(&["ws://feed-a", "ws://feed-b"]);
    feed_all(&coordinator, &blocks).await;

    let record = rx.try_recv().expect("s6 must emit a reorg across interleaved feeds");
    assert_eq!(record.id(), "401_403_d3_b6_l");
}

// ─────────────────────────────────────────────────────────────────────────
// Cross-cutting properties (§8).
// ─────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn idempotent_insert_yields_same_emission() {
    let blocks = s1_blocks();
    let (coordinator, mut rx) = coordinator_with_feeds(&["test://mock"]);
    feed_all(&coordinator, &blocks).await;
    // Re-deliver the whole stream again; nothing new should be emitted.
    feed_all(&coordinator, &blocks).await;

    assert!(rx.try_recv().is_ok());
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn status_exposes_cache_and_feed_counters() {
    let blocks = s1_blocks();
    let (coordinator, _rx) = coordinator_with_feeds(&["test://mock"]);
    feed_all(&coordinator, &blocks).await;

    let status = coordinator.status().await;
    assert_eq!(status.cache_len, blocks.len());
    assert_eq!(status.reorgs_emitted, 1);
}
