//! Reorganization extraction from a built [`BlockTree`] (§4.4).
//!
//! For every fork point (a node with two or more children) this walks each
//! child's subtree depth-first to enumerate competing chains, picks a
//! winner when one chain is strictly longer than the rest, and aggregates
//! the union of all chains into a [`ReorgRecord`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use alloy::primitives::B256;

use crate::domain::block::Block;
use crate::domain::tree::{BlockTree, NodeId};

/// One competing branch below a fork point.
///
/// Keyed conceptually by the hash of the fork point's child that heads it
/// (`root_hash`); a child whose own subtree branches again contributes one
/// `Chain` per leaf path, so `root_hash` is not unique across the full set
/// returned by [`extract`] — see `DESIGN.md` for why this departs from a
/// literal hash-keyed map.
#[derive(Debug, Clone)]
pub struct Chain {
    root_hash: B256,
    blocks: Vec<Arc<Block>>,
}

impl Chain {
    /// Hash of the fork point's child that heads this chain.
    #[must_use]
    pub const fn root_hash(&self) -> B256 {
        self.root_hash
    }

    /// Blocks on this branch, root-first.
    #[must_use]
    pub fn blocks(&self) -> &[Arc<Block>] {
        &self.blocks
    }
}

/// A detected reorganization at one fork point.
#[derive(Debug, Clone)]
pub struct ReorgRecord {
    common_parent: Arc<Block>,
    chains: Vec<Chain>,
    depth: usize,
    start_height: u64,
    end_height: u64,
    main_chain_hash: Option<B256>,
    main_chain_tip_hash: Option<B256>,
    first_block_after_reorg: Option<Arc<Block>>,
    blocks_involved: HashMap<B256, Arc<Block>>,
    num_replaced: usize,
    seen_live: bool,
    is_finished: bool,
    nodes_involved: HashSet<String>,
}

impl ReorgRecord {
    /// The fork-point block both branches share as an ancestor.
    #[must_use]
    pub fn common_parent(&self) -> &Block {
        &self.common_parent
    }

    /// Every competing branch below the fork point (winner truncated,
    /// losers untruncated).
    #[must_use]
    pub fn chains(&self) -> &[Chain] {
        &self.chains
    }

    /// Length of the second-longest chain; number of blocks replaced on
    /// each losing branch.
    #[must_use]
    pub const fn depth(&self) -> usize {
        self.depth
    }

    /// First height at which branches diverged.
    #[must_use]
    pub const fn start_height(&self) -> u64 {
        self.start_height
    }

    /// Height of the last block on the winning branch (or the deepest
    /// observed block, if still unfinished).
    #[must_use]
    pub const fn end_height(&self) -> u64 {
        self.end_height
    }

    /// Root-child hash of the winning branch, if a winner exists.
    #[must_use]
    pub const fn main_chain_hash(&self) -> Option<B256> {
        self.main_chain_hash
    }

    /// The block on the winning branch one past `depth`, if a winner
    /// exists — the first block with no surviving sibling.
    #[must_use]
    pub fn first_block_after_reorg(&self) -> Option<&Block> {
        self.first_block_after_reorg.as_deref()
    }

    /// Union of every block across every (possibly truncated) chain.
    #[must_use]
    pub fn blocks_involved(&self) -> &HashMap<B256, Arc<Block>> {
        &self.blocks_involved
    }

    /// `|blocksInvolved| - depth`.
    #[must_use]
    pub const fn num_replaced(&self) -> usize {
        self.num_replaced
    }

    /// True iff every block in `blocksInvolved` was seen live
    /// (`Subscription`/`GetParent`), none reconstructed from an uncle
    /// reference.
    #[must_use]
    pub const fn seen_live(&self) -> bool {
        self.seen_live
    }

    /// True iff the longest chain is strictly longer than the
    /// second-longest — a winner has been determined.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.is_finished
    }

    /// Feed URIs that contributed at least one involved block.
    #[must_use]
    pub fn nodes_involved(&self) -> &HashSet<String> {
        &self.nodes_involved
    }

    /// Stable deduplication key: `"{start}_{end}_d{depth}_b{n}"`, suffixed
    /// `_l` when [`ReorgRecord::seen_live`].
    #[must_use]
    pub fn id(&self) -> String {
        let suffix = if self.seen_live { "_l" } else { "" };
        format!(
            "{}_{}_d{}_b{}{}",
            self.start_height,
            self.end_height,
            self.depth,
            self.blocks_involved.len(),
            suffix
        )
    }

    /// Render the involved edges as a Mermaid `graph TD` diagram: one edge
    /// `parentHash --> hash` per involved block, plus (when finished) one
    /// more edge from the winning branch's tip to `firstBlockAfterReorg`.
    #[must_use]
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("graph TD\n");
        for block in self.blocks_involved.values() {
            out.push_str(&format!("    {} --> {}\n", block.parent_hash(), block.hash()));
        }
        if let (Some(tip), Some(first)) = (self.main_chain_tip_hash, &self.first_block_after_reorg) {
            out.push_str(&format!("    {} --> {}\n", tip, first.hash()));
        }
        out
    }
}

/// Result of `analyzeTree`: the reorgs found plus summary counters.
#[derive(Debug, Clone)]
pub struct Analysis {
    /// Every reorg record found at a fork point in this tree, finished or
    /// not.
    pub records: Vec<ReorgRecord>,
    /// Total nodes in the tree this analysis ran over.
    pub num_blocks: usize,
    /// Nodes currently marked as on the main chain.
    pub num_main_chain: usize,
    /// Whether the tip currently has more than one latest node (an
    /// unresolved split).
    pub is_split_ongoing: bool,
}

/// Enumerate every reorg record in `tree`, per §4.4.
#[must_use]
#[tracing::instrument(skip(tree))]
pub fn extract(tree: &BlockTree) -> Analysis {
    let mut records = Vec::new();
    let mut num_main_chain = 0usize;

    for (id, node) in tree.iter() {
        if node.is_main_chain {
            num_main_chain += 1;
        }
        if node.children.len() >= 2 {
            records.push(build_record(tree, id));
        }
    }

    Analysis {
        records,
        num_blocks: tree.len(),
        num_main_chain,
        is_split_ongoing: tree.latest_nodes().len() > 1,
    }
}

fn leaf_paths(tree: &BlockTree, node_id: NodeId) -> Vec<Vec<NodeId>> {
    let node = tree.node(node_id);
    if node.children.is_empty() {
        return vec![vec![node_id]];
    }
    node.children
        .iter()
        .flat_map(|&child| {
            leaf_paths(tree, child).into_iter().map(move |mut path| {
                let mut full = vec![node_id];
                full.append(&mut path);
                full
            })
        })
        .collect()
}

fn build_record(tree: &BlockTree, fork_point: NodeId) -> ReorgRecord {
    let parent_node = tree.node(fork_point);
    let common_parent = Arc::clone(&parent_node.block);

    let mut chains: Vec<Chain> = Vec::new();
    for &child in &parent_node.children {
        for path in leaf_paths(tree, child) {
            let root_hash = tree.node(child).block.hash();
            let blocks = path.iter().map(|&id| Arc::clone(&tree.node(id).block)).collect();
            chains.push(Chain { root_hash, blocks });
        }
    }

    let mut lengths: Vec<usize> = chains.iter().map(|c| c.blocks.len()).collect();
    lengths.sort_unstable_by(|a, b| b.cmp(a));
    let l0 = lengths[0];
    let l1 = lengths.get(1).copied().unwrap_or(0);
    let depth = l1;
    let is_finished = l0 > l1;

    let winner_idx = is_finished.then(|| chains.iter().position(|c| c.blocks.len() == l0)).flatten();

    let first_block_after_reorg = winner_idx.map(|idx| Arc::clone(&chains[idx].blocks[depth]));
    let main_chain_hash = winner_idx.map(|idx| chains[idx].root_hash);

    let main_chain_tip_hash = winner_idx.map(|idx| {
        chains[idx].blocks.truncate(depth);
        chains[idx].blocks[depth - 1].hash()
    });

    let mut blocks_involved: HashMap<B256, Arc<Block>> = HashMap::new();
    for chain in &chains {
        for block in &chain.blocks {
            blocks_involved.insert(block.hash(), Arc::clone(block));
        }
    }

    let end_height = if is_finished {
        chains[winner_idx.expect("is_finished implies a winner")]
            .blocks
            .last()
            .expect("every chain has at least one block")
            .number()
    } else {
        chains.iter().map(|c| c.blocks.last().map_or(0, Block::number)).max().unwrap_or(common_parent.number())
    };

    let seen_live = blocks_involved.values().all(|b| b.origin().is_live());
    let nodes_involved = blocks_involved.values().map(|b| b.source().to_string()).collect();
    let num_replaced = blocks_involved.len() - depth;

    ReorgRecord {
        start_height: common_parent.number() + 1,
        end_height,
        common_parent,
        chains,
        depth,
        main_chain_hash,
        main_chain_tip_hash,
        first_block_after_reorg,
        blocks_involved,
        num_replaced,
        seen_live,
        is_finished,
        nodes_involved,
    }
}
