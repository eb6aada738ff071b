//! Arena-indexed block tree.
//!
//! Parent/child pointers are indices into a [`Vec`] rather than `Rc`/
//! `RefCell` cycles: the tree is rebuilt from the cache on every analysis
//! cycle rather than mutated in place, so there is nothing to reclaim
//! between builds beyond dropping the arena itself.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::B256;

use crate::cache::BlockCache;
use crate::domain::block::Block;
use crate::error::EngineError;

/// Index of a node within a [`BlockTree`]'s arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// A cached block plus its position in the tree.
#[derive(Debug)]
pub struct TreeNode {
    /// The observation this node wraps.
    pub block: Arc<Block>,
    /// Parent node, or `None` for the root of the retained tree.
    pub parent: Option<NodeId>,
    /// Child nodes, in insertion order.
    pub children: Vec<NodeId>,
    /// Whether this is the root of the retained tree.
    pub is_first: bool,
    /// Whether this node lies on the current unique path to the tip.
    pub is_main_chain: bool,
}

/// A rooted parent-child tree built from a window of the block cache.
#[derive(Debug, Default)]
pub struct BlockTree {
    nodes: Vec<TreeNode>,
    by_hash: HashMap<B256, NodeId>,
    main_chain_by_hash: HashMap<B256, NodeId>,
    first: Option<NodeId>,
    latest_nodes: Vec<NodeId>,
    latest_height: u64,
}

impl BlockTree {
    /// The root of the retained tree, if any block has been inserted.
    #[must_use]
    pub const fn first(&self) -> Option<NodeId> {
        self.first
    }

    /// Nodes at the maximum height observed in this tree.
    #[must_use]
    pub fn latest_nodes(&self) -> &[NodeId] {
        &self.latest_nodes
    }

    /// Look up a node by the hash of the block it wraps.
    #[must_use]
    pub fn find(&self, hash: B256) -> Option<NodeId> {
        self.by_hash.get(&hash).copied()
    }

    /// Whether `hash` lies on the current main chain.
    #[must_use]
    pub fn is_main_chain(&self, hash: B256) -> bool {
        self.main_chain_by_hash.contains_key(&hash)
    }

    /// Borrow the node at `id`.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &TreeNode {
        &self.nodes[id.0]
    }

    /// All nodes, in insertion order. Used by the extractor to locate fork
    /// points.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &TreeNode)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    /// Number of nodes currently in the tree.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tree has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn insert_root(&mut self, block: Arc<Block>) -> NodeId {
        let height = block.number();
        let hash = block.hash();
        let id = NodeId(self.nodes.len());
        self.nodes.push(TreeNode {
            block,
            parent: None,
            children: Vec::new(),
            is_first: true,
            is_main_chain: false,
        });
        self.by_hash.insert(hash, id);
        self.first = Some(id);
        self.track_latest(id, height);
        id
    }

    fn insert_child(&mut self, block: Arc<Block>, parent: NodeId) -> NodeId {
        let height = block.number();
        let hash = block.hash();
        let id = NodeId(self.nodes.len());
        self.nodes.push(TreeNode {
            block,
            parent: Some(parent),
            children: Vec::new(),
            is_first: false,
            is_main_chain: false,
        });
        self.by_hash.insert(hash, id);
        self.nodes[parent.0].children.push(id);
        self.track_latest(id, height);
        id
    }

    fn track_latest(&mut self, id: NodeId, height: u64) {
        match height.cmp(&self.latest_height) {
            Ordering::Greater => {
                self.latest_height = height;
                self.latest_nodes = vec![id];
            }
            Ordering::Equal => self.latest_nodes.push(id),
            Ordering::Less => {}
        }
    }

    /// Invariant 3: mark the unique root-to-tip path when there is exactly
    /// one latest node; otherwise leave every mark clear (an ongoing split
    /// at the tip).
    fn recompute_main_chain(&mut self) {
        for node in &mut self.nodes {
            node.is_main_chain = false;
        }
        self.main_chain_by_hash.clear();

        if let [only] = self.latest_nodes[..] {
            let mut cursor = Some(only);
            while let Some(id) = cursor {
                self.nodes[id.0].is_main_chain = true;
                self.main_chain_by_hash.insert(self.nodes[id.0].block.hash(), id);
                cursor = self.nodes[id.0].parent;
            }
        }
    }
}

/// Build a tree from the `[start_height, end_height]` window of `cache`.
///
/// Scans forward from `start_height` for an unambiguous (single-block)
/// height to root the tree at, per §4.3 step 1. If no such height exists
/// within the window, returns an empty tree — the coordinator simply finds
/// no fork points this cycle and retries once more blocks narrow the
/// ambiguity.
///
/// # Errors
/// Returns [`EngineError::ParentMissing`] if a block's parent hash is not
/// present anywhere in the tree built so far.
pub fn build(cache: &BlockCache, start_height: u64, end_height: u64) -> Result<BlockTree, EngineError> {
    let mut root_height = start_height;
    while root_height <= end_height {
        let bucket_len = cache.height_bucket(root_height).map_or(0, HashMap::len);
        if bucket_len == 1 {
            break;
        }
        root_height += 1;
    }

    let mut tree = BlockTree::default();
    if root_height > end_height {
        return Ok(tree);
    }

    for height in root_height..=end_height {
        let Some(bucket) = cache.height_bucket(height) else {
            continue;
        };
        for block in bucket.values() {
            if tree.first.is_none() {
                tree.insert_root(Arc::clone(block));
            } else {
                let parent = tree.find(block.parent_hash()).ok_or(EngineError::ParentMissing {
                    hash: block.hash(),
                    height: block.number(),
                })?;
                tree.insert_child(Arc::clone(block), parent);
            }
        }
    }

    tree.recompute_main_chain();
    Ok(tree)
}
