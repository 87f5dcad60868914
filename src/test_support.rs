//! In-memory [`NodeCache`] and test-tree builder, plus a fault-injecting
//! wrapper (`race_fault()`, recovered from `original_source`).
//!
//! Real storage/eviction is out of scope; this is the minimal
//! collaborator the cursor core needs to be exercised in tests, the same
//! role quickstep's `tests/quickstep_put_basic.rs::new_db()`
//! helper plays for `QuickStep`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use crate::error::{BtreeError, BtreeResult};
use crate::key::Key;
use crate::node::{Bset, BtreeNode, Entry, NodeCache, NodeId};
use crate::node_lock::LockMode;
use crate::pos::{BtreeId, POS_MAX, POS_MIN};

/// A flat, non-evicting node cache: every node ever created stays resident.
/// Good enough to drive the cursor/transaction core end to end without a
/// real storage layer underneath it.
pub struct MemCache {
    nodes: RwLock<HashMap<NodeId, Arc<BtreeNode>>>,
    roots: RwLock<HashMap<BtreeId, NodeId>>,
    next_id: AtomicU64,
}

impl Default for MemCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemCache {
    pub fn new() -> MemCache {
        MemCache {
            nodes: RwLock::new(HashMap::new()),
            roots: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn alloc_id(&self) -> NodeId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn insert(&self, node: Arc<BtreeNode>) {
        self.nodes.write().unwrap().insert(node.id, node);
    }

    pub fn set_root(&self, btree_id: BtreeId, node: Arc<BtreeNode>) {
        self.roots.write().unwrap().insert(btree_id, node.id);
        self.insert(node);
    }

    pub fn get(&self, id: NodeId) -> Option<Arc<BtreeNode>> {
        self.nodes.read().unwrap().get(&id).cloned()
    }

    /// Build a single-leaf tree spanning the whole key space and containing
    /// `entries` (already sorted by key position), and make it the root of
    /// `btree_id`.
    pub fn bulk_load_leaf(&self, btree_id: BtreeId, entries: Vec<Entry>) -> Arc<BtreeNode> {
        let id = self.alloc_id();
        let node = Arc::new(BtreeNode::new_leaf(id, btree_id, POS_MIN, POS_MAX));
        *node.bsets.write().unwrap() = vec![Bset { entries }];
        self.set_root(btree_id, Arc::clone(&node));
        node
    }

    /// Build a two-level tree: `leaves` lists `(max_key, entries)` in
    /// ascending order, each already sorted by key position; the last
    /// leaf's `max_key` must be `POS_MAX`. Returns the interior root and
    /// the leaves in the same order, so tests can exercise multi-level
    /// descent, `find_child`, prefetch, and interior fixup rather than only
    /// ever hitting a single leaf.
    pub fn bulk_load_tree(&self, btree_id: BtreeId, leaves: Vec<(crate::pos::Pos, Vec<Entry>)>) -> (Arc<BtreeNode>, Vec<Arc<BtreeNode>>) {
        assert!(!leaves.is_empty(), "bulk_load_tree needs at least one leaf");
        assert_eq!(leaves.last().unwrap().0, POS_MAX, "last leaf must cover up to POS_MAX");

        let mut leaf_nodes = Vec::with_capacity(leaves.len());
        let mut interior_entries = Vec::with_capacity(leaves.len());
        let mut min = POS_MIN;
        for (max_key, entries) in leaves {
            let id = self.alloc_id();
            let node = Arc::new(BtreeNode::new_leaf(id, btree_id, min, max_key));
            *node.bsets.write().unwrap() = vec![Bset { entries }];
            self.insert(Arc::clone(&node));
            interior_entries.push(Entry::interior(Key::point(max_key, 0), id));
            min = btree_id.successor(max_key);
            leaf_nodes.push(node);
        }

        let root_id = self.alloc_id();
        let root = Arc::new(BtreeNode::new_interior(root_id, btree_id, 1, POS_MIN, POS_MAX));
        *root.bsets.write().unwrap() = vec![Bset { entries: interior_entries }];
        self.set_root(btree_id, Arc::clone(&root));
        (root, leaf_nodes)
    }
}

impl NodeCache for MemCache {
    fn root(&self, btree_id: BtreeId) -> Arc<BtreeNode> {
        let roots = self.roots.read().unwrap();
        let id = *roots.get(&btree_id).expect("root not set for this btree");
        Arc::clone(self.nodes.read().unwrap().get(&id).expect("root id not in cache"))
    }

    fn get_node(&self, child: NodeId, _level: u16, mode: LockMode, _may_drop_locks: bool) -> BtreeResult<Arc<BtreeNode>> {
        let node = {
            let nodes = self.nodes.read().unwrap();
            Arc::clone(nodes.get(&child).ok_or(BtreeError::Io)?)
        };
        node.lock.lock(mode);
        Ok(node)
    }

    fn prefetch(&self, _child: NodeId, _level: u16) {}

    fn cache_cannibalise_lock(&self) -> BtreeResult<()> {
        Ok(())
    }

    fn cache_cannibalise_unlock(&self) {}
}

/// Wraps any [`NodeCache`] and fires `inject_race_fault` every `N`th call,
/// forcing `traverse` down its restart path on demand.
pub struct FaultInjectingCache {
    inner: Arc<dyn NodeCache>,
    fault_every: usize,
    calls: AtomicUsize,
}

impl FaultInjectingCache {
    pub fn new(inner: Arc<dyn NodeCache>, fault_every: usize) -> FaultInjectingCache {
        FaultInjectingCache { inner, fault_every, calls: AtomicUsize::new(0) }
    }
}

impl NodeCache for FaultInjectingCache {
    fn root(&self, btree_id: BtreeId) -> Arc<BtreeNode> {
        self.inner.root(btree_id)
    }

    fn get_node(&self, child: NodeId, level: u16, mode: LockMode, may_drop_locks: bool) -> BtreeResult<Arc<BtreeNode>> {
        self.inner.get_node(child, level, mode, may_drop_locks)
    }

    fn prefetch(&self, child: NodeId, level: u16) {
        self.inner.prefetch(child, level)
    }

    fn cache_cannibalise_lock(&self) -> BtreeResult<()> {
        self.inner.cache_cannibalise_lock()
    }

    fn cache_cannibalise_unlock(&self) {
        self.inner.cache_cannibalise_unlock()
    }

    fn inject_race_fault(&self) -> bool {
        if self.fault_every == 0 {
            return false;
        }
        let n = self.calls.fetch_add(1, Ordering::Relaxed);
        n % self.fault_every == self.fault_every - 1
    }
}
