//! Shared harness for the integration tests: builds a single-leaf tree
//! spanning the whole key space and offers a `put`/`delete` pair that drives
//! the same write-lock + fixup path a real mutation layer would.

use std::sync::Arc;

use latchtree::fixup;
use latchtree::key::Key;
use latchtree::node::{BtreeNode, Entry, NodeCache};
use latchtree::node_lock::LockMode;
use latchtree::pos::{BtreeId, Pos};
use latchtree::test_support::MemCache;
use latchtree::trans::Transaction;

pub fn new_harness(btree_id: BtreeId) -> (Arc<MemCache>, Arc<BtreeNode>) {
    let cache = Arc::new(MemCache::new());
    let root = cache.bulk_load_leaf(btree_id, Vec::new());
    (cache, root)
}

pub fn new_trans(cache: &Arc<MemCache>) -> Transaction {
    Transaction::new(cache.clone() as Arc<dyn NodeCache>)
}

/// Insert or overwrite a single point key, holding the node write-locked and
/// repairing any live cursor referencing it.
pub fn put(trans: &mut Transaction, root: &Arc<BtreeNode>, p: Pos, type_: u8, value: &[u8]) {
    root.lock.lock(LockMode::Intent);
    root.lock.lock_write(0);
    fixup::node_replace(trans.slots_mut(), root, Entry::leaf(Key::point(p, type_), value.to_vec()));
    root.lock.unlock(LockMode::Write);
    root.lock.unlock(LockMode::Intent);
}

pub fn put_extent(trans: &mut Transaction, root: &Arc<BtreeNode>, end: Pos, size: u64, type_: u8) {
    root.lock.lock(LockMode::Intent);
    root.lock.lock_write(0);
    fixup::node_replace(trans.slots_mut(), root, Entry::leaf(Key::extent(end, size, type_), Vec::new()));
    root.lock.unlock(LockMode::Write);
    root.lock.unlock(LockMode::Intent);
}

/// Mark `p` deleted in place (a whiteout), rather than physically removing
/// it, matching how a real mutation layer reclaims keys.
pub fn delete(trans: &mut Transaction, root: &Arc<BtreeNode>, p: Pos) {
    put(trans, root, p, latchtree::key::KEY_TYPE_DELETED, &[]);
}
