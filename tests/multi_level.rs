//! Multi-level trees and peer-ring coordination: everything
//! `tests/cursor_scenarios.rs`'s single-leaf harness can't reach --
//! interior descent, NODES-mode node_walk, upgrade/downgrade, and the
//! peer ring's R1/R2 rules plus the retry-all recovery they feed into.

mod support;

use std::sync::Arc;

use latchtree::error::BtreeError;
use latchtree::flags::IterFlags;
use latchtree::key::Key;
use latchtree::node::{Entry, NodeCache};
use latchtree::pos::{BtreeId, Pos, POS_MAX, POS_MIN};
use latchtree::test_support::{FaultInjectingCache, MemCache};
use latchtree::trans::Transaction;

const PAYLOAD_TYPE: u8 = 1;

fn point(off: u64, payload: u8) -> Entry {
    Entry::leaf(Key::point(Pos::new(0, off), PAYLOAD_TYPE), vec![payload])
}

#[test]
fn multi_level_descent_finds_keys_in_both_leaves() {
    let cache = Arc::new(MemCache::new());
    let mid = Pos::new(0, 99);
    let left: Vec<Entry> = (0..50).map(|i| point(i, i as u8)).collect();
    let right: Vec<Entry> = (100..150).map(|i| point(i, i as u8)).collect();
    cache.bulk_load_tree(BtreeId::Dirents, vec![(mid, left), (POS_MAX, right)]);

    let mut trans = Transaction::new(cache as Arc<dyn NodeCache>);
    let mut iter = trans.new_iter(BtreeId::Dirents, POS_MIN, IterFlags::empty()).unwrap();
    let mut seen = Vec::new();
    while let Some(entry) = iter.peek().unwrap() {
        seen.push(entry.key.p.offset);
        iter.next().unwrap();
    }
    let expected: Vec<u64> = (0..50).chain(100..150).collect();
    assert_eq!(seen, expected);
}

#[test]
fn peek_node_walks_interior_then_leaf_levels() {
    let cache = Arc::new(MemCache::new());
    let mid = Pos::new(0, 9);
    let left = vec![point(0, 1), point(5, 2)];
    let right = vec![point(20, 3)];
    let (root, leaves) = cache.bulk_load_tree(BtreeId::Dirents, vec![(mid, left), (POS_MAX, right)]);

    let mut trans = Transaction::new(cache as Arc<dyn NodeCache>);
    let mut iter = trans.new_iter(BtreeId::Dirents, POS_MIN, IterFlags::NODES).unwrap();

    let interior = iter.peek_node(1).unwrap().expect("interior root present at level 1");
    assert_eq!(interior.id, root.id);

    let leaf = iter.peek_node(0).unwrap().expect("leaf present at level 0");
    assert_eq!(leaf.id, leaves[0].id);

    let next_leaf = iter.next_node(0).unwrap().expect("second leaf reachable via next_node");
    assert_eq!(next_leaf.id, leaves[1].id);
    assert!(iter.next_node(0).unwrap().is_none());
}

/// R1: a cursor linked into a ring that already holds intent on a node must
/// reuse that hold via `increment` rather than blocking on it. On a single
/// thread, failing to do this doesn't just cost throughput, it hangs
/// forever -- there is nobody left to release the lock this cursor would be
/// waiting on.
#[test]
fn peer_ring_r1_lets_linked_cursors_share_intent_without_blocking() {
    let (cache, _root) = support::new_harness(BtreeId::Dirents);
    let mut trans = support::new_trans(&cache);

    let a = trans.get_iter(BtreeId::Dirents, Pos::new(0, 0), IterFlags::INTENT).unwrap();
    let b = trans.get_iter(BtreeId::Dirents, Pos::new(0, 0), IterFlags::INTENT).unwrap();
    trans.link(a, b);

    trans.iter(a).peek().unwrap();
    trans.iter(b).peek().unwrap();
}

/// R2 + the retry-all recovery: a cursor whose request would land before a
/// ring peer's already-held subtree restarts rather than risk a wait
/// cycle, and the ring-wide sort-and-retraverse step in `traverse_error`
/// lets both cursors land correctly in one pass instead of trading
/// restarts forever.
#[test]
fn out_of_order_ring_acquisition_recovers_via_sorted_retraverse() {
    let cache = Arc::new(MemCache::new());
    let mid = Pos::new(0, 99);
    let left = vec![point(10, 1)];
    let right = vec![point(150, 2)];
    cache.bulk_load_tree(BtreeId::Dirents, vec![(mid, left), (POS_MAX, right)]);

    let mut trans = Transaction::new(cache as Arc<dyn NodeCache>);
    let high = trans.get_iter(BtreeId::Dirents, Pos::new(0, 150), IterFlags::INTENT).unwrap();
    let low = trans.get_iter(BtreeId::Dirents, Pos::new(0, 10), IterFlags::INTENT).unwrap();
    trans.link(high, low);

    // `high` locks its leaf first; `low`'s subsequent descent would then be
    // acquiring a lock out of global order relative to a ring peer that
    // already holds one, so its first attempt must restart.
    let first = trans.iter(high).peek().unwrap().expect("high leaf has an entry");
    assert_eq!(first.key.p.offset, 150);

    let second = trans.iter(low).peek().unwrap().expect("low leaf has an entry");
    assert_eq!(second.key.p.offset, 10);
}

#[test]
fn upgrade_then_downgrade_roundtrip_via_tx_iter() {
    let (cache, _root) = support::new_harness(BtreeId::Dirents);
    let mut trans = support::new_trans(&cache);
    let mut iter = trans.new_iter(BtreeId::Dirents, Pos::new(0, 0), IterFlags::empty()).unwrap();

    iter.peek().unwrap();
    assert!(iter.upgrade(0), "sole reader should upgrade to intent in place");
    iter.downgrade();
}

/// The root-race recheck calls `inject_race_fault` right after locking the
/// root; wired up, a cache that always fires it drives every attempt into
/// `Restart` until the bounded retry count gives up, instead of the fault
/// hook sitting dead off the production path.
#[test]
fn persistent_race_fault_bounds_restarts_and_surfaces_the_error() {
    let (cache, _root) = support::new_harness(BtreeId::Dirents);
    let faulty = Arc::new(FaultInjectingCache::new(cache as Arc<dyn NodeCache>, 1));
    let mut trans = Transaction::new(faulty);
    let mut iter = trans.new_iter(BtreeId::Dirents, Pos::new(0, 0), IterFlags::empty()).unwrap();

    let err = iter.peek().unwrap_err();
    assert_eq!(err, BtreeError::Restart);
}
