//! Peer-ring lock coordinator.
//!
//! When cursor `a` is about to lock a node through the blocking path,
//! [`decide`] inspects every ring peer and enforces, in order:
//!
//! - R1 recursive increment: a peer already holding the node in `mode` or
//!   stronger means `a` shares that hold via
//!   [`NodeLock::increment`](crate::node_lock::NodeLock::increment) rather
//!   than acquiring independently.
//! - R2 global key order: locks across the ring are acquired in ascending
//!   `(btree_id, pos)` order; a request that would go out of that order
//!   restarts rather than risk a wait cycle.
//! - R3 no-intent-while-reader: requesting intent while a peer holds a
//!   plain read lock could have that peer later block on an intent holder
//!   that is itself waiting on this request. Raise the peer's `locks_want`
//!   (and opportunistically upgrade it in place) if allowed to, else
//!   restart.
//! - R4 ancestors before descendants: a peer holding locks below `level`
//!   but none at or above it is made to raise `locks_want` to cover
//!   `level`, so a later acquisition by that peer doesn't itself invert
//!   the order `a` is establishing now.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::cursor::{ring, Cursor};
use crate::node::{BtreeNode, NodeId};
use crate::node_lock::LockMode;
use crate::pos::{BtreeId, Pos};

/// Outcome of applying R1/R2 for one pending lock acquisition.
pub enum Decision {
    /// A peer already holds this node in a compatible mode; reuse it via
    /// `increment` instead of acquiring independently.
    Reuse(Arc<BtreeNode>),
    /// No peer conflict; acquire the lock directly.
    Proceed,
    /// R2 would be violated by this acquisition; the caller must drop all
    /// locks and restart the traversal.
    Restart,
}

/// R1: does any peer of `a` already hold `node_id` locked in `mode` or
/// stronger? Returns that peer's node reference (the "same logical lock").
fn peer_holding(slots: &[Option<Cursor>], a: usize, node_id: NodeId, mode: LockMode) -> Option<Arc<BtreeNode>> {
    for peer in ring::peers(slots, a) {
        let cursor = slots[peer].as_ref()?;
        for lvl_idx in 0..cursor.depth as usize {
            let lvl = cursor.level(lvl_idx);
            if let (Some(node), Some(held)) = (&lvl.node, lvl.lock_mode) {
                if node.id == node_id && held >= mode {
                    return Some(Arc::clone(node));
                }
            }
        }
    }
    None
}

fn cursor_has_any_lock(cursor: &Cursor) -> bool {
    (0..cursor.depth as usize).any(|i| cursor.level(i).is_locked())
}

/// Raise `peer`'s `locks_want` to cover `level` and opportunistically
/// upgrade any of its read-held levels to intent in place (R3/R4's
/// "recompute its locks" step). Upgrades that can't succeed without
/// blocking are left for the peer's own next traversal to retry.
fn raise_locks_want_and_upgrade(slots: &mut [Option<Cursor>], peer: usize, level: u8) {
    let cursor = slots[peer].as_mut().unwrap();
    if cursor.locks_want <= level {
        cursor.locks_want = level + 1;
    }
    for i in 0..cursor.depth as usize {
        let lvl = cursor.level_mut(i);
        if lvl.lock_mode == Some(LockMode::Read) {
            if let Some(node) = lvl.node.clone() {
                if node.lock.try_upgrade() {
                    lvl.lock_mode = Some(LockMode::Intent);
                }
            }
        }
    }
}

/// Apply R1/R2 for cursor `a` about to lock `node_id` in `mode`. R3/R4 are
/// separate calls ([`enforce_no_intent_while_reader`],
/// [`enforce_ancestors_before_descendants`]) since they mutate peers rather
/// than decide `a`'s own acquisition.
pub fn decide(slots: &mut [Option<Cursor>], a: usize, node_id: NodeId, mode: LockMode) -> Decision {
    if let Some(node) = peer_holding(slots, a, node_id, mode) {
        return Decision::Reuse(node);
    }

    let (a_btree_id, a_pos) = {
        let ca = slots[a].as_ref().unwrap();
        (ca.btree_id, ca.pos)
    };

    // R2: a request that would land before a position already anchoring a
    // peer's locked subtree is out of global order.
    for peer in ring::peers(slots, a) {
        let cb = slots[peer].as_ref().unwrap();
        if cursor_has_any_lock(cb) && in_order(a_btree_id, a_pos, cb.btree_id, cb.pos) == Ordering::Less {
            return Decision::Restart;
        }
    }

    Decision::Proceed
}

/// R2's ordering predicate: does `(tree, pos)` come before `(other_tree,
/// other_pos)` in the ascending global lock order?
pub fn in_order(tree: BtreeId, pos: Pos, other_tree: BtreeId, other_pos: Pos) -> Ordering {
    tree.cmp_keyed(pos, other_tree, other_pos)
}

/// R3: for an intent acquisition, raise (and opportunistically upgrade) any
/// peer that holds a plain read lock rather than intent anywhere. Returns
/// `false` if a peer needed fixing but `may_drop_locks` was `false`, in
/// which case the caller must restart.
pub fn enforce_no_intent_while_reader(slots: &mut [Option<Cursor>], a: usize, level: u8, mode: LockMode, may_drop_locks: bool) -> bool {
    if mode != LockMode::Intent {
        return true;
    }
    for peer in ring::peers(slots, a) {
        let needs_fix = {
            let cb = slots[peer].as_ref().unwrap();
            (0..cb.depth as usize).any(|i| cb.level(i).lock_mode == Some(LockMode::Read))
        };
        if needs_fix {
            if !may_drop_locks {
                return false;
            }
            raise_locks_want_and_upgrade(slots, peer, level);
        }
    }
    true
}

/// R4: any peer holding locks below `level` but none at or above it is made
/// to raise `locks_want` to cover `level`, so its next descent won't later
/// invert the order this acquisition is establishing. Never blocks or
/// restarts `a`.
pub fn enforce_ancestors_before_descendants(slots: &mut [Option<Cursor>], a: usize, level: u8) {
    for peer in ring::peers(slots, a) {
        let (has_below, has_at_or_above) = {
            let cb = slots[peer].as_ref().unwrap();
            let below = (0..level as usize).any(|i| i < cb.depth as usize && cb.level(i).is_locked());
            let at_or_above = (level as usize..cb.depth as usize).any(|i| cb.level(i).is_locked());
            (below, at_or_above)
        };
        if has_below && !has_at_or_above {
            let cursor = slots[peer].as_mut().unwrap();
            if cursor.locks_want <= level {
                cursor.locks_want = level + 1;
            }
        }
    }
}

/// Debug-only consistency check over an entire transaction's slot pool:
/// no cursor is listed as its own ring peer, and ring membership is
/// symmetric. Scoped port of `original_source`'s `btree_trans_verify`.
#[cfg(debug_assertions)]
pub fn debug_assert_ring_consistent(slots: &[Option<Cursor>]) {
    for (i, slot) in slots.iter().enumerate() {
        let Some(cursor) = slot else { continue };
        if !cursor.is_linked() {
            continue;
        }
        let peers = ring::peers(slots, i);
        debug_assert!(!peers.contains(&i), "a cursor cannot be its own ring peer");
        for &p in &peers {
            let back = ring::peers(slots, p);
            debug_assert!(back.contains(&i), "ring membership must be symmetric");
        }
    }
}
