//! Cursor state and the peer-ring linkage primitives.
//!
//! A [`Cursor`] is one stable slot inside a [`crate::trans::Transaction`]'s
//! pool: per-level locked-node state plus the flags/uptodate bookkeeping
//! that `traverse`/`iter_ops`/`set_pos` drive. The ring (next/prev peer
//! links) is stored on the cursor itself but only ever mutated through the
//! free functions at the bottom of this module, which take the whole slot
//! array so a link/unlink/copy can touch more than one cursor atomically.

pub mod iter_ops;
pub mod lock_ops;
pub mod node_walk;
pub mod set_pos;
pub mod traverse;

use std::sync::Arc;

use crate::flags::{IterFlags, Uptodate};
use crate::node::BtreeNode;
use crate::node_iter::NodeIter;
use crate::node_lock::LockMode;
use crate::pos::{BtreeId, Pos};

/// Matches the source's `BTREE_MAX_DEPTH`: enough levels for any tree this
/// core will ever see in practice, used to size the per-cursor level array
/// without heap churn on every traversal.
pub const MAX_DEPTH: usize = 8;

/// One locked level of a cursor's path from leaf (index 0) to root.
#[derive(Default)]
pub struct Level {
    pub node: Option<Arc<BtreeNode>>,
    pub lock_mode: Option<LockMode>,
    /// Sequence observed at lock time, for the relock-by-seq fast path.
    pub lock_seq: u64,
    pub iter: NodeIter,
}

impl Level {
    fn clear(&mut self) {
        self.node = None;
        self.lock_mode = None;
        self.lock_seq = 0;
        self.iter = NodeIter::empty();
    }

    pub fn is_locked(&self) -> bool {
        self.node.is_some() && self.lock_mode.is_some()
    }
}

pub struct Cursor {
    pub btree_id: BtreeId,
    pub pos: Pos,
    pub flags: IterFlags,
    pub uptodate: Uptodate,
    /// Number of levels from the leaf up that traversal should hold
    /// intent-locked rather than read-locked.
    pub locks_want: u8,
    /// Tree height as of the last successful traverse; `levels[depth..]`
    /// are unused.
    pub depth: u8,
    levels: [Level; MAX_DEPTH],
    /// Ring linkage: slot index of the next/previous cursor belonging to
    /// the same transaction. `None` on both ends means the
    /// cursor is not currently linked into any ring.
    pub(crate) ring_next: Option<usize>,
    pub(crate) ring_prev: Option<usize>,
}

impl Cursor {
    pub fn new(btree_id: BtreeId, pos: Pos, flags: IterFlags) -> Cursor {
        Cursor {
            btree_id,
            pos,
            flags,
            uptodate: Uptodate::NeedTraverse,
            locks_want: if flags.contains(IterFlags::INTENT) { 1 } else { 0 },
            depth: 0,
            levels: Default::default(),
            ring_next: None,
            ring_prev: None,
        }
    }

    pub fn level(&self, i: usize) -> &Level {
        &self.levels[i]
    }

    pub fn level_mut(&mut self, i: usize) -> &mut Level {
        &mut self.levels[i]
    }

    pub fn leaf(&self) -> &Level {
        &self.levels[0]
    }

    pub fn leaf_mut(&mut self) -> &mut Level {
        &mut self.levels[0]
    }

    pub fn is_linked(&self) -> bool {
        self.ring_next.is_some() || self.ring_prev.is_some()
    }

    /// Release every lock this cursor holds without forgetting node
    /// references (used before a retraverse or on drop). Leaves `depth`
    /// unchanged so a subsequent relock attempt still knows what it's
    /// aiming for.
    pub fn unlock_all(&mut self) {
        for lvl in self.levels.iter_mut() {
            if let (Some(node), Some(mode)) = (&lvl.node, lvl.lock_mode) {
                node.lock.unlock(mode);
            }
            lvl.lock_mode = None;
        }
    }

    /// Drop all per-level state, as if freshly constructed but keeping
    /// identity/flags (used when a cursor slot is recycled by
    /// `Transaction::get_iter`).
    pub fn reset(&mut self, btree_id: BtreeId, pos: Pos, flags: IterFlags) {
        self.unlock_all();
        for lvl in self.levels.iter_mut() {
            lvl.clear();
        }
        self.btree_id = btree_id;
        self.pos = pos;
        self.flags = flags;
        self.uptodate = Uptodate::NeedTraverse;
        self.locks_want = if flags.contains(IterFlags::INTENT) { 1 } else { 0 };
        self.depth = 0;
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        self.unlock_all();
    }
}

/// Peer-ring primitives. These operate over the whole slot
/// array because linking/unlinking/copying touches more than one cursor.
pub mod ring {
    use super::Cursor;

    /// Splice `slot` into the ring that `into` already belongs to (or start
    /// a fresh single-element ring containing both if `into` wasn't
    /// linked). Mirrors `bch2_btree_iter_link`.
    pub fn link(slots: &mut [Option<Cursor>], into: usize, slot: usize) {
        assert_ne!(into, slot);
        let into_next = slots[into].as_ref().unwrap().ring_next.unwrap_or(into);
        slots[slot].as_mut().unwrap().ring_next = Some(into_next);
        slots[slot].as_mut().unwrap().ring_prev = Some(into);
        slots[into].as_mut().unwrap().ring_next = Some(slot);
        slots[into_next].as_mut().unwrap().ring_prev = Some(slot);
    }

    /// Remove `slot` from whatever ring it's in. A no-op if it was
    /// already unlinked. Mirrors `bch2_btree_iter_unlink`.
    pub fn unlink(slots: &mut [Option<Cursor>], slot: usize) {
        let (prev, next) = {
            let c = slots[slot].as_ref().unwrap();
            (c.ring_prev, c.ring_next)
        };
        match (prev, next) {
            (Some(p), Some(n)) if p != slot => {
                slots[p].as_mut().unwrap().ring_next = Some(n);
                slots[n].as_mut().unwrap().ring_prev = Some(p);
            }
            _ => {}
        }
        let c = slots[slot].as_mut().unwrap();
        c.ring_prev = None;
        c.ring_next = None;
    }

    /// Every other slot currently in `start`'s ring, not including `start`
    /// itself. Used by the peer-ring coordinator to walk
    /// siblings when deciding relock order.
    pub fn peers(slots: &[Option<Cursor>], start: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut cur = match slots[start].as_ref().unwrap().ring_next {
            Some(n) if n != start => n,
            _ => return out,
        };
        while cur != start {
            out.push(cur);
            cur = slots[cur].as_ref().unwrap().ring_next.unwrap();
        }
        out
    }
}
