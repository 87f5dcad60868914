//! In-node iterator fixup protocol.
//!
//! When the (out-of-scope) mutation path edits a node's bset in place, any
//! cursor that already has that node's iterator positioned needs its
//! position corrected rather than invalidated outright, so this fixup
//! path exists instead of just bumping every affected cursor to
//! `NeedTraverse`. [`NodeIter::fixup`](crate::node_iter::NodeIter::fixup)
//! does the per-cursor index arithmetic; this module is the fan-out over
//! every live cursor that references the edited node, plus the interior
//! node "whiteout rewind" special case and the fallback for
//! edits too large to patch in place (`reinit_node`).

use std::sync::Arc;

use crate::cursor::Cursor;
use crate::flags::Uptodate;
use crate::node::{BtreeNode, Entry};
use crate::pos::Pos;

/// Repair every cursor with a level locked on `node` after its bset `bi`
/// took an edit that replaced `clobber` entries at `where_idx` with
/// `new_count` entries. `landed_on_new` picks, for a cursor whose position
/// fell inside the clobbered range, whether it now sits just after the
/// replacement (insert/overwrite) or at the hole left behind (drop).
///
/// Interior nodes get one extra step: a cursor that had already walked
/// past `where_idx` in a *different* bset may have skipped a whiteout that
/// the new entry now needs visible again, so those bsets get rewound to
/// just past the edit point.
pub fn node_iter_fix(
    slots: &mut [Option<Cursor>],
    node: &Arc<BtreeNode>,
    bi: usize,
    where_idx: usize,
    clobber: usize,
    new_count: usize,
    landed_on_new: bool,
) {
    let is_interior = !node.is_leaf();
    let where_pos = {
        let bsets = node.bsets.read().unwrap();
        bsets[bi].entries.get(where_idx).map(|e| e.key.p)
    };

    for slot in slots.iter_mut().flatten() {
        for lvl_idx in 0..slot.depth as usize {
            let touches = slot.level(lvl_idx).node.as_ref().is_some_and(|n| Arc::ptr_eq(n, node));
            if !touches {
                continue;
            }
            let level = slot.level_mut(lvl_idx);
            level.iter.fixup(bi, where_idx, clobber, new_count, landed_on_new);
            if is_interior {
                if let Some(pos) = where_pos {
                    let bsets = node.bsets.read().unwrap();
                    level.iter.rewind_past(&bsets, pos, bi);
                }
            }
            slot.uptodate.raise(Uptodate::NeedPeek);
        }
    }
}

/// Insert-or-overwrite a single key in `node`'s primary bset, repairing
/// every cursor with a level locked there. Caller must already hold `node`
/// write-locked.
pub fn node_replace(slots: &mut [Option<Cursor>], node: &Arc<BtreeNode>, entry: Entry) {
    let where_idx = {
        let bsets = node.bsets.read().unwrap();
        bsets[0].entries.partition_point(|e| e.key.p < entry.key.p)
    };
    let clobber = {
        let bsets = node.bsets.read().unwrap();
        usize::from(bsets[0].entries.get(where_idx).is_some_and(|e| e.key.p == entry.key.p))
    };
    {
        let mut bsets = node.bsets.write().unwrap();
        if clobber == 1 {
            bsets[0].entries[where_idx] = entry;
        } else {
            bsets[0].entries.insert(where_idx, entry);
        }
    }
    node_iter_fix(slots, node, 0, where_idx, clobber, 1, true);
}

/// Remove the entry at `p` from `node`'s primary bset, if present.
pub fn node_drop(slots: &mut [Option<Cursor>], node: &Arc<BtreeNode>, p: Pos) {
    let where_idx = {
        let bsets = node.bsets.read().unwrap();
        bsets[0].entries.binary_search_by(|e| e.key.p.cmp(&p)).ok()
    };
    let Some(where_idx) = where_idx else { return };
    {
        let mut bsets = node.bsets.write().unwrap();
        bsets[0].entries.remove(where_idx);
    }
    node_iter_fix(slots, node, 0, where_idx, 1, 0, false);
}

/// A node's content was replaced wholesale (split, merge, compaction)
/// rather than edited in place. Position-level fixup can't help here;
/// every cursor referencing it must fully retraverse.
pub fn reinit_node(slots: &mut [Option<Cursor>], node: &Arc<BtreeNode>) {
    for slot in slots.iter_mut().flatten() {
        for lvl_idx in 0..slot.depth as usize {
            if slot.level(lvl_idx).node.as_ref().is_some_and(|n| Arc::ptr_eq(n, node)) {
                slot.uptodate.raise(Uptodate::NeedTraverse);
            }
        }
    }
}
