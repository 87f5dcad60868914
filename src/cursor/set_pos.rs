//! Repositioning a cursor without necessarily retraversing.

use crate::flags::Uptodate;
use crate::node_iter::NodeIter;
use crate::pos::Pos;

use super::Cursor;

/// Move the cursor to `pos`. If `pos` is still covered by the currently
/// locked leaf this is just a cheap in-node reseek; otherwise the cursor is
/// marked for a full retraverse on the next `peek`/`next`/`prev`.
pub fn set_pos(cursor: &mut Cursor, pos: Pos) {
    let still_in_leaf = cursor.leaf().node.as_ref().is_some_and(|n| n.contains_pos(pos));
    if still_in_leaf {
        set_pos_same_leaf(cursor, pos);
    } else {
        cursor.pos = pos;
        cursor.uptodate.raise(Uptodate::NeedTraverse);
    }
}

/// Caller already knows `pos` is within the locked leaf's key range; reseek
/// the in-node iterator directly rather than going through `set_pos`'s
/// containment check.
pub fn set_pos_same_leaf(cursor: &mut Cursor, pos: Pos) {
    cursor.pos = pos;
    if let Some(leaf) = cursor.leaf().node.clone() {
        let bsets = leaf.bsets.read().unwrap();
        cursor.leaf_mut().iter = NodeIter::seek(&bsets, pos);
    }
    cursor.uptodate.raise(Uptodate::NeedPeek);
}
