//! NODES-mode cursor operations: `peek_node` / `next_node`.
//!
//! These walk node objects at the cursor's fixed level rather than keys;
//! the cursor's position still advances so a subsequent `peek_node`
//! resumes where the last one left off.

use std::sync::Arc;

use crate::error::{BtreeError, BtreeResult};
use crate::flags::{IterMode, Uptodate};
use crate::node::{BtreeNode, NodeCache};
use crate::pos::POS_MAX;

use super::{traverse, Cursor};

/// The node the cursor is currently positioned at, at its traversal level.
/// `level` is which of the cursor's locked levels to report (0 = leaf).
pub fn peek_node(slots: &mut [Option<Cursor>], slot: usize, cache: &dyn NodeCache, level: usize) -> BtreeResult<Option<Arc<BtreeNode>>> {
    if slots[slot].as_ref().unwrap().flags.mode() != IterMode::Nodes {
        return Err(BtreeError::Bug("peek_node called on a non-NODES cursor"));
    }
    traverse::traverse(slots, slot, cache)?;
    Ok(slots[slot].as_ref().unwrap().level(level).node.clone())
}

/// Advance to the next node at `level` and return it, or `None` once past
/// the tree's max key.
pub fn next_node(slots: &mut [Option<Cursor>], slot: usize, cache: &dyn NodeCache, level: usize) -> BtreeResult<Option<Arc<BtreeNode>>> {
    let current_max = match slots[slot].as_ref().unwrap().level(level).node.clone() {
        Some(n) => n.max_key,
        None => {
            traverse::traverse(slots, slot, cache)?;
            match slots[slot].as_ref().unwrap().level(level).node.clone() {
                Some(n) => n.max_key,
                None => return Ok(None),
            }
        }
    };
    if current_max == POS_MAX {
        return Ok(None);
    }
    let cursor = slots[slot].as_mut().unwrap();
    cursor.pos = cursor.btree_id.successor(current_max);
    cursor.uptodate.raise(Uptodate::NeedTraverse);
    peek_node(slots, slot, cache, level)
}
