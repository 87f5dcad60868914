//! Key-returning cursor operations: `peek` / `next` / `prev` / `peek_slot` /
//! `next_slot`.

use crate::error::{BtreeError, BtreeResult};
use crate::flags::{IterFlags, IterMode, Uptodate};
use crate::key::Key;
use crate::node::{Bset, BtreeNode, Entry, NodeCache};
use crate::node_iter::NodeIter;
use crate::pos::{POS_MAX, POS_MIN};

use super::{traverse, Cursor};

/// Cap on a fabricated hole's size when there's no next live key or node
/// boundary to bound it by.
const MAX_HOLE_SIZE: u64 = 1 << 20;

/// Return the entry at or after the cursor's position, advancing it to
/// match. `None` means the tree has no more live entries ahead. In SLOTS
/// mode a hole produces a synthetic deleted key rather than `None`.
pub fn peek(slots: &mut [Option<Cursor>], slot: usize, cache: &dyn NodeCache) -> BtreeResult<Option<Entry>> {
    loop {
        traverse::traverse(slots, slot, cache)?;
        let cursor = slots[slot].as_ref().unwrap();
        let leaf = cursor.leaf().node.clone().expect("traverse leaves a locked leaf");
        let pos = cursor.pos;

        let found = {
            let bsets = leaf.bsets.read().unwrap();
            let cursor = slots[slot].as_mut().unwrap();
            // Re-seek from the current position on every call rather than
            // trusting whatever the cached iterator was left pointing at:
            // `next`/`next_slot` only move the position forward, so a stale
            // cached position would keep returning the entry already
            // returned by the previous `peek`.
            cursor.level_mut(0).iter = NodeIter::seek(bsets.as_slice(), pos);
            match cursor.flags.mode() {
                IterMode::Nodes => return Err(BtreeError::Bug("peek called on a NODES-mode cursor")),
                IterMode::Keys => cursor.level_mut(0).iter.advance_to_live(bsets.as_slice()),
                IterMode::Slots => peek_slot_entry(cursor, &leaf, bsets.as_slice()),
            }
        };

        let cursor = slots[slot].as_mut().unwrap();
        if let Some(entry) = found {
            cursor.pos = entry.key.p;
            return Ok(Some(entry));
        }

        if leaf.max_key == POS_MAX {
            cursor.flags.insert(IterFlags::AT_END_OF_LEAF);
            return Ok(None);
        }
        cursor.pos = leaf.btree_id.successor(leaf.max_key);
        cursor.uptodate.raise(Uptodate::NeedTraverse);
    }
}

fn peek_slot_entry(cursor: &mut Cursor, leaf: &BtreeNode, bsets: &[Bset]) -> Option<Entry> {
    let pos = cursor.pos;
    match cursor.level_mut(0).iter.peek_all(bsets) {
        Some((_, entry)) if !entry.key.is_whiteout() => Some(entry),
        Some((_, entry)) => {
            let next_start = entry.key.start_pos(leaf.btree_id);
            Some(Entry::leaf(Key::fabricate_hole(pos, Some(next_start), MAX_HOLE_SIZE), Vec::new()))
        }
        None => {
            let bound = if leaf.max_key.inode == pos.inode {
                leaf.max_key.offset.saturating_sub(pos.offset).max(1)
            } else {
                MAX_HOLE_SIZE
            };
            Some(Entry::leaf(Key::fabricate_hole(pos, None, bound.min(MAX_HOLE_SIZE)), Vec::new()))
        }
    }
}

/// Advance past whatever `peek` last returned and peek again.
pub fn next(slots: &mut [Option<Cursor>], slot: usize, cache: &dyn NodeCache) -> BtreeResult<Option<Entry>> {
    let cursor = slots[slot].as_mut().unwrap();
    cursor.pos = cursor.btree_id.successor(cursor.pos);
    cursor.uptodate.raise(Uptodate::NeedPeek);
    peek(slots, slot, cache)
}

/// Return the live entry immediately before the cursor's position, moving
/// backward.
pub fn prev(slots: &mut [Option<Cursor>], slot: usize, cache: &dyn NodeCache) -> BtreeResult<Option<Entry>> {
    loop {
        traverse::traverse(slots, slot, cache)?;
        let cursor = slots[slot].as_ref().unwrap();
        let leaf = cursor.leaf().node.clone().expect("traverse leaves a locked leaf");

        let found = {
            let bsets = leaf.bsets.read().unwrap();
            let cursor = slots[slot].as_mut().unwrap();
            let mut result = None;
            loop {
                match cursor.level_mut(0).iter.prev_all(bsets.as_slice()) {
                    Some(e) if !e.key.is_whiteout() => {
                        result = Some(e);
                        break;
                    }
                    Some(_) => continue,
                    None => break,
                }
            }
            result
        };

        let cursor = slots[slot].as_mut().unwrap();
        if let Some(entry) = found {
            cursor.pos = entry.key.p;
            return Ok(Some(entry));
        }
        if leaf.min_key == POS_MIN {
            return Ok(None);
        }
        cursor.pos = leaf.btree_id.predecessor(leaf.min_key);
        cursor.uptodate.raise(Uptodate::NeedTraverse);
    }
}

/// `peek`, but forced into SLOTS semantics regardless of the cursor's own
/// flags.
pub fn peek_slot(slots: &mut [Option<Cursor>], slot: usize, cache: &dyn NodeCache) -> BtreeResult<Option<Entry>> {
    let cursor = slots[slot].as_mut().unwrap();
    let had = cursor.flags.contains(IterFlags::SLOTS);
    cursor.flags.insert(IterFlags::SLOTS);
    let result = peek(slots, slot, cache);
    if !had {
        slots[slot].as_mut().unwrap().flags.remove(IterFlags::SLOTS);
    }
    result
}

pub fn next_slot(slots: &mut [Option<Cursor>], slot: usize, cache: &dyn NodeCache) -> BtreeResult<Option<Entry>> {
    let cursor = slots[slot].as_mut().unwrap();
    cursor.pos = cursor.btree_id.successor(cursor.pos);
    cursor.uptodate.raise(Uptodate::NeedPeek);
    peek_slot(slots, slot, cache)
}
