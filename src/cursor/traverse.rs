//! Traversal state machine: get a cursor from "needs work" to `UpToDate`.
//!
//! Lock acquisition during descent routes through [`crate::peer_ring`] so
//! R1-R4 are enforced against every other cursor in the same ring, not
//! just checked against the node being locked in isolation. The source's
//! `__bch2_btree_iter_traverse` tries a non-blocking trylock-and-unwind
//! dance first and only blocks as a last resort, because its locks are
//! pure spin-CAS and blocking has no cheap wakeup path. This core's
//! [`crate::node_lock::NodeLock`] can park a waiter directly, so once the
//! peer-ring rules clear an acquisition, descent takes it with the
//! blocking path; combined with R2's global order that is still
//! deadlock-free, it just gives up the source's optimistic non-blocking
//! fast path under contention.
//!
//! On `Restart`/`NoMem`, [`traverse_error`] runs the source's "retry-all"
//! recovery: unlock every cursor in the ring, sort the ring into ascending
//! `(btree_id, pos)` order, and retraverse in that order, so two cursors
//! trading restarts against each other still converge instead of livelocking.

use std::sync::Arc;

use crate::error::{BtreeError, BtreeResult};
use crate::flags::{IterFlags, Uptodate};
use crate::node::{Bset, BtreeNode, NodeCache, NodeId};
use crate::node_iter::NodeIter;
use crate::node_lock::LockMode;
use crate::peer_ring;
use crate::pos::Pos;

use super::{lock_ops, ring, Cursor, MAX_DEPTH};

const MAX_TRAVERSE_RESTARTS: u32 = 64;

/// Bring the cursor in slot `slot` to `UpToDate`, relocking cheaply where
/// possible and falling back to a full top-down descent, and on failure to
/// the ring-wide retry-all recovery.
pub fn traverse(slots: &mut [Option<Cursor>], slot: usize, cache: &dyn NodeCache) -> BtreeResult<()> {
    if slots[slot].as_ref().unwrap().uptodate == Uptodate::UpToDate {
        return Ok(());
    }

    let can_relock = slots[slot].as_ref().unwrap().uptodate <= Uptodate::NeedRelock;
    if can_relock && lock_ops::relock_all(slots[slot].as_mut().unwrap()) {
        slots[slot].as_mut().unwrap().uptodate = Uptodate::UpToDate;
        return Ok(());
    }

    match descend(slots, slot, cache) {
        Ok(()) => {
            slots[slot].as_mut().unwrap().uptodate = Uptodate::UpToDate;
            Ok(())
        }
        Err(e @ (BtreeError::Restart | BtreeError::NoMem)) => {
            traverse_error(slots, slot, cache, e)?;
            slots[slot].as_mut().unwrap().uptodate = Uptodate::UpToDate;
            Ok(())
        }
        Err(e) => {
            slots[slot].as_mut().unwrap().unlock_all();
            Err(e)
        }
    }
}

fn lock_mode_for(locks_want: u8, level: usize) -> LockMode {
    if (level as u8) < locks_want {
        LockMode::Intent
    } else {
        LockMode::Read
    }
}

/// Acquire the root's lock in `mode`, honoring R1-R4 against `slot`'s ring
/// peers.
fn acquire_root(slots: &mut [Option<Cursor>], slot: usize, root: &Arc<BtreeNode>, level: u8, mode: LockMode) -> BtreeResult<()> {
    match peer_ring::decide(slots, slot, root.id, mode) {
        peer_ring::Decision::Restart => Err(BtreeError::Restart),
        peer_ring::Decision::Reuse(node) => {
            node.lock.increment(mode);
            Ok(())
        }
        peer_ring::Decision::Proceed => {
            if !peer_ring::enforce_no_intent_while_reader(slots, slot, level, mode, true) {
                return Err(BtreeError::Restart);
            }
            peer_ring::enforce_ancestors_before_descendants(slots, slot, level);
            root.lock.lock(mode);
            Ok(())
        }
    }
}

/// Fetch-and-lock a child in `mode`, honoring R1-R4. On an R1 reuse the
/// node comes from the peer's own held reference rather than a fresh
/// cache fetch.
fn acquire_child(
    slots: &mut [Option<Cursor>],
    slot: usize,
    child_id: NodeId,
    child_level: u16,
    mode: LockMode,
    cache: &dyn NodeCache,
) -> BtreeResult<Arc<BtreeNode>> {
    match peer_ring::decide(slots, slot, child_id, mode) {
        peer_ring::Decision::Restart => Err(BtreeError::Restart),
        peer_ring::Decision::Reuse(node) => {
            node.lock.increment(mode);
            Ok(node)
        }
        peer_ring::Decision::Proceed => {
            if !peer_ring::enforce_no_intent_while_reader(slots, slot, child_level as u8, mode, true) {
                return Err(BtreeError::Restart);
            }
            peer_ring::enforce_ancestors_before_descendants(slots, slot, child_level as u8);
            cache.get_node(child_id, child_level, mode, true)
        }
    }
}

fn descend(slots: &mut [Option<Cursor>], slot: usize, cache: &dyn NodeCache) -> BtreeResult<()> {
    let (btree_id, pos, locks_want, flags) = {
        let c = slots[slot].as_ref().unwrap();
        (c.btree_id, c.pos, c.locks_want, c.flags)
    };

    let root = cache.root(btree_id);
    let depth = root.level as usize + 1;
    if depth > MAX_DEPTH {
        return Err(BtreeError::Bug("tree deeper than the maximum supported depth"));
    }
    slots[slot].as_mut().unwrap().depth = depth as u8;

    let root_level = root.level;
    let root_mode = lock_mode_for(locks_want, root_level as usize);
    acquire_root(slots, slot, &root, root_level as u8, root_mode)?;

    // Root race: re-read the root pointer now that it's locked, and give
    // the fault-injection hook a chance to exercise the same restart path
    // under test even when nothing actually raced.
    if cache.inject_race_fault() || cache.root(btree_id).id != root.id {
        root.lock.unlock(root_mode);
        return Err(BtreeError::Restart);
    }

    if !root.contains_pos(pos) {
        root.lock.unlock(root_mode);
        return Err(BtreeError::Restart);
    }

    let mut node = root;
    let mut mode = root_mode;
    let mut level = node.level as usize;

    loop {
        let seq = node.lock.seq();
        let iter = {
            let bsets = node.bsets.read().unwrap();
            NodeIter::seek(&bsets, pos)
        };
        {
            let cursor = slots[slot].as_mut().unwrap();
            let lvl = cursor.level_mut(level);
            lvl.node = Some(Arc::clone(&node));
            lvl.lock_mode = Some(mode);
            lvl.lock_seq = seq;
            lvl.iter = iter;
        }

        if level == 0 {
            return Ok(());
        }

        let child_id = {
            let bsets = node.bsets.read().unwrap();
            find_child(&bsets, pos).ok_or(BtreeError::Bug("interior node has no child covering position"))?
        };

        let child_level = level as u16 - 1;
        if flags.contains(IterFlags::PREFETCH) {
            cache.prefetch(child_id, child_level);
        }

        let child_mode = lock_mode_for(locks_want, child_level as usize);
        let child = acquire_child(slots, slot, child_id, child_level, child_mode, cache)?;
        if !child.contains_pos(pos) {
            child.lock.unlock(child_mode);
            return Err(BtreeError::Restart);
        }

        node = child;
        mode = child_mode;
        level -= 1;
    }
}

/// The child entry covering `pos`: the first interior entry with
/// `key.p >= pos` (interior entries are keyed by their child's max_key).
fn find_child(bsets: &[Bset], pos: Pos) -> Option<NodeId> {
    let mut it = NodeIter::seek(bsets, pos);
    loop {
        let (_, entry) = it.peek_all(bsets)?;
        if let Some(child) = entry.child {
            return Some(child);
        }
        it.advance(bsets);
    }
}

/// Retry-all recovery from a failed `descend` on cursor `failed`: unlock
/// every cursor in its ring, sort the ring into ascending `(btree_id,
/// pos)` order, and retraverse in that order. `NoMem` brackets the whole
/// attempt in the cache's cannibalise lock so eviction doesn't race a
/// concurrent cannibaliser while this ring is mid-retry.
fn traverse_error(slots: &mut [Option<Cursor>], failed: usize, cache: &dyn NodeCache, err: BtreeError) -> BtreeResult<()> {
    let mut ring_slots = ring::peers(slots, failed);
    ring_slots.push(failed);
    for &s in &ring_slots {
        slots[s].as_mut().unwrap().unlock_all();
    }

    let cannibalising = err == BtreeError::NoMem;
    if cannibalising {
        cache.cache_cannibalise_lock()?;
    }

    let mut attempts = 0;
    let result = loop {
        ring_slots.sort_by(|&x, &y| {
            let cx = slots[x].as_ref().unwrap();
            let cy = slots[y].as_ref().unwrap();
            cx.btree_id.cmp_keyed(cx.pos, cy.btree_id, cy.pos)
        });

        match retraverse_sorted(slots, &ring_slots, cache) {
            Ok(()) => break Ok(()),
            Err(BtreeError::Restart) => {
                attempts += 1;
                if attempts > MAX_TRAVERSE_RESTARTS {
                    break Err(BtreeError::Restart);
                }
            }
            Err(e) => break Err(e),
        }
    };

    if cannibalising {
        cache.cache_cannibalise_unlock();
    }

    result
}

fn retraverse_sorted(slots: &mut [Option<Cursor>], ring_slots: &[usize], cache: &dyn NodeCache) -> BtreeResult<()> {
    for &s in ring_slots {
        match descend(slots, s, cache) {
            Ok(()) => slots[s].as_mut().unwrap().uptodate = Uptodate::UpToDate,
            Err(e) => {
                for &u in ring_slots {
                    slots[u].as_mut().unwrap().unlock_all();
                }
                return Err(e);
            }
        }
    }
    Ok(())
}
