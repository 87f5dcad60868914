//! Transaction: a bounded pool of stable cursor slots.

use std::ops::Range;
use std::sync::Arc;

use crate::cursor::ring;
use crate::cursor::Cursor;
use crate::error::{BtreeError, BtreeResult};
use crate::flags::{IterFlags, Uptodate};
use crate::node::NodeCache;
use crate::peer_ring;
use crate::pos::{BtreeId, Pos};

/// Matches the source's bound on live iterators per transaction.
pub const MAX_SLOTS: usize = 64;

/// Recursion-depth guard recovered from `original_source`'s
/// `bch2_btree_iter_link`, which `BUG_ON`s if a ring grows unbounded:
/// a transaction linking iterators in a loop is a bug, not a workload.
pub const MAX_RING_PEERS: usize = 32;

pub struct Transaction {
    cache: Arc<dyn NodeCache>,
    slots: Vec<Option<Cursor>>,
    live: Vec<bool>,
    scratch: Vec<u8>,
    scratch_used: usize,
    /// Highest live slot index as of the end of the previous `begin()`, or
    /// `None` before the first call. Anything allocated above this index
    /// during an attempt is contingent and gets unlinked when the next
    /// attempt begins.
    high_water: Option<usize>,
}

impl Transaction {
    pub fn new(cache: Arc<dyn NodeCache>) -> Transaction {
        Transaction {
            cache,
            slots: Vec::new(),
            live: Vec::new(),
            scratch: vec![0u8; 4096],
            scratch_used: 0,
            high_water: None,
        }
    }

    /// Allocate a cursor slot, reusing a freed one if available.
    pub fn get_iter(&mut self, btree_id: BtreeId, pos: Pos, flags: IterFlags) -> BtreeResult<usize> {
        if let Some(idx) = self.live.iter().position(|&l| !l) {
            self.slots[idx] = Some(Cursor::new(btree_id, pos, flags));
            self.live[idx] = true;
            return Ok(idx);
        }
        if self.slots.len() >= MAX_SLOTS {
            return Err(BtreeError::NoMem);
        }
        self.slots.push(Some(Cursor::new(btree_id, pos, flags)));
        self.live.push(true);
        Ok(self.slots.len() - 1)
    }

    /// Splice `slot` into `into`'s peer ring.
    pub fn link(&mut self, into: usize, slot: usize) {
        debug_assert!(
            ring::peers(&self.slots, into).len() < MAX_RING_PEERS,
            "ring grew past MAX_RING_PEERS"
        );
        ring::link(&mut self.slots, into, slot);
    }

    pub fn unlink(&mut self, slot: usize) {
        ring::unlink(&mut self.slots, slot);
    }

    /// Duplicate `src` into a fresh slot linked into the same ring,
    /// carrying over its locked per-level state so both cursors jointly
    /// pin whatever nodes `src` already holds (each held lock is shared via
    /// `increment`, not independently reacquired).
    pub fn copy_iter(&mut self, src: usize) -> BtreeResult<usize> {
        let (btree_id, pos, flags, locks_want, depth, uptodate) = {
            let c = self.slots[src].as_ref().ok_or(BtreeError::Bug("copy_iter: source slot is dead"))?;
            (c.btree_id, c.pos, c.flags, c.locks_want, c.depth, c.uptodate)
        };
        let dst = self.get_iter(btree_id, pos, flags)?;

        let (src_cursor, dst_cursor) = if src < dst {
            let (a, b) = self.slots.split_at_mut(dst);
            (a[src].as_mut().unwrap(), b[0].as_mut().unwrap())
        } else {
            let (a, b) = self.slots.split_at_mut(src);
            (b[0].as_mut().unwrap(), a[dst].as_mut().unwrap())
        };
        dst_cursor.locks_want = locks_want;
        dst_cursor.depth = depth;
        dst_cursor.uptodate = uptodate;
        for i in 0..depth as usize {
            let src_lvl = src_cursor.level(i);
            let Some(node) = src_lvl.node.clone() else { continue };
            let Some(mode) = src_lvl.lock_mode else { continue };
            let seq = src_lvl.lock_seq;
            let iter = src_lvl.iter.clone();
            node.lock.increment(mode);
            let dst_lvl = dst_cursor.level_mut(i);
            dst_lvl.node = Some(node);
            dst_lvl.lock_mode = Some(mode);
            dst_lvl.lock_seq = seq;
            dst_lvl.iter = iter;
        }

        self.link(src, dst);
        Ok(dst)
    }

    /// Release a slot, unlinking it from its ring first.
    pub fn free_iter(&mut self, slot: usize) {
        self.unlink(slot);
        self.slots[slot] = None;
        self.live[slot] = false;
    }

    pub fn cursor(&self, slot: usize) -> &Cursor {
        self.slots[slot].as_ref().expect("dead slot accessed")
    }

    pub fn cursor_mut(&mut self, slot: usize) -> &mut Cursor {
        self.slots[slot].as_mut().expect("dead slot accessed")
    }

    pub fn slots_mut(&mut self) -> &mut [Option<Cursor>] {
        &mut self.slots
    }

    pub fn cache(&self) -> &dyn NodeCache {
        self.cache.as_ref()
    }

    pub fn cache_arc(&self) -> Arc<dyn NodeCache> {
        Arc::clone(&self.cache)
    }

    /// Bump-allocate `len` scratch bytes that live for the rest of the
    /// transaction attempt. Any range already handed out is invalidated the
    /// moment the arena grows, so growth itself forces a restart rather
    /// than silently relocating underneath whoever is still holding an
    /// earlier range.
    pub fn kmalloc(&mut self, len: usize) -> BtreeResult<Range<usize>> {
        const MAX_SCRATCH: usize = 1 << 20;
        if self.scratch_used + len > self.scratch.len() {
            let new_len = (self.scratch.len() * 2).max(self.scratch_used + len);
            if new_len > MAX_SCRATCH {
                return Err(BtreeError::NoMem);
            }
            self.scratch.resize(new_len, 0);
            return Err(BtreeError::Restart);
        }
        let start = self.scratch_used;
        self.scratch_used += len;
        Ok(start..self.scratch_used)
    }

    pub fn scratch(&self) -> &[u8] {
        &self.scratch
    }

    pub fn scratch_mut(&mut self) -> &mut [u8] {
        &mut self.scratch
    }

    /// Drop every lock held by every live cursor without forgetting
    /// position.
    pub fn unlock_all(&mut self) {
        for slot in self.slots.iter_mut().flatten() {
            slot.unlock_all();
        }
    }

    /// Reset every live cursor to `NeedTraverse` after dropping its locks,
    /// ready for a fresh attempt following a restart. Cursor slots that the
    /// previous attempt allocated beyond its own starting baseline (e.g.
    /// via `copy_iter`) are contingent on that attempt and don't survive
    /// into the next one; they're unlinked and freed here.
    pub fn begin(&mut self) {
        if let Some(hw) = self.high_water {
            for idx in hw..self.slots.len() {
                if self.live[idx] {
                    self.unlink(idx);
                    self.slots[idx] = None;
                    self.live[idx] = false;
                }
            }
        }
        self.unlock_all();
        for slot in self.slots.iter_mut().flatten() {
            slot.uptodate.raise(Uptodate::NeedTraverse);
        }
        self.scratch_used = 0;
        self.high_water = Some(self.live.iter().rposition(|&l| l).map_or(0, |i| i + 1));
    }

    /// Tear down every cursor slot.
    pub fn exit(&mut self) {
        self.slots.clear();
        self.live.clear();
        self.scratch_used = 0;
        self.high_water = None;
    }

    #[cfg(debug_assertions)]
    pub fn debug_assert_consistent(&self) {
        peer_ring::debug_assert_ring_consistent(&self.slots);
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        self.exit();
    }
}
