//! latchtree - a lock-coupled B-tree cursor and transaction core for a
//! copy-on-write index.
//!
//! Cursors ([`cursor::Cursor`]) walk a persistent, multi-level keyed
//! B-tree under fine-grained per-node locks ([`node_lock::NodeLock`]);
//! a [`trans::Transaction`] groups cursors into a consistent,
//! deadlock-free view via the peer-ring coordinator ([`peer_ring`]).
//! Storage and eviction policy and on-disk I/O are an external
//! collaborator, captured here only as the [`node::NodeCache`] trait.

pub mod cursor;
pub mod error;
pub mod fixup;
pub mod flags;
pub mod key;
pub mod node;
pub mod node_iter;
pub mod node_lock;
pub mod peer_ring;
pub mod pos;
pub mod trans;

/// In-memory [`node::NodeCache`] and tree-builder helpers for exercising
/// the cursor/transaction core without a real storage layer. Public so
/// downstream integration tests (and anyone embedding this core) can use
/// it directly, the way quickstep's own test helpers build a
/// throwaway `QuickStep` over a `tempfile::TempDir`.
pub mod test_support;

use crate::cursor::{iter_ops, lock_ops, node_walk, set_pos};
use crate::error::BtreeResult;
use crate::flags::IterFlags;
use crate::node::{BtreeNode, Entry};
use crate::pos::{BtreeId, Pos};
use crate::trans::Transaction;
use std::sync::Arc;

/// A transaction-scoped handle to one cursor slot, bundling a
/// `&mut Transaction` with the slot it should act on so callers don't have
/// to thread the node cache through every call themselves.
pub struct TxIter<'t> {
    trans: &'t mut Transaction,
    slot: usize,
}

impl<'t> TxIter<'t> {
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn pos(&self) -> Pos {
        self.trans.cursor(self.slot).pos
    }

    pub fn peek(&mut self) -> BtreeResult<Option<Entry>> {
        let cache = self.trans.cache_arc();
        iter_ops::peek(self.trans.slots_mut(), self.slot, cache.as_ref())
    }

    pub fn next(&mut self) -> BtreeResult<Option<Entry>> {
        let cache = self.trans.cache_arc();
        iter_ops::next(self.trans.slots_mut(), self.slot, cache.as_ref())
    }

    pub fn prev(&mut self) -> BtreeResult<Option<Entry>> {
        let cache = self.trans.cache_arc();
        iter_ops::prev(self.trans.slots_mut(), self.slot, cache.as_ref())
    }

    pub fn peek_slot(&mut self) -> BtreeResult<Option<Entry>> {
        let cache = self.trans.cache_arc();
        iter_ops::peek_slot(self.trans.slots_mut(), self.slot, cache.as_ref())
    }

    pub fn next_slot(&mut self) -> BtreeResult<Option<Entry>> {
        let cache = self.trans.cache_arc();
        iter_ops::next_slot(self.trans.slots_mut(), self.slot, cache.as_ref())
    }

    pub fn peek_node(&mut self, level: usize) -> BtreeResult<Option<Arc<BtreeNode>>> {
        let cache = self.trans.cache_arc();
        node_walk::peek_node(self.trans.slots_mut(), self.slot, cache.as_ref(), level)
    }

    pub fn next_node(&mut self, level: usize) -> BtreeResult<Option<Arc<BtreeNode>>> {
        let cache = self.trans.cache_arc();
        node_walk::next_node(self.trans.slots_mut(), self.slot, cache.as_ref(), level)
    }

    pub fn set_pos(&mut self, pos: Pos) {
        set_pos::set_pos(self.trans.cursor_mut(self.slot), pos);
    }

    /// Read -> intent at `level`, in place. `false` means another holder
    /// already has intent there; the caller should retraverse with a higher
    /// `locks_want` instead.
    pub fn upgrade(&mut self, level: usize) -> bool {
        lock_ops::upgrade(self.trans.cursor_mut(self.slot), level)
    }

    /// Drop every held level back from intent to read, keeping position.
    pub fn downgrade(&mut self) {
        lock_ops::downgrade(self.trans.cursor_mut(self.slot));
    }
}

impl Transaction {
    /// Borrow cursor `slot` as an ergonomic [`TxIter`] for the duration of
    /// the borrow.
    pub fn iter(&mut self, slot: usize) -> TxIter<'_> {
        TxIter { trans: self, slot }
    }

    /// Allocate a cursor and immediately borrow it as a [`TxIter`].
    pub fn new_iter(&mut self, btree_id: BtreeId, pos: Pos, flags: IterFlags) -> BtreeResult<TxIter<'_>> {
        let slot = self.get_iter(btree_id, pos, flags)?;
        Ok(TxIter { trans: self, slot })
    }
}
