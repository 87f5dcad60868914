//! Per-node three-mode lock.
//!
//! Read (shared), intent (at most one, compatible with readers), write
//! (exclusive, requires the caller already hold intent). The teacher crate
//! builds its node latch out of a bare `AtomicU64` version word with
//! spin-CAS upgrade (`btree.rs`'s `BPNode::vlock`) because its locking is
//! purely optimistic (OLC) and never blocks. This core's locking protocol
//! is not purely optimistic, write must block until readers drain, so the
//! state word here is guarded by a `Mutex` + `Condvar` in the same spirit
//! (a packed word plus CAS retry would work too, but blocking wakeups need
//! a place to park waiters).

use std::sync::{Condvar, Mutex};

/// The three lock modes a node can be held in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockMode {
    Read,
    Intent,
    Write,
}

struct LockState {
    /// Monotonically increasing; bottom bit is set while write-held
    /// (cleared again on write unlock, which also bumps the counter by 2),
    /// so a (begin, end) pair looks like seq+2 when nobody else wrote in
    /// between.
    seq: u64,
    /// Aggregate recursive read-holder count across all cursors that hold
    /// this node read-locked (possibly on different threads within the
    /// same ring, since peer-ring operations assume same-thread access but
    /// the node itself may be touched by other rings too).
    readers: u32,
    /// Whether intent is held, and by how many recursive holders.
    intent_count: u32,
    write: bool,
}

impl LockState {
    fn intent(&self) -> bool {
        self.intent_count > 0
    }
}

pub struct NodeLock {
    state: Mutex<LockState>,
    cond: Condvar,
}

impl Default for NodeLock {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeLock {
    pub fn new() -> NodeLock {
        NodeLock {
            state: Mutex::new(LockState {
                seq: 0,
                readers: 0,
                intent_count: 0,
                write: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Current sequence number, rounded down to even while unheld.
    pub fn seq(&self) -> u64 {
        self.state.lock().unwrap().seq
    }

    /// Non-blocking acquisition attempt.
    pub fn try_lock(&self, mode: LockMode) -> bool {
        let mut st = self.state.lock().unwrap();
        match mode {
            LockMode::Read => {
                if st.write {
                    false
                } else {
                    st.readers += 1;
                    true
                }
            }
            LockMode::Intent => {
                if st.write || st.intent() {
                    false
                } else {
                    st.intent_count = 1;
                    true
                }
            }
            LockMode::Write => {
                // Fresh (non-upgrade) exclusive acquisition: only valid
                // when nobody holds anything at all.
                if st.write || st.intent() || st.readers > 0 {
                    false
                } else {
                    st.write = true;
                    true
                }
            }
        }
    }

    /// Blocking acquisition. `Write` requires the caller to already hold
    /// intent (use [`NodeLock::lock_write`] directly for that path); this
    /// generic entry point is for read/intent only and will deadlock if
    /// misused for write, matching the source's assumption that callers
    /// follow the documented protocol.
    pub fn lock(&self, mode: LockMode) {
        debug_assert!(mode != LockMode::Write, "use lock_write for the write path");
        let mut st = self.state.lock().unwrap();
        match mode {
            LockMode::Read => {
                while st.write {
                    st = self.cond.wait(st).unwrap();
                }
                st.readers += 1;
            }
            LockMode::Intent => {
                while st.write || st.intent() {
                    st = self.cond.wait(st).unwrap();
                }
                st.intent_count = 1;
            }
            LockMode::Write => unreachable!(),
        }
    }

    /// Write acquisition: caller must already hold intent. Blocks until
    /// `readers == 0`, temporarily excluding `exempt_readers` of the
    /// caller's own read holds from that wait.
    pub fn lock_write(&self, exempt_readers: u32) {
        let mut st = self.state.lock().unwrap();
        debug_assert!(st.intent(), "write lock requires intent held first");
        debug_assert!(!st.write);
        st.readers = st.readers.saturating_sub(exempt_readers);
        while st.readers > 0 {
            st = self.cond.wait(st).unwrap();
        }
        st.readers += exempt_readers;
        st.write = true;
        st.seq = st.seq.wrapping_add(1);
    }

    /// Optimistic relock: succeeds iff the lock is unheld (or compatible)
    /// *and* the sequence still matches `seq`.
    pub fn relock(&self, mode: LockMode, seq: u64) -> bool {
        let mut st = self.state.lock().unwrap();
        if st.seq != seq {
            return false;
        }
        match mode {
            LockMode::Read => {
                if st.write {
                    false
                } else {
                    st.readers += 1;
                    true
                }
            }
            LockMode::Intent => {
                if st.write || st.intent() {
                    false
                } else {
                    st.intent_count = 1;
                    true
                }
            }
            LockMode::Write => false,
        }
    }

    /// The caller already holds `mode` (or stronger) via a peer; bump the
    /// recursive-holder count without blocking.
    pub fn increment(&self, mode: LockMode) {
        let mut st = self.state.lock().unwrap();
        match mode {
            LockMode::Read => st.readers += 1,
            LockMode::Intent => st.intent_count += 1,
            LockMode::Write => debug_assert!(st.write, "write is never recursively held"),
        }
    }

    /// Read -> intent, without releasing, if no other intent holder.
    pub fn try_upgrade(&self) -> bool {
        let mut st = self.state.lock().unwrap();
        if st.intent() || st.readers == 0 {
            return false;
        }
        st.readers -= 1;
        st.intent_count = 1;
        true
    }

    /// Intent -> read. Caller must be the sole intent holder.
    pub fn downgrade(&self) {
        let mut st = self.state.lock().unwrap();
        debug_assert!(st.intent_count <= 1, "downgrade expects a sole intent holder");
        st.intent_count = 0;
        st.readers += 1;
        drop(st);
        self.cond.notify_all();
    }

    pub fn unlock(&self, mode: LockMode) {
        let mut st = self.state.lock().unwrap();
        match mode {
            LockMode::Read => {
                debug_assert!(st.readers > 0);
                st.readers -= 1;
            }
            LockMode::Intent => {
                debug_assert!(st.intent_count > 0);
                st.intent_count -= 1;
            }
            LockMode::Write => {
                debug_assert!(st.write);
                st.write = false;
                st.seq = st.seq.wrapping_add(1);
            }
        }
        drop(st);
        self.cond.notify_all();
    }

    #[cfg(test)]
    pub(crate) fn readers(&self) -> u32 {
        self.state.lock().unwrap().readers
    }
}
