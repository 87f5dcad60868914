//! Iteration mode and per-cursor flags, plus the uptodate ladder.

use bitflags::bitflags;

bitflags! {
    /// Per-cursor flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IterFlags: u16 {
        /// Fabricate holes; mutually exclusive with NODES in practice but
        /// not enforced here (mirrors the source, which trusts callers).
        const SLOTS           = 1 << 0;
        /// Walk node objects rather than keys.
        const NODES           = 1 << 1;
        /// Extent-aware comparisons; implied for extent trees in key modes.
        const IS_EXTENTS      = 1 << 2;
        /// Default lock-want is intent on the leaf rather than read.
        const INTENT          = 1 << 3;
        /// Prefetch sibling children on descent.
        const PREFETCH        = 1 << 4;
        /// Output-only: set after rolling off a leaf's end.
        const AT_END_OF_LEAF  = 1 << 5;
        /// Cursor is poisoned; further key-returning calls surface EIO.
        const ERROR           = 1 << 6;
    }
}

/// Which of the three iteration modes a cursor runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterMode {
    /// Skip deleted/whiteout keys.
    Keys,
    /// Fabricate a synthetic deleted key for holes.
    Slots,
    /// Walk node objects, not keys.
    Nodes,
}

impl IterFlags {
    pub fn mode(self) -> IterMode {
        if self.contains(IterFlags::NODES) {
            IterMode::Nodes
        } else if self.contains(IterFlags::SLOTS) {
            IterMode::Slots
        } else {
            IterMode::Keys
        }
    }
}

/// Monotone freshness ladder: mutators may only raise the level,
/// `traverse` lowers it toward `UpToDate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Uptodate {
    UpToDate = 0,
    NeedPeek = 1,
    NeedRelock = 2,
    NeedTraverse = 3,
}

impl Uptodate {
    /// Raise (never lower) the cursor's staleness, as mutators do via the
    /// fixup hooks.
    pub fn raise(&mut self, to: Uptodate) {
        if to > *self {
            *self = to;
        }
    }
}
