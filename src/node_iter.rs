//! In-node position iterator.
//!
//! The source tracks a node's read cursor as a small heap of
//! `(bset, offset, end)` triples into one shared packed byte buffer, because
//! a node's bsets there share physical storage and "end" can shift when an
//! earlier bset is edited. This crate gives every bset its own `Vec<Entry>`
//! (node.rs), so the same read-cursor concept collapses to one index per
//! bset (0..=len); `Vec::len()` already tracks "end" for us. [`NodeIter`]
//! keeps that simplified form while preserving the merge-order and fixup
//! behavior the cursor and [`crate::fixup`] depend on.

use crate::node::{Bset, Entry};
use crate::pos::Pos;

/// Per-bset read position into a node's sorted runs.
#[derive(Debug, Clone, Default)]
pub struct NodeIter {
    /// `positions[i]` is the index of the next unread entry in `bsets[i]`;
    /// `positions[i] == bsets[i].entries.len()` means that bset is
    /// exhausted in the forward direction.
    positions: Vec<usize>,
}

impl NodeIter {
    pub fn empty() -> NodeIter {
        NodeIter { positions: Vec::new() }
    }

    /// Position at the first entry of each bset with `key.p >= pos`.
    pub fn seek(bsets: &[Bset], pos: Pos) -> NodeIter {
        let positions = bsets
            .iter()
            .map(|bs| bs.entries.partition_point(|e| e.key.p < pos))
            .collect();
        NodeIter { positions }
    }

    fn candidate<'a>(&self, bsets: &'a [Bset], bi: usize) -> Option<&'a Entry> {
        let k = *self.positions.get(bi)?;
        bsets.get(bi)?.entries.get(k)
    }

    /// Merged-order current entry across all bsets, including whiteouts.
    /// Ties break toward the lowest bset index, matching the source's
    /// convention that later bsets (more recently written) shadow earlier
    /// ones at equal keys.
    pub fn peek_all(&self, bsets: &[Bset]) -> Option<(usize, Entry)> {
        let mut best: Option<(usize, &Entry)> = None;
        for bi in 0..bsets.len() {
            if let Some(e) = self.candidate(bsets, bi) {
                best = match best {
                    None => Some((bi, e)),
                    Some((_, be)) if e.key.p < be.key.p => Some((bi, e)),
                    other => other,
                };
            }
        }
        best.map(|(bi, e)| (bi, e.clone()))
    }

    /// Advance past the current merged-order entry.
    pub fn advance(&mut self, bsets: &[Bset]) {
        if let Some((bi, _)) = self.peek_all(bsets) {
            self.positions[bi] += 1;
        }
    }

    /// Forward scan skipping whiteouts (KEYS/SLOTS mode live-key lookup).
    pub fn advance_to_live(&mut self, bsets: &[Bset]) -> Option<Entry> {
        loop {
            let (bi, e) = self.peek_all(bsets)?;
            if !e.key.is_whiteout() {
                return Some(e);
            }
            self.positions[bi] += 1;
        }
    }

    /// Step to and return the merged-order predecessor of the current
    /// position, including whiteouts. Used by `prev`/`prev_all`.
    pub fn prev_all(&mut self, bsets: &[Bset]) -> Option<Entry> {
        let mut best: Option<(usize, usize)> = None;
        for bi in 0..bsets.len() {
            let k = *self.positions.get(bi)?;
            if k == 0 {
                continue;
            }
            let idx = k - 1;
            let e = &bsets[bi].entries[idx];
            best = match best {
                None => Some((bi, idx)),
                Some((bbi, bidx)) => {
                    let be = &bsets[bbi].entries[bidx];
                    if e.key.p > be.key.p {
                        Some((bi, idx))
                    } else {
                        Some((bbi, bidx))
                    }
                }
            };
        }
        let (bi, idx) = best?;
        self.positions[bi] = idx;
        Some(bsets[bi].entries[idx].clone())
    }

    /// Rewind any bset's position that has stepped past `where_pos` back to
    /// the first entry `> where_pos`, pulling skipped-over whiteouts back
    /// into view. Interior nodes need this after an insert whose key
    /// doesn't exactly match what the iterator had already walked past.
    pub fn rewind_past(&mut self, bsets: &[Bset], where_pos: Pos, edited_bset: usize) {
        for bi in 0..bsets.len() {
            if bi == edited_bset {
                continue;
            }
            let Some(bs) = bsets.get(bi) else { continue };
            let floor = bs.entries.partition_point(|e| e.key.p <= where_pos);
            if self.positions[bi] > floor {
                self.positions[bi] = floor;
            }
        }
    }

    /// Adjust this bset's position for an in-place edit that replaced
    /// `clobber` entries starting at `where_idx` with `new_count` entries.
    /// `landed_on_new` controls whether a position that
    /// was inside the clobbered range lands before or after the
    /// replacement (insert/overwrite land after; whiteout-drop lands at
    /// the hole left behind).
    pub fn fixup(&mut self, bi: usize, where_idx: usize, clobber: usize, new_count: usize, landed_on_new: bool) {
        let Some(k) = self.positions.get(bi).copied() else { return };
        let shift = new_count as isize - clobber as isize;
        if k < where_idx {
            // unaffected
        } else if k < where_idx + clobber {
            self.positions[bi] = if landed_on_new { where_idx + new_count } else { where_idx };
        } else {
            self.positions[bi] = (k as isize + shift).max(0) as usize;
        }
    }

    pub fn ensure_len(&mut self, n: usize) {
        if self.positions.len() < n {
            self.positions.resize(n, 0);
        }
    }

    #[cfg(test)]
    pub(crate) fn position(&self, bi: usize) -> usize {
        self.positions[bi]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KEY_TYPE_DELETED;

    fn live(off: u64) -> Entry {
        Entry::leaf(Key::point(Pos::new(0, off), 1), vec![off as u8])
    }

    fn dead(off: u64) -> Entry {
        Entry::leaf(Key::point(Pos::new(0, off), KEY_TYPE_DELETED), vec![])
    }

    #[test]
    fn seek_merges_across_bsets_in_key_order() {
        let bsets = vec![
            Bset { entries: vec![live(1), live(3), live(5)] },
            Bset { entries: vec![live(2), live(4)] },
        ];
        let mut it = NodeIter::seek(&bsets, Pos::new(0, 0));
        let mut seen = Vec::new();
        while let Some((_, e)) = it.peek_all(&bsets) {
            seen.push(e.key.p.offset);
            it.advance(&bsets);
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn advance_to_live_skips_whiteouts() {
        let bsets = vec![Bset { entries: vec![dead(1), live(2), dead(3), live(4)] }];
        let mut it = NodeIter::seek(&bsets, Pos::new(0, 0));
        let e1 = it.advance_to_live(&bsets).unwrap();
        assert_eq!(e1.key.p.offset, 2);
        it.advance(&bsets);
        let e2 = it.advance_to_live(&bsets).unwrap();
        assert_eq!(e2.key.p.offset, 4);
    }

    #[test]
    fn prev_all_walks_backward_in_merged_order() {
        let bsets = vec![Bset { entries: vec![live(1), live(2), live(3)] }];
        let mut it = NodeIter::seek(&bsets, Pos::new(0, u64::MAX));
        let e = it.prev_all(&bsets).unwrap();
        assert_eq!(e.key.p.offset, 3);
        let e = it.prev_all(&bsets).unwrap();
        assert_eq!(e.key.p.offset, 2);
    }

    #[test]
    fn rewind_past_pulls_back_skipped_whiteout() {
        let bsets = vec![Bset { entries: vec![dead(1), live(5)] }];
        let mut it = NodeIter::seek(&bsets, Pos::new(0, 2));
        assert_eq!(it.position(0), 1);
        it.rewind_past(&bsets, Pos::new(0, 0), usize::MAX);
        assert_eq!(it.position(0), 1);
        it.rewind_past(&bsets, Pos::new(0, 1), usize::MAX);
        assert_eq!(it.position(0), 1);
    }

    #[test]
    fn fixup_shifts_positions_after_insertion_point() {
        let bsets = vec![Bset { entries: vec![live(1), live(2), live(3)] }];
        let mut it = NodeIter::seek(&bsets, Pos::new(0, 0));
        it.positions[0] = 2;
        it.fixup(0, 1, 0, 1, true);
        assert_eq!(it.position(0), 3);
    }
}
