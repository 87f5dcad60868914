//! Upgrade / downgrade / relock-by-seq operations on an already-traversed
//! cursor.

use crate::node_lock::LockMode;

use super::Cursor;

/// Try to relock every currently-held level using its stored sequence
/// number. All-or-nothing: a failure at any
/// level releases whatever this call had just relocked.
pub fn relock_all(cursor: &mut Cursor) -> bool {
    let depth = cursor.depth as usize;
    let mut relocked = Vec::with_capacity(depth);
    for i in 0..depth {
        let lvl = cursor.level(i);
        let (node, mode, seq) = match (lvl.node.clone(), lvl.lock_mode, lvl.lock_seq) {
            (Some(n), Some(m), s) => (n, m, s),
            _ => {
                unwind(cursor, &relocked);
                return false;
            }
        };
        if node.lock.relock(mode, seq) {
            relocked.push(i);
        } else {
            unwind(cursor, &relocked);
            return false;
        }
    }
    true
}

fn unwind(cursor: &mut Cursor, relocked: &[usize]) {
    for &i in relocked {
        let lvl = cursor.level(i);
        if let (Some(node), Some(mode)) = (&lvl.node, lvl.lock_mode) {
            node.lock.unlock(mode);
        }
    }
    for &i in relocked {
        cursor.level_mut(i).lock_mode = None;
    }
}

/// Read -> intent at `level`, in place. Returns `false` if another holder
/// already has intent there; caller falls back to a full retraverse with a
/// higher `locks_want`.
pub fn upgrade(cursor: &mut Cursor, level: usize) -> bool {
    let lvl = cursor.level(level);
    let Some(node) = lvl.node.clone() else { return false };
    if lvl.lock_mode != Some(LockMode::Read) {
        return lvl.lock_mode == Some(LockMode::Intent);
    }
    if node.lock.try_upgrade() {
        cursor.level_mut(level).lock_mode = Some(LockMode::Intent);
        true
    } else {
        false
    }
}

/// Drop every level's hold back from intent to read, keeping position.
/// Callers that only needed intent transiently downgrade rather than pay
/// for a full retraverse.
pub fn downgrade(cursor: &mut Cursor) {
    let depth = cursor.depth as usize;
    for i in 0..depth {
        let lvl = cursor.level(i);
        if lvl.lock_mode == Some(LockMode::Intent) {
            if let Some(node) = lvl.node.clone() {
                node.lock.downgrade();
            }
            cursor.level_mut(i).lock_mode = Some(LockMode::Read);
        }
    }
    cursor.locks_want = 0;
}
