//! End-to-end cursor scenarios against a single in-memory leaf.

mod support;

use std::sync::Arc;
use std::thread;

use latchtree::flags::IterFlags;
use latchtree::pos::{BtreeId, Pos, POS_MAX, POS_MIN};

const PAYLOAD_TYPE: u8 = 1;

#[test]
fn sequential_insert_and_scan_keys() {
    let n: u64 = 1024;
    let (cache, root) = support::new_harness(BtreeId::Dirents);
    let mut trans = support::new_trans(&cache);

    for i in 0..n {
        support::put(&mut trans, &root, Pos::new(0, i), PAYLOAD_TYPE, b"v");
    }

    let mut iter = trans.new_iter(BtreeId::Dirents, Pos::new(0, 0), IterFlags::empty()).unwrap();
    let mut seen = Vec::new();
    while let Some(entry) = iter.peek().unwrap() {
        seen.push(entry.key.p.offset);
        iter.next().unwrap();
    }
    assert_eq!(seen, (0..n).collect::<Vec<_>>());

    let mut back = trans.new_iter(BtreeId::Dirents, Pos::new(0, n - 1), IterFlags::empty()).unwrap();
    let mut reversed = Vec::new();
    loop {
        match back.peek().unwrap() {
            Some(entry) => reversed.push(entry.key.p.offset),
            None => break,
        }
        if back.prev().unwrap().is_none() {
            break;
        }
    }
    assert_eq!(reversed, (0..n).rev().collect::<Vec<_>>());
}

#[test]
fn extents_forward_and_back() {
    let step: u64 = 8;
    let count: u64 = 128;
    let (cache, root) = support::new_harness(BtreeId::Extents);
    let mut trans = support::new_trans(&cache);

    for k in 0..count {
        let i = k * step;
        support::put_extent(&mut trans, &root, Pos::new(0, i + step), step, PAYLOAD_TYPE);
    }

    let mut iter = trans.new_iter(BtreeId::Extents, POS_MIN, IterFlags::empty()).unwrap();
    let mut forward = Vec::new();
    while let Some(entry) = iter.peek().unwrap() {
        let start = entry.key.start_pos(BtreeId::Extents);
        forward.push((start.offset, entry.key.p.offset));
        iter.next().unwrap();
    }
    let expected: Vec<(u64, u64)> = (0..count).map(|k| (k * step, k * step + step)).collect();
    assert_eq!(forward, expected);

    let mut back = trans.new_iter(BtreeId::Extents, Pos::new(0, count * step - 1), IterFlags::empty()).unwrap();
    let mut backward = Vec::new();
    loop {
        match back.peek().unwrap() {
            Some(entry) => {
                let start = entry.key.start_pos(BtreeId::Extents);
                backward.push((start.offset, entry.key.p.offset));
            }
            None => break,
        }
        if back.prev().unwrap().is_none() {
            break;
        }
    }
    let mut expected_rev = expected.clone();
    expected_rev.reverse();
    assert_eq!(backward, expected_rev);
}

#[test]
fn slots_mode_fabricates_holes_between_point_keys() {
    let n: u64 = 64;
    let (cache, root) = support::new_harness(BtreeId::Dirents);
    let mut trans = support::new_trans(&cache);

    for i in 0..n {
        support::put(&mut trans, &root, Pos::new(0, 2 * i), PAYLOAD_TYPE, b"v");
    }

    let mut iter = trans.new_iter(BtreeId::Dirents, Pos::new(0, 0), IterFlags::SLOTS).unwrap();
    for j in 0..(2 * n) {
        let entry = iter.peek_slot().unwrap().expect("slots mode never returns None short of POS_MAX");
        assert_eq!(entry.key.is_deleted(), j % 2 == 1, "offset {j} live/hole mismatch");
        iter.set_pos(Pos::new(0, j + 1));
    }
}

#[test]
fn delete_is_idempotent_and_cursor_survives() {
    let (cache, root) = support::new_harness(BtreeId::Dirents);
    let mut trans = support::new_trans(&cache);
    let p = Pos::new(0, 7);

    support::put(&mut trans, &root, p, PAYLOAD_TYPE, b"v");
    support::delete(&mut trans, &root, p);
    support::delete(&mut trans, &root, p);

    let mut iter = trans.new_iter(BtreeId::Dirents, p, IterFlags::empty()).unwrap();
    assert_eq!(iter.peek().unwrap(), None);
}

#[test]
fn insert_then_delete_then_peek_is_none() {
    let (cache, root) = support::new_harness(BtreeId::Dirents);
    let mut trans = support::new_trans(&cache);
    let p = Pos::new(3, 40);

    support::put(&mut trans, &root, p, PAYLOAD_TYPE, b"payload");
    support::delete(&mut trans, &root, p);

    let mut iter = trans.new_iter(BtreeId::Dirents, p, IterFlags::empty()).unwrap();
    assert_eq!(iter.peek().unwrap(), None);
}

/// Each thread inserts its own disjoint key range in shuffled order, so
/// writers genuinely contend on the shared root's lock without the final
/// count depending on which thread wins a race.
#[test]
fn concurrent_inserts_make_progress_without_lock_violation() {
    let (cache, root) = support::new_harness(BtreeId::Dirents);
    let threads = 4;
    let per_thread = 500u64;

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let cache = Arc::clone(&cache);
            let root = Arc::clone(&root);
            thread::spawn(move || {
                let mut trans = support::new_trans(&cache);
                let rng = fastrand::Rng::with_seed(t as u64);
                let mut offsets: Vec<u64> = (0..per_thread).collect();
                rng.shuffle(&mut offsets);
                for i in offsets {
                    let pos = Pos::new(t as u64, i);
                    support::put(&mut trans, &root, pos, PAYLOAD_TYPE, b"v");
                }
            })
        })
        .collect();

    for h in handles {
        h.join().expect("writer thread panicked");
    }

    let mut trans = support::new_trans(&cache);
    let mut iter = trans.new_iter(BtreeId::Dirents, POS_MIN, IterFlags::empty()).unwrap();
    let mut count = 0u64;
    while iter.peek().unwrap().is_some() {
        count += 1;
        iter.next().unwrap();
    }
    assert_eq!(count, threads as u64 * per_thread);
}

#[test]
fn at_end_of_leaf_flag_set_when_scan_runs_off_the_end() {
    let (cache, root) = support::new_harness(BtreeId::Dirents);
    let mut trans = support::new_trans(&cache);
    support::put(&mut trans, &root, Pos::new(0, 0), PAYLOAD_TYPE, b"v");

    let mut iter = trans.new_iter(BtreeId::Dirents, POS_MAX, IterFlags::empty()).unwrap();
    assert_eq!(iter.peek().unwrap(), None);
    let slot = iter.slot();
    drop(iter);
    assert!(trans.cursor(slot).flags.contains(IterFlags::AT_END_OF_LEAF));
}
