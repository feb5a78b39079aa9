//! Tests for the interval set and the keyed reservation table.

use pretty_assertions::assert_eq;
use taflex_core::{Direction, IntervalSet, OccupiedKey, Position, ReservationTable};

// ─────────────────────────────────────────────────────────────────────────────
// IntervalSet basics
// ─────────────────────────────────────────────────────────────────────────────

fn spans(set: &IntervalSet) -> Vec<(u64, u64)> {
    set.spans().collect()
}

#[test]
fn add_disjoint_keeps_both() {
    let mut set = IntervalSet::new();
    set.add(0, 2);
    set.add(5, 7);
    assert_eq!(spans(&set), vec![(0, 2), (5, 7)]);
}

#[test]
fn add_overlapping_coalesces() {
    let mut set = IntervalSet::new();
    set.add(0, 5);
    set.add(3, 8);
    assert_eq!(spans(&set), vec![(0, 8)]);
}

#[test]
fn add_adjacent_coalesces() {
    let mut set = IntervalSet::new();
    set.add(0, 3);
    set.add(3, 6);
    assert_eq!(spans(&set), vec![(0, 6)]);
}

#[test]
fn add_bridging_swallows_everything() {
    let mut set = IntervalSet::new();
    set.add(1, 2);
    set.add(4, 5);
    set.add(8, 9);
    set.add(2, 8);
    assert_eq!(spans(&set), vec![(1, 9)]);
}

#[test]
fn add_empty_interval_is_noop() {
    let mut set = IntervalSet::new();
    set.add(4, 4);
    set.add(6, 5);
    assert!(set.is_empty());
}

#[test]
fn remove_splits_spanning_interval() {
    let mut set = IntervalSet::new();
    set.add(0, 10);
    set.remove(3, 6);
    assert_eq!(spans(&set), vec![(0, 3), (6, 10)]);
}

#[test]
fn remove_tolerates_partial_overlap() {
    let mut set = IntervalSet::new();
    set.add(2, 6);
    set.remove(0, 4); // only [2, 4) is present
    assert_eq!(spans(&set), vec![(4, 6)]);
    set.remove(5, 100);
    assert_eq!(spans(&set), vec![(4, 5)]);
}

#[test]
fn remove_disjoint_is_noop() {
    let mut set = IntervalSet::new();
    set.add(2, 4);
    set.remove(4, 9);
    set.remove(0, 2);
    assert_eq!(spans(&set), vec![(2, 4)]);
}

#[test]
fn round_trip_over_permutations() {
    // every matched add/remove sequence must drain back to the empty set
    let ops = [(0u64, 5u64), (5, 10), (3, 7), (20, 21)];
    let orders: [[usize; 4]; 6] = [
        [0, 1, 2, 3],
        [3, 2, 1, 0],
        [2, 0, 3, 1],
        [1, 3, 0, 2],
        [0, 2, 1, 3],
        [3, 0, 2, 1],
    ];
    // the overlapping adds coalesce, so subtract the union pieces once each
    let mut reference = IntervalSet::new();
    for &(lo, hi) in &ops {
        reference.add(lo, hi);
    }
    let union: Vec<_> = reference.spans().collect();
    for add_order in &orders {
        let mut set = IntervalSet::new();
        for &i in add_order {
            set.add(ops[i].0, ops[i].1);
        }
        for &(lo, hi) in &union {
            set.remove(lo, hi);
        }
        assert!(set.is_empty(), "order {add_order:?} left {:?}", spans(&set));
    }
}

#[test]
fn exact_add_remove_pairs_round_trip() {
    let pairs = [(0u64, 3u64), (10, 12), (5, 6)];
    let orders: [[usize; 3]; 6] = [
        [0, 1, 2],
        [0, 2, 1],
        [1, 0, 2],
        [1, 2, 0],
        [2, 0, 1],
        [2, 1, 0],
    ];
    for add_order in &orders {
        for remove_order in &orders {
            let mut set = IntervalSet::new();
            for &i in add_order {
                set.add(pairs[i].0, pairs[i].1);
            }
            for &i in remove_order {
                set.remove(pairs[i].0, pairs[i].1);
            }
            assert!(set.is_empty());
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Queries
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn intersects_respects_half_open_bounds() {
    let mut set = IntervalSet::new();
    set.add(3, 6);
    assert!(set.intersects(5, 7));
    assert!(set.intersects(0, 4));
    assert!(set.intersects(3, 6));
    assert!(!set.intersects(0, 3));
    assert!(!set.intersects(6, 9));
    assert!(!set.intersects(4, 4));
}

#[test]
fn first_free_from_skips_busy_spans() {
    let mut set = IntervalSet::new();
    set.add(2, 4);
    set.add(6, 8);
    assert_eq!(set.first_free_from(0, 2), 0);
    assert_eq!(set.first_free_from(0, 3), 8); // the [4,6) gap is too narrow
    assert_eq!(set.first_free_from(3, 1), 4);
    assert_eq!(set.first_free_from(3, 2), 4);
    assert_eq!(set.first_free_from(7, 1), 8);
    assert_eq!(set.first_free_from(100, 5), 100);
}

#[test]
fn free_interval_covering_reports_gap_bounds() {
    let mut set = IntervalSet::new();
    set.add(2, 4);
    set.add(8, 10);
    assert_eq!(set.free_interval_covering(5, 6), (4, 8));
    assert_eq!(set.free_interval_covering(0, 1), (0, 2));
    assert_eq!(set.free_interval_covering(11, 12), (10, u64::MAX));
    // probe overlapping an occupied span
    assert_eq!(set.free_interval_covering(3, 5), (0, 0));
    assert_eq!(set.free_interval_covering(9, 10), (0, 0));
}

#[test]
fn free_interval_covering_on_empty_set() {
    let set = IntervalSet::new();
    assert_eq!(set.free_interval_covering(7, 8), (0, u64::MAX));
}

#[test]
fn span_lookups() {
    let mut set = IntervalSet::new();
    set.add(3, 5);
    set.add(9, 11);
    assert_eq!(set.first_span_from(0), Some((3, 5)));
    assert_eq!(set.first_span_from(4), Some((9, 11)));
    assert_eq!(set.first_span_from(9), Some((9, 11)));
    assert_eq!(set.first_span_from(10), None);
    assert_eq!(set.last_upper(), Some(11));
    assert_eq!(IntervalSet::new().last_upper(), None);
}

// ─────────────────────────────────────────────────────────────────────────────
// ReservationTable
// ─────────────────────────────────────────────────────────────────────────────

fn node_key(row: usize, col: usize) -> OccupiedKey {
    OccupiedKey {
        pos: Position::new(row, col),
        direction: Direction::None,
    }
}

#[test]
fn table_drops_empty_entries() {
    let mut table = ReservationTable::new();
    table.add(node_key(1, 1), 0, 5);
    assert_eq!(table.len(), 1);
    table.remove(node_key(1, 1), 0, 5);
    assert!(table.is_empty());
    assert_eq!(table.snapshot(), vec![]);
}

#[test]
fn table_queries_on_missing_key() {
    let table = ReservationTable::new();
    assert!(!table.intersects(node_key(0, 0), 0, 10));
    assert_eq!(table.first_free_from(node_key(0, 0), 7, 3), 7);
    assert_eq!(table.free_interval_covering(node_key(0, 0), 1, 2), (0, u64::MAX));
}

#[test]
fn snapshot_is_canonical() {
    let mut a = ReservationTable::new();
    a.add(node_key(0, 1), 0, 2);
    a.add(node_key(0, 0), 4, 6);
    a.add(node_key(0, 0), 2, 4);

    let mut b = ReservationTable::new();
    b.add(node_key(0, 0), 2, 6);
    b.add(node_key(0, 1), 0, 2);

    assert_eq!(a.snapshot(), b.snapshot());
}
