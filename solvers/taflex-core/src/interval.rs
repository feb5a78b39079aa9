//! Half-open time-interval sets and the keyed reservation table.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use crate::position::{Direction, Position};

/// Discrete timestamp on the time-expanded grid.
pub type Timestamp = u64;

/// Sentinel for "unbounded future". Half the representable range so sums with
/// finite path lengths cannot wrap.
pub const TIME_INFINITE: Timestamp = u64::MAX / 2;

/// A set of pairwise-disjoint half-open `[lo, hi)` intervals.
///
/// Inserts union-merge with overlapping and adjacent intervals, removals
/// subtract and may split a bordering interval. The set never stores an
/// empty or negative-width interval, and no two stored intervals touch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntervalSet {
    /// lower bound -> upper bound
    spans: BTreeMap<Timestamp, Timestamp>,
}

impl IntervalSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    /// Insert `[lo, hi)`, coalescing with anything it overlaps or touches.
    pub fn add(&mut self, lo: Timestamp, hi: Timestamp) {
        if lo >= hi {
            return;
        }
        let (mut lo, mut hi) = (lo, hi);
        while let Some((&l, &h)) = self.spans.range(..=hi).next_back() {
            if h < lo {
                break;
            }
            self.spans.remove(&l);
            lo = lo.min(l);
            hi = hi.max(h);
        }
        self.spans.insert(lo, hi);
    }

    /// Subtract `[lo, hi)`. Parts not present are ignored; a spanning
    /// interval is split.
    pub fn remove(&mut self, lo: Timestamp, hi: Timestamp) {
        if lo >= hi {
            return;
        }
        let mut touched = Vec::new();
        for (&l, &h) in self.spans.range(..hi).rev() {
            if h <= lo {
                break;
            }
            touched.push((l, h));
        }
        for (l, h) in touched {
            self.spans.remove(&l);
            if l < lo {
                self.spans.insert(l, lo);
            }
            if hi < h {
                self.spans.insert(hi, h);
            }
        }
    }

    /// True iff any stored interval overlaps `[lo, hi)`.
    pub fn intersects(&self, lo: Timestamp, hi: Timestamp) -> bool {
        if lo >= hi {
            return false;
        }
        match self.spans.range(..hi).next_back() {
            Some((_, &h)) => h > lo,
            None => false,
        }
    }

    /// Smallest `t >= start` such that `[t, t + dur)` is disjoint from the set.
    pub fn first_free_from(&self, start: Timestamp, dur: Timestamp) -> Timestamp {
        let mut t = start;
        for (l, h) in self.spans_from(start) {
            if t + dur <= l {
                return t;
            }
            t = h;
        }
        t
    }

    /// The maximal free `[a, b)` containing `[start, end)`, or `(0, 0)` if
    /// any stored interval overlaps the probe. An empty set yields
    /// `(0, u64::MAX)`.
    pub fn free_interval_covering(&self, start: Timestamp, end: Timestamp) -> (Timestamp, Timestamp) {
        if self.spans.is_empty() {
            return (0, u64::MAX);
        }
        if self.intersects(start, end) {
            return (0, 0);
        }
        let lo = match self.spans.range(..end).next_back() {
            Some((_, &h)) => h,
            None => 0,
        };
        let hi = match self.spans.range(end..).next() {
            Some((&l, _)) => l,
            None => u64::MAX,
        };
        (lo, hi)
    }

    /// First stored span whose lower bound is `>= t`.
    pub fn first_span_from(&self, t: Timestamp) -> Option<(Timestamp, Timestamp)> {
        self.spans.range(t..).next().map(|(&l, &h)| (l, h))
    }

    /// Upper bound of the last stored span.
    pub fn last_upper(&self) -> Option<Timestamp> {
        self.spans.last_key_value().map(|(_, &h)| h)
    }

    /// All spans `(lo, hi)` with `hi > t`, in ascending order.
    pub fn spans_from(&self, t: Timestamp) -> impl Iterator<Item = (Timestamp, Timestamp)> + '_ {
        let from = match self.spans.range(..=t).next_back() {
            Some((&l, &h)) if h > t => Bound::Included(l),
            Some((&l, _)) => Bound::Excluded(l),
            None => Bound::Unbounded,
        };
        self.spans
            .range((from, Bound::Unbounded))
            .map(|(&l, &h)| (l, h))
    }

    /// All spans in ascending order.
    pub fn spans(&self) -> impl Iterator<Item = (Timestamp, Timestamp)> + '_ {
        self.spans.iter().map(|(&l, &h)| (l, h))
    }
}

/// Key into the reservation table: a cell plus `Direction::None` for a node
/// reservation, or a canonical cardinal for an edge reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OccupiedKey {
    pub pos: Position,
    pub direction: Direction,
}

/// Keyed collection of interval sets; the single shared mutable resource of
/// the planner. Empty sets are dropped so that two tables with the same
/// reservations always compare equal through [`ReservationTable::snapshot`].
#[derive(Debug, Clone, Default)]
pub struct ReservationTable {
    entries: HashMap<OccupiedKey, IntervalSet>,
}

impl ReservationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: OccupiedKey, lo: Timestamp, hi: Timestamp) {
        if lo >= hi {
            return;
        }
        self.entries.entry(key).or_default().add(lo, hi);
    }

    pub fn remove(&mut self, key: OccupiedKey, lo: Timestamp, hi: Timestamp) {
        if let Some(set) = self.entries.get_mut(&key) {
            set.remove(lo, hi);
            if set.is_empty() {
                self.entries.remove(&key);
            }
        }
    }

    pub fn intersects(&self, key: OccupiedKey, lo: Timestamp, hi: Timestamp) -> bool {
        self.entries
            .get(&key)
            .is_some_and(|set| set.intersects(lo, hi))
    }

    pub fn first_free_from(&self, key: OccupiedKey, start: Timestamp, dur: Timestamp) -> Timestamp {
        match self.entries.get(&key) {
            Some(set) => set.first_free_from(start, dur),
            None => start,
        }
    }

    pub fn free_interval_covering(
        &self,
        key: OccupiedKey,
        start: Timestamp,
        end: Timestamp,
    ) -> (Timestamp, Timestamp) {
        match self.entries.get(&key) {
            Some(set) => set.free_interval_covering(start, end),
            None => (0, u64::MAX),
        }
    }

    pub fn get(&self, key: OccupiedKey) -> Option<&IntervalSet> {
        self.entries.get(&key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Canonical, sorted serialization of the whole table. Two tables holding
    /// the same reservations produce identical snapshots regardless of the
    /// order the operations arrived in.
    pub fn snapshot(&self) -> Vec<(OccupiedKey, Vec<(Timestamp, Timestamp)>)> {
        let mut out: Vec<_> = self
            .entries
            .iter()
            .map(|(&k, set)| (k, set.spans().collect()))
            .collect();
        out.sort_by_key(|(k, _)| *k);
        out
    }
}
