//! Interval-driven time-expanded A* with dominance pruning.

use std::collections::BTreeSet;

use taflex_core::{
    Direction, GridMap, IntervalSet, PathNode, Position, Scenario, Timestamp, TIME_INFINITE,
};
use tracing::trace;

/// Stable handle into the per-search virtual-node arena.
pub type NodeHandle = u32;

/// Expansion variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Algorithm {
    /// Waiting-aware A*: neighbours are expanded one timestep ahead and an
    /// explicit wait move is emitted whenever a future conflict could require
    /// it.
    #[default]
    WaitingAware,
    /// Safe-interval search: departures are committed to a chosen neighbour
    /// (`child`) at the earliest feasible time, with delayed departures
    /// explored lazily.
    SafeInterval,
}

/// One (position, time, checkpoint) state of the search.
#[derive(Debug, Clone)]
pub struct VirtualNode {
    pub pos: Position,
    /// Time at which the agent begins its move out of `pos`.
    pub leave_time: Timestamp,
    /// `leave_time` plus the admissible remaining estimate.
    pub estimate_time: Timestamp,
    pub extra_cost: u64,
    pub parent: Option<NodeHandle>,
    /// Pre-committed move target; meaningful only when `has_child` is set.
    pub child: Position,
    /// Index of the next mandatory waypoint.
    pub checkpoint: usize,
    pub has_child: bool,
    pub is_open: bool,
}

/// Per-cell search state: static edge availability plus the dominance index
/// over every virtual node created at this cell, ordered by
/// `(leave_time, extra_cost, handle)`.
#[derive(Debug, Clone, Default)]
struct Cell {
    edges: [bool; 4],
    vnodes: BTreeSet<(Timestamp, u64, NodeHandle)>,
}

/// Single-agent path search over the shared reservation table. The solver
/// holds no references into the map; every query goes through the `GridMap`
/// passed to each call, so constraint inserts and removals between searches
/// are picked up automatically.
#[derive(Debug)]
pub struct Solver {
    algorithm: Algorithm,
    /// Pop-time tolerance: among open nodes whose estimates differ by less
    /// than this, the one crossing fewer extra-cost cells wins.
    extra_cost_id: u64,
    deadline: Timestamp,
    scenario: Option<Scenario>,
    arena: Vec<VirtualNode>,
    open: BTreeSet<(Timestamp, u64, NodeHandle)>,
    cells: Vec<Cell>,
    height: usize,
    width: usize,
    success: Option<NodeHandle>,
}

impl Solver {
    pub fn new(algorithm: Algorithm, extra_cost_id: u64) -> Self {
        Self {
            algorithm,
            extra_cost_id,
            deadline: TIME_INFINITE,
            scenario: None,
            arena: Vec::new(),
            open: BTreeSet::new(),
            cells: Vec::new(),
            height: 0,
            width: 0,
            success: None,
        }
    }

    // ── Occupancy helpers ────────────────────────────────────────────────────

    fn occupied_in(set: Option<&IntervalSet>, lo: Timestamp, hi: Timestamp) -> bool {
        set.is_some_and(|s| s.intersects(lo, hi))
    }

    fn free_covering(
        set: Option<&IntervalSet>,
        start: Timestamp,
        end: Timestamp,
    ) -> (Timestamp, Timestamp) {
        match set {
            Some(s) => s.free_interval_covering(start, end),
            None => (0, u64::MAX),
        }
    }

    fn first_free(set: Option<&IntervalSet>, start: Timestamp, dur: Timestamp) -> Timestamp {
        match set {
            Some(s) => s.first_free_from(start, dur),
            None => start,
        }
    }

    /// Smallest `t >= start` such that the edge is free during `[t, t + dur)`
    /// and the node behind it is free at `t + dur`.
    fn first_free_with_arrival(
        edge: Option<&IntervalSet>,
        node: Option<&IntervalSet>,
        start: Timestamp,
        dur: Timestamp,
    ) -> Timestamp {
        let Some(edge) = edge.filter(|s| !s.is_empty()) else {
            return Self::first_free(node, start + dur, 1) - dur;
        };
        let mut t = start;
        for (lo, hi) in edge.spans_from(start) {
            if t + dur <= lo && !Self::occupied_in(node, t + dur, t + dur + 1) {
                return t;
            }
            t = hi;
        }
        Self::first_free(node, t.max(start) + dur, 1) - dur
    }

    /// Thin reservation-table query used by the assignment layer.
    pub fn is_occupied(
        &self,
        map: &GridMap,
        pos: Position,
        direction: Direction,
        lo: Timestamp,
        hi: Timestamp,
    ) -> bool {
        let set = match direction {
            Direction::None => map.node_occupancy(pos),
            d => map.edge_occupancy(pos, d),
        };
        Self::occupied_in(set, lo, hi)
    }

    /// Among parking cells that are still claimable from `from` onward, the
    /// one closest to `pos` by graph distance (ties to the smaller position).
    pub fn nearest_parking_location(
        &self,
        map: &GridMap,
        pos: Position,
        from: Timestamp,
    ) -> Option<Position> {
        let mut best: Option<(Timestamp, Position)> = None;
        for p in map.parking_locations() {
            if Self::occupied_in(map.node_occupancy(p), from, TIME_INFINITE) {
                continue;
            }
            let d = map.graph_distance(pos, p);
            if d >= TIME_INFINITE {
                continue;
            }
            if best.map_or(true, |(bd, _)| d < bd) {
                best = Some((d, p));
            }
        }
        best.map(|(_, p)| p)
    }

    // ── Search lifecycle ─────────────────────────────────────────────────────

    /// Reset the search to start at the scenario's first waypoint at
    /// `start_time`, pruning every state whose estimate reaches `deadline`.
    /// A blocked start or end cell leaves the open list empty, so the search
    /// reports exhaustion on the first [`Solver::step`].
    pub fn init_scenario(
        &mut self,
        map: &GridMap,
        scenario: Scenario,
        start_time: Timestamp,
        deadline: Timestamp,
    ) {
        self.clear();
        self.deadline = deadline;

        if map.is_blocked(scenario.start()) || map.is_blocked(scenario.end()) {
            trace!(start = %scenario.start(), end = %scenario.end(), "endpoint blocked");
            self.scenario = Some(scenario);
            return;
        }

        self.rebuild_cells(map);
        let start = scenario.start();
        self.scenario = Some(scenario);
        let handle = self.create_node(map, start, start_time, None, 0, start, false);
        self.push_open(handle);
    }

    fn clear(&mut self) {
        self.arena.clear();
        self.open.clear();
        self.cells.clear();
        self.success = None;
    }

    fn rebuild_cells(&mut self, map: &GridMap) {
        self.height = map.height();
        self.width = map.width();
        self.cells = vec![Cell::default(); self.height * self.width];
        for row in 0..self.height {
            for col in 0..self.width {
                let pos = Position::new(row, col);
                let mut edges = [false; 4];
                for direction in Direction::CARDINALS {
                    edges[direction.index()] = map
                        .pos_by_direction(pos, direction)
                        .is_some_and(|n| map.is_passable(n));
                }
                self.cells[row * self.width + col].edges = edges;
            }
        }
    }

    fn cell_index(&self, pos: Position) -> usize {
        pos.row * self.width + pos.col
    }

    pub fn success(&self) -> bool {
        self.success.is_some()
    }

    pub fn node(&self, handle: NodeHandle) -> &VirtualNode {
        &self.arena[handle as usize]
    }

    /// Walk parent links from the recorded success node; returned start-first.
    pub fn construct_path(&self) -> Vec<PathNode> {
        match self.success {
            Some(handle) => self.construct_path_from(handle),
            None => Vec::new(),
        }
    }

    pub fn construct_path_from(&self, handle: NodeHandle) -> Vec<PathNode> {
        let mut nodes = Vec::new();
        let mut cursor = Some(handle);
        while let Some(h) = cursor {
            let n = &self.arena[h as usize];
            nodes.push(PathNode {
                pos: n.pos,
                leave_time: n.leave_time,
            });
            cursor = n.parent;
        }
        nodes.reverse();
        nodes
    }

    // ── Node bookkeeping ─────────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    fn create_node(
        &mut self,
        map: &GridMap,
        pos: Position,
        leave_time: Timestamp,
        parent: Option<NodeHandle>,
        checkpoint: usize,
        child: Position,
        has_child: bool,
    ) -> NodeHandle {
        let (target, remaining) = {
            let scenario = self.scenario.as_ref().expect("scenario not initialized");
            if checkpoint < scenario.size() {
                (scenario.end_at(checkpoint), scenario.remaining_distance(checkpoint))
            } else {
                (scenario.end(), 0)
            }
        };
        let estimate_time = leave_time + pos.manhattan(target) + remaining;

        let mut extra_cost = 0;
        if self.extra_cost_id > 0 {
            if map.extra_cost_time(pos) <= leave_time {
                extra_cost += 1;
            }
            if let Some(p) = parent {
                extra_cost += self.arena[p as usize].extra_cost;
            }
        }

        self.arena.push(VirtualNode {
            pos,
            leave_time,
            estimate_time,
            extra_cost,
            parent,
            child,
            checkpoint,
            has_child,
            is_open: true,
        });
        (self.arena.len() - 1) as NodeHandle
    }

    /// Admit a node to OPEN and the per-cell index unless its estimate
    /// already reaches the deadline.
    fn push_open(&mut self, handle: NodeHandle) {
        let (est, extra, leave, pos) = {
            let n = &self.arena[handle as usize];
            (n.estimate_time, n.extra_cost, n.leave_time, n.pos)
        };
        if est >= self.deadline {
            return;
        }
        self.open.insert((est, extra, handle));
        let idx = self.cell_index(pos);
        self.cells[idx].vnodes.insert((leave, extra, handle));
    }

    /// Pop the best open node. With a zero tolerance that is the smallest
    /// `(estimate, extra_cost)`; otherwise the candidates whose estimates sit
    /// within the tolerance of the minimum are re-ranked extra-cost first.
    fn pop_open(&mut self) -> Option<NodeHandle> {
        let &first = self.open.iter().next()?;
        let chosen = if self.extra_cost_id == 0 {
            first
        } else {
            let limit = first.0.saturating_add(self.extra_cost_id);
            let mut best = first;
            for &key in self.open.range(..(limit, 0, 0)) {
                if (key.1, key.0, key.2) < (best.1, best.0, best.2) {
                    best = key;
                }
            }
            best
        };
        self.open.remove(&chosen);
        Some(chosen.2)
    }

    // ── Expansion ────────────────────────────────────────────────────────────

    /// One A* expansion. Returns the popped node's handle, or `None` once the
    /// open list is exhausted. Drive in a loop until [`Solver::success`] or
    /// an external step cap.
    pub fn step(&mut self, map: &GridMap) -> Option<NodeHandle> {
        let handle = self.pop_open()?;
        self.arena[handle as usize].is_open = false;

        // advance through any waypoints reached at this cell; the final
        // waypoint completes the search unless a committed move is pending
        {
            let scenario = self.scenario.as_ref().expect("scenario not initialized");
            loop {
                let node = &mut self.arena[handle as usize];
                if node.pos != scenario.end_at(node.checkpoint) {
                    break;
                }
                if node.checkpoint == scenario.size() - 1 {
                    if !node.has_child {
                        self.success = Some(handle);
                        return Some(handle);
                    }
                    break;
                }
                node.checkpoint += 1;
            }
        }

        match self.algorithm {
            Algorithm::WaitingAware => self.expand_waiting_aware(map, handle),
            Algorithm::SafeInterval => self.expand_safe_interval(map, handle),
        }

        Some(handle)
    }

    fn expand_waiting_aware(&mut self, map: &GridMap, handle: NodeHandle) {
        let v = self.arena[handle as usize].clone();
        let parent_pos = v.parent.map(|p| self.arena[p as usize].pos);
        let edges = self.cells[self.cell_index(v.pos)].edges;

        let mut wait_flag = false;
        for direction in Direction::CARDINALS {
            if !edges[direction.index()] {
                continue;
            }
            let neighbor = map
                .pos_by_direction(v.pos, direction)
                .expect("available edge has a neighbor");

            // anything scheduled on the neighbour after our arrival, or on
            // the connecting edge, can make waiting here worthwhile
            if parent_pos != Some(neighbor) {
                if let Some(last) = map.node_occupancy(neighbor).and_then(|s| s.last_upper()) {
                    if v.leave_time + 1 < last {
                        wait_flag = true;
                    }
                }
            }
            if let Some(last) = map.edge_occupancy(v.pos, direction).and_then(|s| s.last_upper()) {
                if v.leave_time < last {
                    wait_flag = true;
                }
            }

            self.replace_node(map, handle, neighbor, direction, true);
        }

        if wait_flag && !Self::occupied_in(map.node_occupancy(v.pos), v.leave_time + 1, v.leave_time + 2)
        {
            let wait = self.create_node(
                map,
                v.pos,
                v.leave_time + 1,
                v.parent,
                v.checkpoint,
                v.pos,
                false,
            );
            self.push_open(wait);
        }
    }

    fn expand_safe_interval(&mut self, map: &GridMap, handle: NodeHandle) {
        let v = self.arena[handle as usize].clone();

        if !v.has_child {
            let edges = self.cells[self.cell_index(v.pos)].edges;
            let parent = v.parent.map(|p| {
                let n = &self.arena[p as usize];
                (n.pos, n.checkpoint)
            });
            for direction in Direction::CARDINALS {
                if !edges[direction.index()] {
                    continue;
                }
                let neighbor = map
                    .pos_by_direction(v.pos, direction)
                    .expect("available edge has a neighbor");
                if parent == Some((neighbor, v.checkpoint)) {
                    continue; // going straight back is never useful
                }

                let new_time = Self::first_free_with_arrival(
                    map.edge_occupancy(v.pos, direction),
                    map.node_occupancy(neighbor),
                    v.leave_time,
                    1,
                );
                if new_time >= TIME_INFINITE || !self.wait_window_free(map, &v, new_time) {
                    continue;
                }
                let node = self.create_node(
                    map,
                    v.pos,
                    new_time,
                    v.parent,
                    v.checkpoint,
                    neighbor,
                    true,
                );
                self.push_open(node);
            }
        } else {
            let direction = v.pos.direction_to(v.child);
            debug_assert_ne!(direction, Direction::None);
            if direction == Direction::None {
                return;
            }

            // a later departure may dodge the child's next busy window
            if let Some(next) = map
                .node_occupancy(v.child)
                .and_then(|s| s.first_span_from(v.leave_time + 2))
            {
                let new_time = Self::first_free_with_arrival(
                    map.edge_occupancy(v.pos, direction),
                    map.node_occupancy(v.child),
                    next.0,
                    1,
                );
                if new_time < TIME_INFINITE && self.wait_window_free(map, &v, new_time) {
                    let node = self.create_node(
                        map,
                        v.pos,
                        new_time,
                        v.parent,
                        v.checkpoint,
                        v.child,
                        true,
                    );
                    self.push_open(node);
                }
            }

            // commit the move itself; feasibility was checked when the child
            // was chosen
            self.replace_node(map, handle, v.child, direction, false);
        }
    }

    /// The agent keeps occupying `v.pos` until `until + 1` when it departs at
    /// `until`; the whole stay must be clear.
    fn wait_window_free(&self, map: &GridMap, v: &VirtualNode, until: Timestamp) -> bool {
        !Self::occupied_in(map.node_occupancy(v.pos), v.leave_time, until + 1)
    }

    /// Shared arrival routine: dominance check against existing nodes at the
    /// target cell, purge of nodes the newcomer supersedes, then insertion.
    fn replace_node(
        &mut self,
        map: &GridMap,
        parent: NodeHandle,
        target: Position,
        direction: Direction,
        need_examine: bool,
    ) {
        let v = self.arena[parent as usize].clone();
        let arrival = v.leave_time + 1;

        let (free_lo, free_hi) = Self::free_covering(map.node_occupancy(target), arrival, arrival + 1);
        if need_examine {
            if free_lo == free_hi {
                return;
            }
            if Self::occupied_in(map.edge_occupancy(v.pos, direction), v.leave_time, arrival) {
                return;
            }
        }

        let idx = self.cell_index(target);

        // dominated: an existing node reaches this cell within the same free
        // interval, no later, at the same or a further checkpoint
        for &(_, _, other) in self.cells[idx].vnodes.range((free_lo, 0, 0)..(arrival + 1, 0, 0)) {
            let n = &self.arena[other as usize];
            if !n.has_child && n.checkpoint >= v.checkpoint {
                return;
            }
        }

        // purge open nodes the new arrival strictly improves on
        if free_hi > arrival + 1 {
            let mut purged = Vec::new();
            for &(leave, extra, other) in
                self.cells[idx].vnodes.range((arrival + 1, 0, 0)..(free_hi, 0, 0))
            {
                let n = &self.arena[other as usize];
                if n.is_open && !n.has_child && n.checkpoint <= v.checkpoint {
                    purged.push((leave, extra, other, n.estimate_time));
                }
            }
            for (leave, extra, other, est) in purged {
                self.cells[idx].vnodes.remove(&(leave, extra, other));
                self.open.remove(&(est, extra, other));
            }
        }

        let node = self.create_node(map, target, arrival, Some(parent), v.checkpoint, target, false);
        self.push_open(node);
    }
}
