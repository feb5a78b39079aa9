//! Warehouse grid map: static obstacles plus the shared reservation state.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};

use thiserror::Error;

use crate::interval::{IntervalSet, OccupiedKey, ReservationTable, Timestamp, TIME_INFINITE};
use crate::position::{Direction, Position};

/// A single cell in a grid map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tile {
    /// Agents can traverse this cell.
    Passable,
    /// Obstacle; agents cannot enter.
    Blocked,
}

/// Errors from parsing a map file.
#[derive(Debug, Error)]
pub enum MapError {
    #[error("missing header field: {0}")]
    MissingHeader(&'static str),

    #[error("invalid header value for {field}: {value}")]
    InvalidHeader { field: &'static str, value: String },

    #[error("dimension mismatch: expected {expected} rows, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("row {row} width mismatch: expected {expected}, got {got}")]
    RowWidthMismatch {
        row: usize,
        expected: usize,
        got: usize,
    },
}

/// Errors from parsing a constraints file.
#[derive(Debug, Error)]
pub enum ConstraintError {
    #[error("malformed constraint on line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("constraint on line {line} outside the map")]
    OutOfBounds { line: usize },
}

/// Unreachable-cell sentinel inside the BFS distance fields.
const UNREACHED: u32 = u32::MAX;

/// The warehouse grid: static tiles plus every piece of shared planning
/// state — the reservation table, parking cells, extra-cost cells, waiting
/// stacks, and the counted infinite-waiting markers that protect parked
/// agents.
#[derive(Debug, Clone)]
pub struct GridMap {
    height: usize,
    width: usize,
    /// Row-major; index = row * width + col.
    tiles: Vec<Tile>,
    occupied: ReservationTable,
    parking: BTreeSet<Position>,
    extra_cost: HashMap<Position, Timestamp>,
    waiting: HashMap<Position, Vec<(Timestamp, usize)>>,
    infinite_waiting: HashMap<Position, usize>,
    /// BFS distance fields, memoized per source cell.
    distance_cache: RefCell<HashMap<Position, Vec<u32>>>,
}

impl GridMap {
    /// Parse a map file.
    ///
    /// Expected format:
    /// ```text
    /// type octile
    /// height N
    /// width M
    /// map
    /// <N lines of M characters>
    /// ```
    pub fn parse(input: &str) -> Result<Self, MapError> {
        let mut lines = input.lines();

        let mut map_type: Option<&str> = None;
        let mut height: Option<usize> = None;
        let mut width: Option<usize> = None;

        for line in lines.by_ref() {
            let line = line.trim();
            if line.eq_ignore_ascii_case("map") {
                break;
            }
            if let Some(rest) = line.strip_prefix("type ") {
                map_type = Some(rest.trim());
            } else if let Some(rest) = line.strip_prefix("height ") {
                height = Some(rest.trim().parse().map_err(|_| MapError::InvalidHeader {
                    field: "height",
                    value: rest.to_string(),
                })?);
            } else if let Some(rest) = line.strip_prefix("width ") {
                width = Some(rest.trim().parse().map_err(|_| MapError::InvalidHeader {
                    field: "width",
                    value: rest.to_string(),
                })?);
            }
        }

        let _map_type = map_type.ok_or(MapError::MissingHeader("type"))?;
        let height = height.ok_or(MapError::MissingHeader("height"))?;
        let width = width.ok_or(MapError::MissingHeader("width"))?;

        let mut tiles = Vec::with_capacity(width * height);
        let mut row_count = 0usize;

        for line in lines {
            if row_count >= height {
                break; // ignore trailing lines
            }
            let chars: Vec<char> = line.chars().collect();
            if chars.len() != width {
                return Err(MapError::RowWidthMismatch {
                    row: row_count,
                    expected: width,
                    got: chars.len(),
                });
            }
            for ch in chars {
                tiles.push(Self::char_to_tile(ch));
            }
            row_count += 1;
        }

        if row_count < height {
            return Err(MapError::DimensionMismatch {
                expected: height,
                got: row_count,
            });
        }

        Ok(Self {
            height,
            width,
            tiles,
            occupied: ReservationTable::new(),
            parking: BTreeSet::new(),
            extra_cost: HashMap::new(),
            waiting: HashMap::new(),
            infinite_waiting: HashMap::new(),
            distance_cache: RefCell::new(HashMap::new()),
        })
    }

    fn char_to_tile(ch: char) -> Tile {
        match ch {
            '.' | 'G' | 'S' => Tile::Passable,
            // everything else is blocked (@ T O W etc.)
            _ => Tile::Blocked,
        }
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    fn index(&self, pos: Position) -> usize {
        pos.row * self.width + pos.col
    }

    /// Tile at `pos`, or `None` out of bounds.
    pub fn tile(&self, pos: Position) -> Option<Tile> {
        if pos.row < self.height && pos.col < self.width {
            Some(self.tiles[self.index(pos)])
        } else {
            None
        }
    }

    pub fn is_passable(&self, pos: Position) -> bool {
        self.tile(pos) == Some(Tile::Passable)
    }

    pub fn is_blocked(&self, pos: Position) -> bool {
        !self.is_passable(pos)
    }

    /// Neighbor of `pos` in `direction`, or `None` at the grid border (and
    /// for `Direction::None`).
    pub fn pos_by_direction(&self, pos: Position, direction: Direction) -> Option<Position> {
        let (row, col) = (pos.row, pos.col);
        let next = match direction {
            Direction::Up => Position::new(row.checked_sub(1)?, col),
            Direction::Down => Position::new(row + 1, col),
            Direction::Left => Position::new(row, col.checked_sub(1)?),
            Direction::Right => Position::new(row, col + 1),
            Direction::None => return None,
        };
        (next.row < self.height && next.col < self.width).then_some(next)
    }

    /// Cardinal from `a` to `b`, or `Direction::None` if not adjacent.
    pub fn direction_by_pos(&self, a: Position, b: Position) -> Direction {
        a.direction_to(b)
    }

    // ── Reservation table ────────────────────────────────────────────────────

    /// Canonical key for an edge reservation: `Left` is stored as `Right`
    /// from the neighbor and `Up` as `Down`, so each undirected edge has
    /// exactly one key.
    fn canonical_key(&self, pos: Position, direction: Direction) -> Option<OccupiedKey> {
        match direction {
            Direction::None => Some(OccupiedKey {
                pos,
                direction: Direction::None,
            }),
            Direction::Left | Direction::Up => {
                let neighbor = self.pos_by_direction(pos, direction)?;
                Some(OccupiedKey {
                    pos: neighbor,
                    direction: direction.opposite(),
                })
            }
            Direction::Right | Direction::Down => {
                // the edge must exist for the key to mean anything
                self.pos_by_direction(pos, direction)?;
                Some(OccupiedKey { pos, direction })
            }
        }
    }

    /// Add a reservation; `Direction::None` reserves the node itself.
    pub fn add_occupied(&mut self, pos: Position, direction: Direction, lo: Timestamp, hi: Timestamp) {
        if let Some(key) = self.canonical_key(pos, direction) {
            self.occupied.add(key, lo, hi);
        }
    }

    pub fn remove_occupied(&mut self, pos: Position, direction: Direction, lo: Timestamp, hi: Timestamp) {
        if let Some(key) = self.canonical_key(pos, direction) {
            self.occupied.remove(key, lo, hi);
        }
    }

    pub fn add_node_occupied(&mut self, pos: Position, lo: Timestamp, hi: Timestamp) {
        self.add_occupied(pos, Direction::None, lo, hi);
    }

    pub fn remove_node_occupied(&mut self, pos: Position, lo: Timestamp, hi: Timestamp) {
        self.remove_occupied(pos, Direction::None, lo, hi);
    }

    pub fn add_edge_occupied(&mut self, pos: Position, direction: Direction, lo: Timestamp, hi: Timestamp) {
        self.add_occupied(pos, direction, lo, hi);
    }

    pub fn remove_edge_occupied(&mut self, pos: Position, direction: Direction, lo: Timestamp, hi: Timestamp) {
        self.remove_occupied(pos, direction, lo, hi);
    }

    /// Interval set reserved on the node at `pos`, if any.
    pub fn node_occupancy(&self, pos: Position) -> Option<&IntervalSet> {
        self.occupied.get(OccupiedKey {
            pos,
            direction: Direction::None,
        })
    }

    /// Interval set reserved on the edge leaving `pos` in `direction`.
    pub fn edge_occupancy(&self, pos: Position, direction: Direction) -> Option<&IntervalSet> {
        let key = self.canonical_key(pos, direction)?;
        self.occupied.get(key)
    }

    pub fn occupancy(&self) -> &ReservationTable {
        &self.occupied
    }

    // ── Parking cells ────────────────────────────────────────────────────────

    pub fn add_parking_location(&mut self, pos: Position) {
        self.parking.insert(pos);
    }

    pub fn is_parking_location(&self, pos: Position) -> bool {
        self.parking.contains(&pos)
    }

    pub fn parking_locations(&self) -> impl Iterator<Item = Position> + '_ {
        self.parking.iter().copied()
    }

    // ── Extra-cost cells ─────────────────────────────────────────────────────

    /// Mark `pos` as accumulating extra cost from `from` onward.
    pub fn set_extra_cost_time(&mut self, pos: Position, from: Timestamp) {
        self.extra_cost.insert(pos, from);
    }

    /// Timestamp at which `pos` starts accumulating extra cost;
    /// `TIME_INFINITE` for unmarked cells.
    pub fn extra_cost_time(&self, pos: Position) -> Timestamp {
        self.extra_cost.get(&pos).copied().unwrap_or(TIME_INFINITE)
    }

    // ── Infinite waiting markers ─────────────────────────────────────────────

    /// Place a counted marker protecting `pos` into the unbounded future.
    /// While the count is positive the node carries the reservation
    /// `[TIME_INFINITE - 1, TIME_INFINITE)`.
    pub fn add_infinite_waiting(&mut self, pos: Position) {
        self.add_infinite_waiting_count(pos, 1);
    }

    /// Re-apply a marker with the exact count a prior
    /// [`GridMap::remove_infinite_waiting`] returned. A zero count is a no-op.
    pub fn add_infinite_waiting_count(&mut self, pos: Position, count: usize) {
        if count == 0 {
            return;
        }
        let entry = self.infinite_waiting.entry(pos).or_insert(0);
        if *entry == 0 {
            self.occupied.add(
                OccupiedKey {
                    pos,
                    direction: Direction::None,
                },
                TIME_INFINITE - 1,
                TIME_INFINITE,
            );
        }
        *entry += count;
    }

    /// Clear the marker at `pos`, returning the previous count.
    pub fn remove_infinite_waiting(&mut self, pos: Position) -> usize {
        let prev = self.infinite_waiting.remove(&pos).unwrap_or(0);
        if prev > 0 {
            self.occupied.remove(
                OccupiedKey {
                    pos,
                    direction: Direction::None,
                },
                TIME_INFINITE - 1,
                TIME_INFINITE,
            );
        }
        prev
    }

    // ── Waiting agents ───────────────────────────────────────────────────────

    pub fn add_waiting_agent(&mut self, pos: Position, timestamp: Timestamp, agent: usize) {
        self.waiting.entry(pos).or_default().push((timestamp, agent));
    }

    /// Remove the most recent matching entry from the stack at `pos`.
    pub fn remove_waiting_agent(&mut self, pos: Position, timestamp: Timestamp, agent: usize) {
        if let Some(stack) = self.waiting.get_mut(&pos) {
            if let Some(i) = stack.iter().rposition(|&e| e == (timestamp, agent)) {
                stack.remove(i);
            }
            if stack.is_empty() {
                self.waiting.remove(&pos);
            }
        }
    }

    /// Agent on top of the waiting stack at `pos`.
    pub fn last_waiting_agent(&self, pos: Position) -> Option<usize> {
        self.waiting
            .get(&pos)
            .and_then(|stack| stack.last())
            .map(|&(_, agent)| agent)
    }

    // ── Static distances ─────────────────────────────────────────────────────

    /// Obstacle-aware shortest-path distance; `TIME_INFINITE` if unreachable.
    /// The BFS field is memoized per `from` cell.
    pub fn graph_distance(&self, from: Position, to: Position) -> Timestamp {
        self.field_lookup(from, to)
    }

    /// Like [`GridMap::graph_distance`] but memoized on the endpoint, which
    /// repeats across agents when probing one task.
    pub fn graph_distance_endpoint(&self, from: Position, endpoint: Position) -> Timestamp {
        self.field_lookup(endpoint, from)
    }

    fn field_lookup(&self, source: Position, target: Position) -> Timestamp {
        if target.row >= self.height || target.col >= self.width {
            return TIME_INFINITE;
        }
        let mut cache = self.distance_cache.borrow_mut();
        let field = cache.entry(source).or_insert_with(|| self.bfs(source));
        match field[target.row * self.width + target.col] {
            UNREACHED => TIME_INFINITE,
            d => d as Timestamp,
        }
    }

    fn bfs(&self, source: Position) -> Vec<u32> {
        let mut dist = vec![UNREACHED; self.height * self.width];
        if self.is_blocked(source) {
            return dist;
        }
        let mut queue = std::collections::VecDeque::new();
        dist[self.index(source)] = 0;
        queue.push_back(source);
        while let Some(pos) = queue.pop_front() {
            let d = dist[self.index(pos)];
            for direction in Direction::CARDINALS {
                if let Some(next) = self.pos_by_direction(pos, direction) {
                    if self.is_passable(next) && dist[self.index(next)] == UNREACHED {
                        dist[self.index(next)] = d + 1;
                        queue.push_back(next);
                    }
                }
            }
        }
        dist
    }

    // ── Constraint files ─────────────────────────────────────────────────────

    /// Seed the reservation table from a constraints file: one
    /// `row col dir start end` record per line, where `dir` indexes
    /// UP, RIGHT, DOWN, LEFT, NONE as 0..4. Blank lines are skipped.
    /// Returns the number of constraints applied.
    pub fn load_constraints(&mut self, input: &str) -> Result<usize, ConstraintError> {
        let mut applied = 0;
        for (line_no, line) in input.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() != 5 {
                return Err(ConstraintError::Malformed {
                    line: line_no + 1,
                    reason: format!("expected 5 fields, got {}", fields.len()),
                });
            }
            let parse = |idx: usize, name: &str| -> Result<u64, ConstraintError> {
                fields[idx].parse().map_err(|_| ConstraintError::Malformed {
                    line: line_no + 1,
                    reason: format!("invalid {}: {}", name, fields[idx]),
                })
            };
            let row = parse(0, "row")? as usize;
            let col = parse(1, "col")? as usize;
            let dir = parse(2, "dir")?;
            let start = parse(3, "start")?;
            let end = parse(4, "end")?;
            let pos = Position::new(row, col);
            if row >= self.height || col >= self.width {
                return Err(ConstraintError::OutOfBounds { line: line_no + 1 });
            }
            let direction = match dir {
                0 => Direction::Up,
                1 => Direction::Right,
                2 => Direction::Down,
                3 => Direction::Left,
                4 => Direction::None,
                other => {
                    return Err(ConstraintError::Malformed {
                        line: line_no + 1,
                        reason: format!("invalid direction index: {other}"),
                    })
                }
            };
            self.add_occupied(pos, direction, start, end);
            applied += 1;
        }
        Ok(applied)
    }
}
