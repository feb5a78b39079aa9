//! Committed-path constraint generation and the lift/restore journal.

use taflex_core::{Agent, Direction, GridMap, PathNode, Position, Timestamp};

/// A single reservation derived from a committed path: a node interval when
/// `direction` is `None`, an edge interval otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Constraint {
    pub pos: Position,
    pub direction: Direction,
    pub start: Timestamp,
    pub end: Timestamp,
}

/// The reservations a path contributes to the table.
///
/// The first node is held from the agent's previous timestamp until it
/// departs; every later node is held from arrival until departure, and every
/// move reserves its edge for the single step it takes. Consecutive nodes at
/// the same position (leg joins) contribute nothing.
pub fn path_constraints(last_timestamp: Timestamp, path: &[PathNode]) -> Vec<Constraint> {
    let mut out = Vec::new();
    let Some(first) = path.first() else {
        return out;
    };
    if first.leave_time + 1 > last_timestamp {
        out.push(Constraint {
            pos: first.pos,
            direction: Direction::None,
            start: last_timestamp,
            end: first.leave_time + 1,
        });
    }
    for w in path.windows(2) {
        let (a, b) = (w[0], w[1]);
        out.push(Constraint {
            pos: b.pos,
            direction: Direction::None,
            start: a.leave_time + 1,
            end: b.leave_time + 1,
        });
        let direction = a.pos.direction_to(b.pos);
        if direction == Direction::None {
            continue;
        }
        out.push(Constraint {
            pos: a.pos,
            direction,
            start: a.leave_time,
            end: a.leave_time + 1,
        });
    }
    out
}

pub fn add_path_constraints(map: &mut GridMap, last_timestamp: Timestamp, path: &[PathNode]) {
    for c in path_constraints(last_timestamp, path) {
        map.add_occupied(c.pos, c.direction, c.start, c.end);
    }
}

pub fn remove_path_constraints(map: &mut GridMap, last_timestamp: Timestamp, path: &[PathNode]) {
    for c in path_constraints(last_timestamp, path) {
        map.remove_occupied(c.pos, c.direction, c.start, c.end);
    }
}

/// Journal of reservations temporarily lifted from the table around a probe.
///
/// Every lift records its inverse; [`LiftedConstraints::restore`] replays the
/// inverses in reverse order, leaving the table bit-identical to its state
/// before the lift.
#[derive(Debug, Default)]
pub struct LiftedConstraints {
    ops: Vec<LiftOp>,
}

#[derive(Debug)]
enum LiftOp {
    NodeInterval {
        pos: Position,
        start: Timestamp,
        end: Timestamp,
    },
    InfiniteWaiting {
        pos: Position,
        count: usize,
    },
    Path {
        last_timestamp: Timestamp,
        path: Vec<PathNode>,
    },
}

impl LiftedConstraints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lift everything a probe must not see of the agent itself: its idle
    /// node interval (when it has no reserved path), its infinite-waiting
    /// marker, and any reserved parking path.
    pub fn lift_agent(map: &mut GridMap, agent: &Agent) -> Self {
        let mut journal = Self::new();
        if agent.reserved_path.is_empty() {
            journal.lift_node_interval(
                map,
                agent.current_pos,
                agent.last_timestamp,
                agent.last_timestamp + 1,
            );
        }
        journal.lift_infinite_waiting(map, agent.reserve_pos);
        if !agent.reserved_path.is_empty() {
            journal.lift_path(map, agent.last_timestamp, &agent.reserved_path);
        }
        journal
    }

    pub fn lift_node_interval(
        &mut self,
        map: &mut GridMap,
        pos: Position,
        start: Timestamp,
        end: Timestamp,
    ) {
        map.remove_node_occupied(pos, start, end);
        self.ops.push(LiftOp::NodeInterval { pos, start, end });
    }

    pub fn lift_infinite_waiting(&mut self, map: &mut GridMap, pos: Position) {
        let count = map.remove_infinite_waiting(pos);
        self.ops.push(LiftOp::InfiniteWaiting { pos, count });
    }

    pub fn lift_path(&mut self, map: &mut GridMap, last_timestamp: Timestamp, path: &[PathNode]) {
        remove_path_constraints(map, last_timestamp, path);
        self.ops.push(LiftOp::Path {
            last_timestamp,
            path: path.to_vec(),
        });
    }

    /// Re-apply every lifted reservation, newest first.
    pub fn restore(self, map: &mut GridMap) {
        for op in self.ops.into_iter().rev() {
            match op {
                LiftOp::NodeInterval { pos, start, end } => map.add_node_occupied(pos, start, end),
                LiftOp::InfiniteWaiting { pos, count } => {
                    map.add_infinite_waiting_count(pos, count)
                }
                LiftOp::Path {
                    last_timestamp,
                    path,
                } => add_path_constraints(map, last_timestamp, &path),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taflex_core::{GridMap, Position};

    const OPEN_3X3: &str = "type octile\nheight 3\nwidth 3\nmap\n...\n...\n...\n";

    fn path(nodes: &[(usize, usize, u64)]) -> Vec<PathNode> {
        nodes
            .iter()
            .map(|&(r, c, t)| PathNode {
                pos: Position::new(r, c),
                leave_time: t,
            })
            .collect()
    }

    #[test]
    fn constraints_cover_every_stay_and_move() {
        let p = path(&[(0, 0, 0), (0, 1, 2), (1, 1, 3)]);
        let cs = path_constraints(0, &p);
        assert_eq!(
            cs,
            vec![
                Constraint {
                    pos: Position::new(0, 0),
                    direction: Direction::None,
                    start: 0,
                    end: 1
                },
                Constraint {
                    pos: Position::new(0, 1),
                    direction: Direction::None,
                    start: 1,
                    end: 3
                },
                Constraint {
                    pos: Position::new(0, 0),
                    direction: Direction::Right,
                    start: 0,
                    end: 1
                },
                Constraint {
                    pos: Position::new(1, 1),
                    direction: Direction::None,
                    start: 3,
                    end: 4
                },
                Constraint {
                    pos: Position::new(0, 1),
                    direction: Direction::Down,
                    start: 2,
                    end: 3
                },
            ]
        );
    }

    #[test]
    fn duplicated_leg_join_contributes_nothing() {
        // two solves glued at the pickup produce the same node twice
        let p = path(&[(0, 0, 1), (0, 0, 1), (0, 1, 2)]);
        let cs = path_constraints(0, &p);
        assert!(cs
            .iter()
            .all(|c| c.start < c.end || (c.start == c.end && c.direction == Direction::None)));
        let mut map = GridMap::parse(OPEN_3X3).unwrap();
        add_path_constraints(&mut map, 0, &p);
        remove_path_constraints(&mut map, 0, &p);
        assert!(map.occupancy().is_empty());
    }

    #[test]
    fn journal_restores_exactly() {
        let mut map = GridMap::parse(OPEN_3X3).unwrap();
        map.add_node_occupied(Position::new(0, 0), 3, 4);
        map.add_infinite_waiting(Position::new(1, 1));
        let p = path(&[(2, 0, 0), (2, 1, 1), (2, 2, 2)]);
        add_path_constraints(&mut map, 0, &p);
        let before = map.occupancy().snapshot();

        let mut journal = LiftedConstraints::new();
        journal.lift_node_interval(&mut map, Position::new(0, 0), 3, 4);
        journal.lift_infinite_waiting(&mut map, Position::new(1, 1));
        journal.lift_path(&mut map, 0, &p);
        assert_ne!(map.occupancy().snapshot(), before);

        journal.restore(&mut map);
        assert_eq!(map.occupancy().snapshot(), before);
    }
}
