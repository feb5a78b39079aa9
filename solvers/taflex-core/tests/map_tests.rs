//! Tests for grid geometry, reservation delegation, and the warehouse state
//! carried by the map.

use pretty_assertions::assert_eq;
use taflex_core::{Direction, GridMap, Position, TIME_INFINITE};

const OPEN_3X3: &str = r#"type octile
height 3
width 3
map
...
...
...
"#;

const RING_3X3: &str = r#"type octile
height 3
width 3
map
...
.@.
...
"#;

fn pos(row: usize, col: usize) -> Position {
    Position::new(row, col)
}

// ─────────────────────────────────────────────────────────────────────────────
// Geometry
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn pos_by_direction_respects_borders() {
    let map = GridMap::parse(OPEN_3X3).unwrap();
    assert_eq!(map.pos_by_direction(pos(0, 0), Direction::Up), None);
    assert_eq!(map.pos_by_direction(pos(0, 0), Direction::Left), None);
    assert_eq!(map.pos_by_direction(pos(0, 0), Direction::Down), Some(pos(1, 0)));
    assert_eq!(map.pos_by_direction(pos(0, 0), Direction::Right), Some(pos(0, 1)));
    assert_eq!(map.pos_by_direction(pos(2, 2), Direction::Down), None);
    assert_eq!(map.pos_by_direction(pos(2, 2), Direction::Right), None);
    assert_eq!(map.pos_by_direction(pos(1, 1), Direction::None), None);
}

#[test]
fn direction_by_pos_matches_geometry() {
    let map = GridMap::parse(OPEN_3X3).unwrap();
    assert_eq!(map.direction_by_pos(pos(1, 1), pos(0, 1)), Direction::Up);
    assert_eq!(map.direction_by_pos(pos(1, 1), pos(1, 2)), Direction::Right);
    assert_eq!(map.direction_by_pos(pos(1, 1), pos(2, 2)), Direction::None);
}

// ─────────────────────────────────────────────────────────────────────────────
// Reservation delegation and canonical edges
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn left_edge_is_stored_as_right_from_neighbor() {
    let mut map = GridMap::parse(OPEN_3X3).unwrap();
    map.add_edge_occupied(pos(0, 1), Direction::Left, 2, 4);

    // only one table entry
    assert_eq!(map.occupancy().len(), 1);
    // visible from both endpoints of the undirected edge
    assert!(map.edge_occupancy(pos(0, 0), Direction::Right).unwrap().intersects(2, 4));
    assert!(map.edge_occupancy(pos(0, 1), Direction::Left).unwrap().intersects(2, 4));
    // and not confused with the node itself
    assert!(map.node_occupancy(pos(0, 0)).is_none());

    map.remove_edge_occupied(pos(0, 0), Direction::Right, 2, 4);
    assert!(map.occupancy().is_empty());
}

#[test]
fn up_edge_is_stored_as_down_from_neighbor() {
    let mut map = GridMap::parse(OPEN_3X3).unwrap();
    map.add_edge_occupied(pos(1, 0), Direction::Up, 0, 1);
    assert_eq!(map.occupancy().len(), 1);
    assert!(map.edge_occupancy(pos(0, 0), Direction::Down).unwrap().intersects(0, 1));
    map.remove_edge_occupied(pos(1, 0), Direction::Up, 0, 1);
    assert!(map.occupancy().is_empty());
}

#[test]
fn node_occupancy_round_trip() {
    let mut map = GridMap::parse(OPEN_3X3).unwrap();
    map.add_node_occupied(pos(2, 1), 0, 3);
    map.add_node_occupied(pos(2, 1), 3, 5);
    let set = map.node_occupancy(pos(2, 1)).unwrap();
    assert_eq!(set.spans().collect::<Vec<_>>(), vec![(0, 5)]);
    map.remove_node_occupied(pos(2, 1), 0, 5);
    assert!(map.occupancy().is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Infinite waiting markers
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn infinite_waiting_is_counted_and_far_future() {
    let mut map = GridMap::parse(OPEN_3X3).unwrap();
    map.add_infinite_waiting(pos(1, 1));
    map.add_infinite_waiting(pos(1, 1));

    let set = map.node_occupancy(pos(1, 1)).unwrap();
    assert!(set.intersects(TIME_INFINITE - 1, TIME_INFINITE));
    // a marker never blocks finite-time traffic
    assert!(!set.intersects(0, 1_000_000));

    let prev = map.remove_infinite_waiting(pos(1, 1));
    assert_eq!(prev, 2);
    assert!(map.node_occupancy(pos(1, 1)).is_none());

    // exact restore with the captured count
    map.add_infinite_waiting_count(pos(1, 1), prev);
    assert_eq!(map.remove_infinite_waiting(pos(1, 1)), 2);

    // restoring a zero count is a no-op
    map.add_infinite_waiting_count(pos(1, 1), 0);
    assert_eq!(map.remove_infinite_waiting(pos(1, 1)), 0);
    assert!(map.occupancy().is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Waiting stacks
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn waiting_stack_tracks_top_entry() {
    let mut map = GridMap::parse(OPEN_3X3).unwrap();
    assert_eq!(map.last_waiting_agent(pos(0, 0)), None);

    map.add_waiting_agent(pos(0, 0), 0, 3);
    map.add_waiting_agent(pos(0, 0), 5, 7);
    assert_eq!(map.last_waiting_agent(pos(0, 0)), Some(7));

    map.remove_waiting_agent(pos(0, 0), 5, 7);
    assert_eq!(map.last_waiting_agent(pos(0, 0)), Some(3));

    // removing a non-existent entry is tolerated
    map.remove_waiting_agent(pos(0, 0), 9, 9);
    assert_eq!(map.last_waiting_agent(pos(0, 0)), Some(3));

    map.remove_waiting_agent(pos(0, 0), 0, 3);
    assert_eq!(map.last_waiting_agent(pos(0, 0)), None);
}

// ─────────────────────────────────────────────────────────────────────────────
// Parking and extra-cost cells
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn parking_set_membership() {
    let mut map = GridMap::parse(OPEN_3X3).unwrap();
    map.add_parking_location(pos(0, 2));
    assert!(map.is_parking_location(pos(0, 2)));
    assert!(!map.is_parking_location(pos(0, 1)));
    assert_eq!(map.parking_locations().collect::<Vec<_>>(), vec![pos(0, 2)]);
}

#[test]
fn extra_cost_defaults_to_never() {
    let mut map = GridMap::parse(OPEN_3X3).unwrap();
    assert_eq!(map.extra_cost_time(pos(1, 1)), TIME_INFINITE);
    map.set_extra_cost_time(pos(1, 1), 4);
    assert_eq!(map.extra_cost_time(pos(1, 1)), 4);
}

// ─────────────────────────────────────────────────────────────────────────────
// Graph distances
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn graph_distance_routes_around_obstacles() {
    let map = GridMap::parse(RING_3X3).unwrap();
    // straight across would be 2, the blocked center forces a detour
    assert_eq!(map.graph_distance(pos(1, 0), pos(1, 2)), 4);
    assert_eq!(map.graph_distance_endpoint(pos(1, 0), pos(1, 2)), 4);
    assert_eq!(map.graph_distance(pos(0, 0), pos(0, 0)), 0);
    // blocked target is unreachable
    assert_eq!(map.graph_distance(pos(0, 0), pos(1, 1)), TIME_INFINITE);
    assert_eq!(map.graph_distance(pos(0, 0), pos(9, 9)), TIME_INFINITE);
}

// ─────────────────────────────────────────────────────────────────────────────
// Constraint files
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn load_constraints_seeds_the_table() {
    let mut map = GridMap::parse(OPEN_3X3).unwrap();
    let text = "1 1 4 2 3\n0 1 3 0 1\n\n";
    let applied = map.load_constraints(text).unwrap();
    assert_eq!(applied, 2);
    assert!(map.node_occupancy(pos(1, 1)).unwrap().intersects(2, 3));
    // direction index 3 is LEFT, canonicalized onto (0,0) RIGHT
    assert!(map.edge_occupancy(pos(0, 0), Direction::Right).unwrap().intersects(0, 1));
}

#[test]
fn load_constraints_rejects_bad_records() {
    let mut map = GridMap::parse(OPEN_3X3).unwrap();
    assert!(map.load_constraints("1 1 4 2").is_err());
    assert!(map.load_constraints("1 1 9 2 3").is_err());
    assert!(map.load_constraints("9 9 4 2 3").is_err());
    assert!(map.load_constraints("a b 4 2 3").is_err());
}
