//! Tests for the map, scenario, and task file parsers.

use pretty_assertions::assert_eq;
use taflex_core::{
    GridMap, MapError, Position, ScenarioError, ScenarioFile, TaskFile, TaskFileError, Tile,
};

// ─────────────────────────────────────────────────────────────────────────────
// Map files
// ─────────────────────────────────────────────────────────────────────────────

const EMPTY_8X8_MAP: &str = r#"type octile
height 8
width 8
map
........
........
........
........
........
........
........
........
"#;

const MAZE_SNIPPET: &str = r#"type octile
height 4
width 6
map
@@@@@@
@....@
@.@@.@
@@@@@@
"#;

#[test]
fn parse_empty_8x8_map() {
    let map = GridMap::parse(EMPTY_8X8_MAP).expect("parse failed");
    assert_eq!(map.width(), 8);
    assert_eq!(map.height(), 8);
    for row in 0..8 {
        for col in 0..8 {
            assert_eq!(
                map.tile(Position::new(row, col)),
                Some(Tile::Passable),
                "({row},{col}) should be passable"
            );
        }
    }
}

#[test]
fn parse_maze_with_walls() {
    let map = GridMap::parse(MAZE_SNIPPET).expect("parse failed");
    assert_eq!(map.width(), 6);
    assert_eq!(map.height(), 4);
    assert_eq!(map.tile(Position::new(0, 0)), Some(Tile::Blocked));
    assert_eq!(map.tile(Position::new(0, 5)), Some(Tile::Blocked));
    assert_eq!(map.tile(Position::new(1, 1)), Some(Tile::Passable));
    assert_eq!(map.tile(Position::new(2, 2)), Some(Tile::Blocked));
}

#[test]
fn map_tile_out_of_bounds() {
    let map = GridMap::parse(MAZE_SNIPPET).unwrap();
    assert_eq!(map.tile(Position::new(100, 100)), None);
    assert!(map.is_blocked(Position::new(100, 100)));
}

#[test]
fn map_parse_missing_header() {
    let bad = "map\n....";
    let err = GridMap::parse(bad).unwrap_err();
    assert!(matches!(err, MapError::MissingHeader(_)));
}

#[test]
fn map_parse_row_width_mismatch() {
    let bad = "type octile\nheight 2\nwidth 4\nmap\n....\n..\n";
    let err = GridMap::parse(bad).unwrap_err();
    assert!(matches!(err, MapError::RowWidthMismatch { row: 1, .. }));
}

#[test]
fn map_parse_too_few_rows() {
    let bad = "type octile\nheight 3\nwidth 2\nmap\n..\n";
    let err = GridMap::parse(bad).unwrap_err();
    assert!(matches!(err, MapError::DimensionMismatch { expected: 3, got: 1 }));
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario files
// ─────────────────────────────────────────────────────────────────────────────

const SCEN_SNIPPET: &str = "version 1
0 warehouse.map 8 8 1 0 1 5 4
2 warehouse.map 8 8 0 0 7 7 14.5
";

#[test]
fn parse_scenario_file() {
    let scen = ScenarioFile::parse(SCEN_SNIPPET).expect("parse failed");
    assert_eq!(scen.version(), 1);
    assert_eq!(scen.entries().len(), 2);

    let first = &scen.entries()[0];
    assert_eq!(first.bucket, 0);
    assert_eq!(first.map_name, "warehouse.map");
    assert_eq!(first.start, Position::new(1, 0));
    assert_eq!(first.end, Position::new(1, 5));
    assert_eq!(first.optimal, 4.0);

    assert_eq!(scen.entries()[1].optimal, 14.5);
}

#[test]
fn scenario_missing_version() {
    let err = ScenarioFile::parse("0 m 8 8 0 0 1 1 2\n").unwrap_err();
    assert!(matches!(err, ScenarioError::MissingVersion));
}

#[test]
fn scenario_malformed_entry() {
    let err = ScenarioFile::parse("version 1\n0 m 8 8 0 0\n").unwrap_err();
    assert!(matches!(err, ScenarioError::MalformedEntry { line: 2, .. }));
}

// ─────────────────────────────────────────────────────────────────────────────
// Task files
// ─────────────────────────────────────────────────────────────────────────────

const TASK_SNIPPET: &str = "2 2
warehouse.map
1 1
3 4
0 2 0 5 3 0
0 5 2 2 8 3
1 0 1 6 6 0
1 6 0 0 13 6
";

#[test]
fn parse_task_file() {
    let tf = TaskFile::parse(TASK_SNIPPET).expect("parse failed");
    assert_eq!(tf.agent_count, 2);
    assert_eq!(tf.tasks_per_agent, 2);
    assert_eq!(tf.map_name, "warehouse.map");
    assert_eq!(tf.agent_positions, vec![Position::new(1, 1), Position::new(3, 4)]);
    assert_eq!(tf.tasks.len(), 4);

    let t = &tf.tasks[1];
    assert_eq!(t.start, Position::new(0, 5));
    assert_eq!(t.end, Position::new(2, 2));
    assert_eq!(t.optimal, 8.0);
    assert_eq!(t.start_time, 3);
}

#[test]
fn task_file_truncated() {
    let err = TaskFile::parse("2 2\nwarehouse.map\n1 1\n").unwrap_err();
    assert!(matches!(err, TaskFileError::UnexpectedEof(_)));
}

#[test]
fn task_file_bad_number() {
    let err = TaskFile::parse("x 2\nwarehouse.map\n").unwrap_err();
    assert!(matches!(err, TaskFileError::Invalid { field: "agent count", .. }));
}
