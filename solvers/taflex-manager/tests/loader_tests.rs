//! Data-directory loading tests.

use std::fs;

use pretty_assertions::assert_eq;
use taflex_core::Position;
use taflex_manager::{AssignPolicy, Manager, ManagerConfig, ManagerError, TaskOutcome};
use taflex_solver::Algorithm;

const MAP_5X5: &str = "type octile\nheight 5\nwidth 5\nmap\n.....\n.....\n.....\n.....\n.....\n";

const TASK_FILE: &str = "1 1
plain.map
0 0
0 1 0 4 6 0
";

fn write_instance(dir: &std::path::Path) {
    fs::create_dir_all(dir.join("map")).unwrap();
    fs::create_dir_all(dir.join("constraints")).unwrap();
    fs::write(dir.join("map").join("plain.map"), MAP_5X5).unwrap();
    fs::write(dir.join("demo.task"), TASK_FILE).unwrap();
}

#[test]
fn loads_and_plans_a_task_file() {
    let dir = tempfile::tempdir().unwrap();
    write_instance(dir.path());

    let mut manager =
        Manager::from_task_file(dir.path(), "demo.task", ManagerConfig::default()).unwrap();
    assert_eq!(manager.agents().len(), 1);
    assert_eq!(manager.tasks().len(), 1);
    assert!(manager.map().is_parking_location(Position::new(0, 0)));

    let reports = manager
        .run(AssignPolicy::EarliestDeadlineFirst, Algorithm::WaitingAware, 0.0)
        .unwrap();
    assert_eq!(reports[0].outcome, TaskOutcome::Completed { agent: 0 });
    assert_eq!(manager.agents()[0].current_pos, Position::new(0, 4));
}

#[test]
fn seeded_constraints_shape_the_plan() {
    let dir = tempfile::tempdir().unwrap();
    write_instance(dir.path());
    // block the pickup's neighbour cell early on: the route must wait
    fs::write(dir.path().join("constraints").join("plain.map"), "0 2 4 2 3\n").unwrap();

    let mut manager =
        Manager::from_task_file(dir.path(), "demo.task", ManagerConfig::default()).unwrap();
    let reports = manager
        .run(AssignPolicy::EarliestDeadlineFirst, Algorithm::WaitingAware, 0.0)
        .unwrap();
    assert_eq!(reports[0].outcome, TaskOutcome::Completed { agent: 0 });
    // the unconstrained schedule finishes at t = 4; the seeded reservation
    // on (0,2) during [2,3) costs one wait somewhere
    assert_eq!(manager.agents()[0].last_timestamp, 5);
}

#[test]
fn missing_task_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = Manager::from_task_file(dir.path(), "absent.task", ManagerConfig::default())
        .unwrap_err();
    assert!(matches!(err, ManagerError::Io { .. }));
}

#[test]
fn scenario_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    write_instance(dir.path());
    fs::write(
        dir.path().join("bench.scen"),
        "version 1\n0 plain.map 5 5 0 0 4 4 8\n",
    )
    .unwrap();

    let mut manager =
        Manager::from_task_file(dir.path(), "demo.task", ManagerConfig::default()).unwrap();
    let loaded = manager.load_scenario_file(dir.path(), "bench.scen").unwrap();
    assert_eq!(loaded, 1);
    assert_eq!(manager.scenarios().len(), 1);
    assert_eq!(manager.scenarios()[0].start(), Position::new(0, 0));
    assert_eq!(manager.scenarios()[0].total_distance(), 8);

    fs::write(
        dir.path().join("bad.scen"),
        "version 1\n0 plain.map 9 9 0 0 4 4 8\n",
    )
    .unwrap();
    let err = manager.load_scenario_file(dir.path(), "bad.scen").unwrap_err();
    assert!(matches!(err, ManagerError::ScenarioMapMismatch { entry: 0, .. }));
}
