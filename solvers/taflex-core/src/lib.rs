//! Core types for the taflex lifelong pickup-and-delivery planner.
//!
//! Provides the grid map with its time-interval reservation table,
//! waypoint scenarios, agent/task records, and parsers for the map,
//! task, scenario, and constraint file formats.

mod interval;
mod map;
mod position;
mod scenario;
mod task;

pub use interval::{IntervalSet, OccupiedKey, ReservationTable, Timestamp, TIME_INFINITE};
pub use map::{ConstraintError, GridMap, MapError, Tile};
pub use position::{Direction, Position};
pub use scenario::{Scenario, ScenarioEntry, ScenarioError, ScenarioFile};
pub use task::{Agent, Flexibility, PathNode, Task, TaskFile, TaskFileError, TaskSpec};
