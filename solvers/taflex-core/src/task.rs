//! Agents, tasks, committed path nodes, and the task file format.

use thiserror::Error;

use crate::interval::Timestamp;
use crate::position::Position;
use crate::scenario::Scenario;

/// One step of a committed plan. The agent occupies `pos` from its arrival
/// until `leave_time + 1`, beginning the move to the next node at
/// `leave_time`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathNode {
    pub pos: Position,
    pub leave_time: Timestamp,
}

/// A pickup-and-delivery task wrapping its scenario.
#[derive(Debug, Clone)]
pub struct Task {
    pub scenario: Scenario,
    /// Cleared when the task is deferred by a pruning rule for this round.
    pub released: bool,
    /// Best flexibility seen for this task in the current round.
    pub max_beta: f64,
    /// Agent achieving `max_beta`, if any plan was feasible.
    pub max_beta_agent: Option<usize>,
}

impl Task {
    pub fn new(scenario: Scenario) -> Self {
        Self {
            scenario,
            released: true,
            max_beta: -1.0,
            max_beta_agent: None,
        }
    }
}

/// Cached result of probing one (agent, task) pair. A negative `beta` with an
/// empty path means no feasible plan was found.
#[derive(Debug, Clone)]
pub struct Flexibility {
    pub beta: f64,
    pub path: Vec<PathNode>,
    /// Bucket id of the task this record was computed for; used to realign
    /// caches after tasks are removed from the round list.
    pub task_id: usize,
    /// Agent found waiting on the delivery cell at probe time.
    pub occupied_agent: Option<usize>,
}

impl Default for Flexibility {
    fn default() -> Self {
        Self {
            beta: -1.0,
            path: Vec::new(),
            task_id: usize::MAX,
            occupied_agent: None,
        }
    }
}

/// A mobile agent and its committed state.
#[derive(Debug, Clone)]
pub struct Agent {
    pub origin_pos: Position,
    /// Parking cell this agent currently holds with an infinite-waiting
    /// marker.
    pub reserve_pos: Position,
    pub current_pos: Position,
    pub last_timestamp: Timestamp,
    /// Committed plan, appended task by task.
    pub path: Vec<PathNode>,
    /// Tentative parking route kept in the reservation table but detachable
    /// during planning rollback.
    pub reserved_path: Vec<PathNode>,
    /// Per-task probe cache for the current round.
    pub flexibility: Vec<Flexibility>,
}

impl Agent {
    /// A fresh agent parked on its origin cell at time zero.
    pub fn parked_at(pos: Position) -> Self {
        Self {
            origin_pos: pos,
            reserve_pos: pos,
            current_pos: pos,
            last_timestamp: 0,
            path: Vec::new(),
            reserved_path: Vec::new(),
            flexibility: Vec::new(),
        }
    }
}

/// Errors from parsing a task file.
#[derive(Debug, Error)]
pub enum TaskFileError {
    #[error("unexpected end of file while reading {0}")]
    UnexpectedEof(&'static str),

    #[error("invalid {field}: {value}")]
    Invalid { field: &'static str, value: String },
}

/// One task record from a task file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaskSpec {
    pub start: Position,
    pub end: Position,
    /// Optimal travel cost the deadline is derived from.
    pub optimal: f64,
    /// Release time before which the pickup may not be served.
    pub start_time: Timestamp,
}

/// A parsed task file.
///
/// Expected format (whitespace separated):
/// ```text
/// <agentNum> <k>
/// <mapName>
/// <row col>                       ; agentNum parking cells
/// <sr sc er ec optimal release>   ; agentNum * k task records
/// ```
#[derive(Debug, Clone)]
pub struct TaskFile {
    pub agent_count: usize,
    pub tasks_per_agent: usize,
    pub map_name: String,
    pub agent_positions: Vec<Position>,
    pub tasks: Vec<TaskSpec>,
}

impl TaskFile {
    pub fn parse(input: &str) -> Result<Self, TaskFileError> {
        let mut tokens = input.split_whitespace();

        let mut next = |what: &'static str| -> Result<&str, TaskFileError> {
            tokens.next().ok_or(TaskFileError::UnexpectedEof(what))
        };

        fn number<T: std::str::FromStr>(
            token: &str,
            field: &'static str,
        ) -> Result<T, TaskFileError> {
            token.parse().map_err(|_| TaskFileError::Invalid {
                field,
                value: token.to_string(),
            })
        }

        let agent_count: usize = number(next("agent count")?, "agent count")?;
        let tasks_per_agent: usize = number(next("tasks per agent")?, "tasks per agent")?;
        let map_name = next("map name")?.to_string();

        let mut agent_positions = Vec::with_capacity(agent_count);
        for _ in 0..agent_count {
            let row: usize = number(next("agent row")?, "agent row")?;
            let col: usize = number(next("agent col")?, "agent col")?;
            agent_positions.push(Position::new(row, col));
        }

        let mut tasks = Vec::with_capacity(agent_count * tasks_per_agent);
        for _ in 0..agent_count * tasks_per_agent {
            let sr: usize = number(next("task start row")?, "task start row")?;
            let sc: usize = number(next("task start col")?, "task start col")?;
            let er: usize = number(next("task end row")?, "task end row")?;
            let ec: usize = number(next("task end col")?, "task end col")?;
            let optimal: f64 = number(next("task optimal")?, "task optimal")?;
            let start_time: Timestamp = number(next("task release")?, "task release")?;
            tasks.push(TaskSpec {
                start: Position::new(sr, sc),
                end: Position::new(er, ec),
                optimal,
                start_time,
            });
        }

        Ok(Self {
            agent_count,
            tasks_per_agent,
            map_name,
            agent_positions,
            tasks,
        })
    }
}
