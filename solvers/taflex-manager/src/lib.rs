//! Task-to-agent assignment on top of the search kernel.
//!
//! The [`Manager`] scores candidate (agent, task) pairs by flexibility,
//! commits assignments under either a least-flex-first or an
//! earliest-deadline-first policy, reserves parking fallback paths to avoid
//! stranding agents, and keeps every reservation-table mutation transactional:
//! probes lift and restore constraints symmetrically, commits either land in
//! full or roll back in full.

mod config;
mod constraints;
mod error;
mod loader;
mod manager;

pub use config::{AssignPolicy, ManagerConfig};
pub use constraints::{
    add_path_constraints, path_constraints, remove_path_constraints, Constraint, LiftedConstraints,
};
pub use error::ManagerError;
pub use manager::{Manager, ProbeStats, TaskOutcome, TaskReport};
