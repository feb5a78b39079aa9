//! Single-agent search kernel over the time-expanded warehouse grid.
//!
//! The [`Solver`] finds shortest paths subject to node- and edge-occupancy
//! intervals, multi-waypoint routes, and a deadline cutoff. Two expansion
//! variants are provided: a waiting-aware A* and a safe-interval search with
//! explicit child commitment. The solver only ever reads the reservation
//! table; all writes stay with its caller.

mod search;

pub use search::{Algorithm, NodeHandle, Solver, VirtualNode};
