//! Assignment-engine error type.

use std::path::PathBuf;

use thiserror::Error;

use taflex_core::{ConstraintError, MapError, ScenarioError, TaskFileError};

#[derive(Debug, Error)]
pub enum ManagerError {
    /// The committed path does not begin at the agent's current cell; the
    /// reservation table cannot be trusted past this point.
    #[error("agent {agent}: committed path does not start at its current position")]
    AgentPositionMismatch { agent: usize },

    #[error("agent {agent}: empty committed path")]
    EmptyPath { agent: usize },

    #[error("map: {0}")]
    Map(#[from] MapError),

    #[error("constraints: {0}")]
    Constraints(#[from] ConstraintError),

    #[error("task file: {0}")]
    TaskFile(#[from] TaskFileError),

    #[error("scenario file: {0}")]
    ScenarioFile(#[from] ScenarioError),

    #[error("scenario entry {entry} expects a {width}x{height} map")]
    ScenarioMapMismatch {
        entry: usize,
        width: usize,
        height: usize,
    },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
