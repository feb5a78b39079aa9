//! Waypoint scenarios and the `.scen` benchmark file format.

use thiserror::Error;

use crate::interval::{Timestamp, TIME_INFINITE};
use crate::map::GridMap;
use crate::position::Position;

/// An ordered route through mandatory waypoints, with the optimal distance of
/// every remaining leg precomputed for heuristic use.
#[derive(Debug, Clone)]
pub struct Scenario {
    bucket: usize,
    waypoints: Vec<Position>,
    /// `segments[i]` = obstacle-aware distance from waypoint `i` to `i + 1`.
    segments: Vec<Timestamp>,
    /// `remaining[c]` = sum of segment distances strictly after segment `c`.
    remaining: Vec<Timestamp>,
    optimal: f64,
    start_time: Timestamp,
}

impl Scenario {
    /// Two-point route from `start` to `end`.
    pub fn new(
        bucket: usize,
        map: &GridMap,
        start: Position,
        end: Position,
        optimal: f64,
        start_time: Timestamp,
    ) -> Self {
        Self::with_waypoints(bucket, map, vec![start, end], optimal, start_time)
    }

    /// Multi-waypoint route visiting every position in order. At least two
    /// waypoints are required.
    pub fn with_waypoints(
        bucket: usize,
        map: &GridMap,
        waypoints: Vec<Position>,
        optimal: f64,
        start_time: Timestamp,
    ) -> Self {
        assert!(waypoints.len() >= 2, "a scenario needs at least two waypoints");
        let segments: Vec<Timestamp> = waypoints
            .windows(2)
            .map(|w| map.graph_distance(w[0], w[1]))
            .collect();
        let mut remaining: Vec<Timestamp> = vec![0; segments.len()];
        for c in (0..segments.len().saturating_sub(1)).rev() {
            remaining[c] = remaining[c + 1].saturating_add(segments[c + 1]);
        }
        Self {
            bucket,
            waypoints,
            segments,
            remaining,
            optimal,
            start_time,
        }
    }

    pub fn bucket(&self) -> usize {
        self.bucket
    }

    /// Number of legs (waypoints minus one); checkpoints range over `0..size`.
    pub fn size(&self) -> usize {
        self.segments.len()
    }

    pub fn start(&self) -> Position {
        self.waypoints[0]
    }

    pub fn end(&self) -> Position {
        *self.waypoints.last().unwrap()
    }

    /// Target waypoint of leg `checkpoint` (clamped to the final waypoint).
    pub fn end_at(&self, checkpoint: usize) -> Position {
        let idx = (checkpoint + 1).min(self.waypoints.len() - 1);
        self.waypoints[idx]
    }

    /// Optimal distance left after completing leg `checkpoint`.
    pub fn remaining_distance(&self, checkpoint: usize) -> Timestamp {
        self.remaining.get(checkpoint).copied().unwrap_or(0)
    }

    /// Optimal distance of the whole route; `TIME_INFINITE` if any leg is
    /// unreachable.
    pub fn total_distance(&self) -> Timestamp {
        let mut total: Timestamp = 0;
        for &d in &self.segments {
            if d >= TIME_INFINITE {
                return TIME_INFINITE;
            }
            total = total.saturating_add(d);
        }
        total
    }

    pub fn optimal(&self) -> f64 {
        self.optimal
    }

    pub fn start_time(&self) -> Timestamp {
        self.start_time
    }
}

/// Errors from parsing a scenario file.
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("missing version header")]
    MissingVersion,

    #[error("invalid version: {0}")]
    InvalidVersion(String),

    #[error("malformed entry on line {line}: {reason}")]
    MalformedEntry { line: usize, reason: String },
}

/// A single benchmark record in a scenario file.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioEntry {
    /// Bucket index, used for grouping by difficulty.
    pub bucket: usize,
    /// Name of the map file this entry refers to.
    pub map_name: String,
    /// Map width, for validation.
    pub map_width: usize,
    /// Map height, for validation.
    pub map_height: usize,
    pub start: Position,
    pub end: Position,
    /// Optimal path length reported by the benchmark.
    pub optimal: f64,
}

/// A parsed scenario file.
#[derive(Debug, Clone)]
pub struct ScenarioFile {
    version: u32,
    entries: Vec<ScenarioEntry>,
}

impl ScenarioFile {
    /// Parse a scenario file.
    ///
    /// Expected format:
    /// ```text
    /// version N
    /// bucket map width height start_row start_col end_row end_col optimal
    /// ...
    /// ```
    pub fn parse(input: &str) -> Result<Self, ScenarioError> {
        let mut lines = input.lines().enumerate();

        let version = loop {
            match lines.next() {
                Some((_, line)) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    if let Some(rest) = trimmed.strip_prefix("version ") {
                        break rest
                            .trim()
                            .parse::<u32>()
                            .map_err(|_| ScenarioError::InvalidVersion(rest.to_string()))?;
                    }
                    return Err(ScenarioError::MissingVersion);
                }
                None => return Err(ScenarioError::MissingVersion),
            }
        };

        let mut entries = Vec::new();

        for (line_no, line) in lines {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let parts: Vec<&str> = trimmed.split_whitespace().collect();
            if parts.len() < 9 {
                return Err(ScenarioError::MalformedEntry {
                    line: line_no + 1,
                    reason: format!("expected 9 columns, got {}", parts.len()),
                });
            }

            let parse_usize = |idx: usize, name: &str| -> Result<usize, ScenarioError> {
                parts[idx].parse().map_err(|_| ScenarioError::MalformedEntry {
                    line: line_no + 1,
                    reason: format!("invalid {}: {}", name, parts[idx]),
                })
            };

            let optimal: f64 =
                parts[8].parse().map_err(|_| ScenarioError::MalformedEntry {
                    line: line_no + 1,
                    reason: format!("invalid optimal: {}", parts[8]),
                })?;

            entries.push(ScenarioEntry {
                bucket: parse_usize(0, "bucket")?,
                map_name: parts[1].to_string(),
                map_width: parse_usize(2, "width")?,
                map_height: parse_usize(3, "height")?,
                start: Position::new(parse_usize(4, "start_row")?, parse_usize(5, "start_col")?),
                end: Position::new(parse_usize(6, "end_row")?, parse_usize(7, "end_col")?),
                optimal,
            });
        }

        Ok(Self { version, entries })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn entries(&self) -> &[ScenarioEntry] {
        &self.entries
    }
}
