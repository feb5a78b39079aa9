//! The `generate` subcommand: well-formed warehouse instances.
//!
//! Produces a delivery-aisle map (every fourth row carries obstacle runs) and
//! a task file whose per-task optima are measured by driving the solver on
//! the empty map, chaining each agent's tasks so the instance is well-formed.

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Args;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::info;

use taflex_core::{GridMap, Position, Scenario, TIME_INFINITE};
use taflex_solver::{Algorithm, Solver};

const DELIVERY_WIDTH: usize = 10;
const DISTANCE_STEP_CAP: usize = 100_000;

#[derive(Args)]
pub struct GenerateArgs {
    /// Random seed.
    #[arg(short = 's', long, default_value_t = 5489)]
    pub seed: u64,

    /// Number of agents.
    #[arg(short = 'a', long, default_value_t = 10)]
    pub agent: usize,

    /// Tasks per agent.
    #[arg(short = 'k', long = "agent-per-task", default_value_t = 2)]
    pub agent_per_task: usize,

    /// Accumulate release times along each agent's task chain.
    #[arg(short = 'r', long)]
    pub release: bool,

    /// Delivery-block rows.
    #[arg(short = 'x', default_value_t = 5)]
    pub x: usize,

    /// Delivery-block columns.
    #[arg(short = 'y', default_value_t = 2)]
    pub y: usize,

    /// Output data directory.
    #[arg(long, default_value = "test-benchmark")]
    pub data: PathBuf,
}

pub fn run(args: GenerateArgs) -> anyhow::Result<()> {
    let (map_name, map_text, task_name, task_text) = generate_instance(&args)?;

    let map_dir = args.data.join("map");
    let task_dir = args.data.join("task");
    fs::create_dir_all(&map_dir).with_context(|| format!("creating {}", map_dir.display()))?;
    fs::create_dir_all(&task_dir).with_context(|| format!("creating {}", task_dir.display()))?;

    let map_path = map_dir.join(format!("{map_name}.map"));
    fs::write(&map_path, map_text).with_context(|| format!("writing {}", map_path.display()))?;
    let task_path = task_dir.join(&task_name);
    fs::write(&task_path, task_text).with_context(|| format!("writing {}", task_path.display()))?;

    info!(map = %map_path.display(), task = %task_path.display(), "instance written");
    println!("{}", task_path.display());
    Ok(())
}

/// Build the map and task file contents for the given parameters.
pub fn generate_instance(args: &GenerateArgs) -> anyhow::Result<(String, String, String, String)> {
    let rows = 4 * args.x + 1;
    let cols = args.y * (DELIVERY_WIDTH + 1) + 13;

    let map_name = format!("well-formed-{rows}-{cols}");
    let map_text = build_map_text(rows, cols);
    let map = GridMap::parse(&map_text).expect("generated map must parse");

    let mut parking_points = collect_parking_points(rows, cols);
    let task_points = collect_task_points(rows, cols);
    info!(parking = parking_points.len(), task = task_points.len(), "point pools");
    if parking_points.len() < args.agent {
        bail!(
            "grid has {} parking cells but {} agents were requested",
            parking_points.len(),
            args.agent
        );
    }

    let mut rng = SmallRng::seed_from_u64(args.seed);
    parking_points.shuffle(&mut rng);

    let mut solver = Solver::new(Algorithm::WaitingAware, 0);
    let mut agent_lines = String::new();
    let mut task_lines = String::new();

    for _ in 0..args.agent {
        let mut point = parking_points.pop().expect("enough parking cells");
        agent_lines.push_str(&format!("{} {}\n", point.row, point.col));

        let mut dist: u64 = 0;
        let mut start_time: u64 = 0;
        for _ in 0..args.agent_per_task {
            let pickup = task_points[rng.gen_range(0..task_points.len())];
            dist += shortest_distance(&mut solver, &map, point, pickup)?;
            let delivery = task_points[rng.gen_range(0..task_points.len())];
            dist += shortest_distance(&mut solver, &map, pickup, delivery)?;

            task_lines.push_str(&format!(
                "{} {} {} {} {} {}\n",
                pickup.row, pickup.col, delivery.row, delivery.col, dist, start_time
            ));

            point = delivery;
            if args.release {
                start_time += dist;
            }
        }
    }

    let mut task_name = format!(
        "{map_name}-{}-{}-{}",
        args.agent, args.agent_per_task, args.seed
    );
    if args.release {
        task_name.push_str("-release");
    }
    task_name.push_str(".task");

    let task_text = format!(
        "{} {}\n{map_name}.map\n{agent_lines}{task_lines}",
        args.agent, args.agent_per_task
    );
    Ok((map_name, map_text, task_name, task_text))
}

fn build_map_text(rows: usize, cols: usize) -> String {
    let mut out = format!("type octile\nheight {rows}\nwidth {cols}\nmap\n");
    for row in 0..rows {
        for col in 0..cols {
            if is_delivery_obstacle(row, col, cols) {
                out.push('@');
            } else {
                out.push('.');
            }
        }
        out.push('\n');
    }
    out
}

fn is_delivery_obstacle(row: usize, col: usize, cols: usize) -> bool {
    row % 4 == 2
        && col >= 7
        && col < cols - 7
        && (col - 7) % (DELIVERY_WIDTH + 1) != DELIVERY_WIDTH
}

/// Parking cells line the left and right margins of every interior row.
fn collect_parking_points(rows: usize, cols: usize) -> Vec<Position> {
    let parking_cols = [1, 2, 4, 5, cols - 6, cols - 5, cols - 3, cols - 2];
    let mut points = Vec::new();
    for row in 1..rows - 1 {
        for &col in &parking_cols {
            points.push(Position::new(row, col));
        }
    }
    points
}

/// Pickup/delivery cells sit on the odd rows beside the obstacle runs.
fn collect_task_points(rows: usize, cols: usize) -> Vec<Position> {
    let mut points = Vec::new();
    for row in (1..rows).step_by(2) {
        for col in 7..cols - 7 {
            if (col - 7) % (DELIVERY_WIDTH + 1) != DELIVERY_WIDTH {
                points.push(Position::new(row, col));
            }
        }
    }
    points
}

fn shortest_distance(
    solver: &mut Solver,
    map: &GridMap,
    from: Position,
    to: Position,
) -> anyhow::Result<u64> {
    let scenario = Scenario::new(0, map, from, to, 0.0, 0);
    solver.init_scenario(map, scenario, 0, TIME_INFINITE);
    let mut steps = 0;
    while !solver.success() && solver.step(map).is_some() && steps < DISTANCE_STEP_CAP {
        steps += 1;
    }
    if !solver.success() {
        bail!("no path between {from} and {to} on the generated map");
    }
    Ok(solver
        .construct_path()
        .last()
        .expect("successful search has a path")
        .leave_time)
}
